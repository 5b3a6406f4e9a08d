//! 部署编排器
//!
//! 持有有序的策略列表，严格顺序地逐个尝试，首个成功即终止；
//! 自动策略全部失败后由终点策略 (Manual) 产出手动说明作为
//! Exhausted 终态。每次部署请求都是一次全新的走查，编排器
//! 到达终态后即被丢弃，从不复用。

use tracing::{debug, info, warn};

use super::error::DeployError;
use super::params::{
    CancelFlag, ConnectionParams, DeployOutcome, KeyMaterial, ProgressSink,
};
use super::script;
use super::strategies::{default_strategies, AttemptCx, DeployStrategy};

/// 编排器状态机: Idle → Running(索引) → Succeeded | Exhausted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running(usize),
    Succeeded,
    Exhausted,
}

/// 部署编排器
pub struct DeployOrchestrator {
    strategies: Vec<Box<dyn DeployStrategy>>,
    progress: ProgressSink,
    cancel: CancelFlag,
    state: RunState,
}

impl DeployOrchestrator {
    /// 创建使用默认策略顺序的编排器
    pub fn new(progress: ProgressSink, cancel: CancelFlag) -> Self {
        Self::with_strategies(default_strategies(), progress, cancel)
    }

    /// 注入自定义策略列表（顺序即优先级）
    pub fn with_strategies(
        strategies: Vec<Box<dyn DeployStrategy>>,
        progress: ProgressSink,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            strategies,
            progress,
            cancel,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// 执行一次完整的部署走查
    ///
    /// 每个策略最多尝试一次；运行内没有重试，想重试的调用方
    /// 需要发起全新的编排器运行。除启动前校验失败外，运行
    /// 总是以一个 `DeployOutcome` 终止，从不向外抛错。
    pub fn run(
        &mut self,
        params: &ConnectionParams,
        key: &KeyMaterial,
    ) -> Result<DeployOutcome, DeployError> {
        if self.state != RunState::Idle {
            return Err(DeployError::InvalidInput(
                "编排器已到达终态，不可复用".to_string(),
            ));
        }
        params.validate()?;
        if key.public_key.trim().is_empty() {
            return Err(DeployError::InvalidInput("公钥内容为空".to_string()));
        }

        info!(
            "开始向 {}:{} 部署公钥，共 {} 个策略",
            params.host,
            params.port,
            self.strategies.len()
        );
        self.progress
            .emit(format!("开始部署公钥到 {}...", params.destination()));

        for index in 0..self.strategies.len() {
            self.state = RunState::Running(index);
            let strategy = &self.strategies[index];

            if self.cancel.is_cancelled() {
                self.state = RunState::Exhausted;
                return Ok(DeployOutcome::cancelled());
            }

            // 前置条件不满足：恰好一条跳过事件，不计为失败尝试
            if let Err(reason) = strategy.preflight() {
                debug!("跳过策略 {}: {}", strategy.name(), reason);
                self.progress
                    .emit(format!("跳过 {}: {}", strategy.name(), reason));
                continue;
            }

            let cx = AttemptCx {
                params,
                key,
                progress: &self.progress,
                cancel: &self.cancel,
            };
            let result = strategy.attempt(&cx);

            if strategy.terminal() {
                self.state = RunState::Exhausted;
                return Ok(DeployOutcome::exhausted(result.detail));
            }

            // 尝试期间被取消的策略不得报成功
            if self.cancel.is_cancelled() {
                self.state = RunState::Exhausted;
                return Ok(DeployOutcome::cancelled());
            }

            if result.succeeded {
                info!("策略 {} 部署成功", strategy.name());
                self.progress
                    .emit(format!("{} 部署成功", strategy.name()));
                self.state = RunState::Succeeded;
                return Ok(DeployOutcome::success(strategy.name()));
            }

            warn!("策略 {} 失败: {}", strategy.name(), result.detail);
            self.progress
                .emit(format!("{} 方式失败: {}", strategy.name(), result.detail));
        }

        // 列表末尾应当是终点策略；自定义列表没有时兜底生成说明
        self.state = RunState::Exhausted;
        Ok(DeployOutcome::exhausted(script::manual_instructions(
            params, key,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keydeploy::params::{DeployEvent, StrategyResult};
    use crate::keydeploy::strategies::Manual;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 可编程的模拟策略
    struct MockStrategy {
        name: &'static str,
        available: bool,
        succeed: bool,
        attempts: Arc<AtomicUsize>,
        cancel_during_attempt: Option<CancelFlag>,
    }

    impl MockStrategy {
        fn new(name: &'static str, available: bool, succeed: bool) -> (Self, Arc<AtomicUsize>) {
            let attempts = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    available,
                    succeed,
                    attempts: attempts.clone(),
                    cancel_during_attempt: None,
                },
                attempts,
            )
        }
    }

    impl DeployStrategy for MockStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        fn preflight(&self) -> Result<(), String> {
            if self.available {
                Ok(())
            } else {
                Err("工具不可用".to_string())
            }
        }

        fn attempt(&self, _cx: &AttemptCx<'_>) -> StrategyResult {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(flag) = &self.cancel_during_attempt {
                flag.cancel();
            }
            if self.succeed {
                StrategyResult::succeeded("模拟成功")
            } else {
                StrategyResult::failed("模拟失败")
            }
        }
    }

    fn params() -> ConnectionParams {
        ConnectionParams::new("10.0.0.5", 22, "alice", "x")
    }

    fn key() -> KeyMaterial {
        KeyMaterial::new("ssh-ed25519 AAAA alice@laptop")
    }

    fn collect_progress(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<DeployEvent>,
    ) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let DeployEvent::Progress(text) = ev {
                lines.push(text);
            }
        }
        lines
    }

    #[test]
    fn test_first_success_terminates_walk() {
        let (sink, _rx) = ProgressSink::channel();
        let (first, first_attempts) = MockStrategy::new("first", true, true);
        let (second, second_attempts) = MockStrategy::new("second", true, true);
        let mut orch = DeployOrchestrator::with_strategies(
            vec![Box::new(first), Box::new(second), Box::new(Manual)],
            sink,
            CancelFlag::new(),
        );

        let outcome = orch.run(&params(), &key()).unwrap();
        assert!(outcome.succeeded);
        assert!(outcome.message.contains("first"));
        assert_eq!(first_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(second_attempts.load(Ordering::SeqCst), 0);
        assert_eq!(*orch.state(), RunState::Succeeded);
    }

    #[test]
    fn test_skipped_strategy_emits_one_event_and_is_not_attempted() {
        let (sink, mut rx) = ProgressSink::channel();
        let (skipped, skipped_attempts) = MockStrategy::new("skipped", false, true);
        let (winner, _) = MockStrategy::new("winner", true, true);
        let mut orch = DeployOrchestrator::with_strategies(
            vec![Box::new(skipped), Box::new(winner), Box::new(Manual)],
            sink,
            CancelFlag::new(),
        );

        let outcome = orch.run(&params(), &key()).unwrap();
        assert!(outcome.succeeded);
        assert_eq!(skipped_attempts.load(Ordering::SeqCst), 0);

        let lines = collect_progress(&mut rx);
        let skip_lines: Vec<_> = lines.iter().filter(|l| l.contains("跳过 skipped")).collect();
        assert_eq!(skip_lines.len(), 1);
    }

    #[test]
    fn test_exhaustion_yields_manual_instructions() {
        let (sink, _rx) = ProgressSink::channel();
        let (a, _) = MockStrategy::new("a", false, false);
        let (b, b_attempts) = MockStrategy::new("b", true, false);
        let (c, _) = MockStrategy::new("c", false, false);
        let mut orch = DeployOrchestrator::with_strategies(
            vec![Box::new(a), Box::new(b), Box::new(c), Box::new(Manual)],
            sink,
            CancelFlag::new(),
        );

        let outcome = orch.run(&params(), &key()).unwrap();
        assert!(!outcome.succeeded);
        assert!(!outcome.cancelled);
        assert!(outcome.is_manual());
        assert!(outcome.message.contains("alice@10.0.0.5"));
        assert_eq!(b_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*orch.state(), RunState::Exhausted);
    }

    #[test]
    fn test_attempt_order_is_list_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct Recording {
            name: &'static str,
            order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        }
        impl DeployStrategy for Recording {
            fn name(&self) -> &'static str {
                self.name
            }
            fn preflight(&self) -> Result<(), String> {
                Ok(())
            }
            fn attempt(&self, _cx: &AttemptCx<'_>) -> StrategyResult {
                self.order.lock().unwrap().push(self.name);
                StrategyResult::failed("继续下一个")
            }
        }

        let (sink, _rx) = ProgressSink::channel();
        let mut orch = DeployOrchestrator::with_strategies(
            vec![
                Box::new(Recording {
                    name: "one",
                    order: order.clone(),
                }),
                Box::new(Recording {
                    name: "two",
                    order: order.clone(),
                }),
                Box::new(Recording {
                    name: "three",
                    order: order.clone(),
                }),
                Box::new(Manual),
            ],
            sink,
            CancelFlag::new(),
        );

        let outcome = orch.run(&params(), &key()).unwrap();
        assert!(outcome.is_manual());
        assert_eq!(*order.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_cancel_during_attempt_never_reports_success() {
        let (sink, _rx) = ProgressSink::channel();
        let cancel = CancelFlag::new();
        let (mut strategy, _) = MockStrategy::new("racer", true, true);
        strategy.cancel_during_attempt = Some(cancel.clone());
        let mut orch = DeployOrchestrator::with_strategies(
            vec![Box::new(strategy), Box::new(Manual)],
            sink,
            cancel,
        );

        let outcome = orch.run(&params(), &key()).unwrap();
        assert!(!outcome.succeeded);
        assert!(outcome.cancelled);
    }

    #[test]
    fn test_cancel_before_run_is_terminal() {
        let (sink, _rx) = ProgressSink::channel();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let (strategy, attempts) = MockStrategy::new("never", true, true);
        let mut orch = DeployOrchestrator::with_strategies(
            vec![Box::new(strategy), Box::new(Manual)],
            sink,
            cancel,
        );

        let outcome = orch.run(&params(), &key()).unwrap();
        assert!(outcome.cancelled);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejects_invalid_input_before_start() {
        let (sink, _rx) = ProgressSink::channel();
        let mut orch = DeployOrchestrator::new(sink, CancelFlag::new());
        let bad = ConnectionParams::new("", 22, "alice", "x");
        assert!(matches!(
            orch.run(&bad, &key()),
            Err(DeployError::InvalidInput(_))
        ));
        assert_eq!(*orch.state(), RunState::Idle);
    }

    #[test]
    fn test_orchestrator_not_reusable_after_terminal() {
        let (sink, _rx) = ProgressSink::channel();
        let (winner, _) = MockStrategy::new("winner", true, true);
        let mut orch = DeployOrchestrator::with_strategies(
            vec![Box::new(winner), Box::new(Manual)],
            sink,
            CancelFlag::new(),
        );

        orch.run(&params(), &key()).unwrap();
        assert!(orch.run(&params(), &key()).is_err());
    }

    #[test]
    fn test_scenario_two_skips_then_success() {
        // 场景 B: 前一个策略缺工具跳过，后一个成功
        let (sink, mut rx) = ProgressSink::channel();
        let (absent, _) = MockStrategy::new("copytool", false, true);
        let (relay, _) = MockStrategy::new("relay", true, true);
        let mut orch = DeployOrchestrator::with_strategies(
            vec![Box::new(absent), Box::new(relay), Box::new(Manual)],
            sink,
            CancelFlag::new(),
        );

        let outcome = orch.run(&params(), &key()).unwrap();
        assert!(outcome.succeeded);
        assert!(outcome.message.contains("relay"));

        let lines = collect_progress(&mut rx);
        let success_index = lines
            .iter()
            .position(|l| l.contains("relay 部署成功"))
            .unwrap();
        let skip_index = lines
            .iter()
            .position(|l| l.contains("跳过 copytool"))
            .unwrap();
        assert!(skip_index < success_index);
    }
}

//! 异步部署任务
//!
//! 将一次编排器运行包装到后台执行单元中，使交互式调用方不被
//! 阻塞的网络调用卡住。事件按发出顺序经 channel 回流，终态
//! 恰好一次且始终是最后一个事件。

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::error;

use super::error::DeployError;
use super::orchestrator::DeployOrchestrator;
use super::params::{
    CancelFlag, ConnectionParams, DeployEvent, DeployOutcome, KeyMaterial, ProgressSink,
};
use super::strategies::DeployStrategy;

/// 一次部署运行的句柄
///
/// 通过 [`DeployTask::next_event`] 逐条消费进度与终态，或直接
/// [`DeployTask::wait`] 等待终态。[`DeployTask::cancel`] 尽力而为地
/// 中断当前策略正在进行的网络操作。
pub struct DeployTask {
    events: UnboundedReceiver<DeployEvent>,
    cancel: CancelFlag,
}

impl DeployTask {
    /// 启动一次部署（默认策略顺序）
    ///
    /// 输入在后台任务启动前做失败关闭校验，任何必填字段为空都
    /// 拒绝启动。
    pub fn spawn(params: ConnectionParams, key: KeyMaterial) -> Result<Self, DeployError> {
        params.validate()?;
        if key.public_key.trim().is_empty() {
            return Err(DeployError::InvalidInput("公钥内容为空".to_string()));
        }
        Ok(Self::spawn_inner(params, key, None))
    }

    /// 注入策略列表的启动入口（测试用）
    pub(crate) fn spawn_with_strategies(
        params: ConnectionParams,
        key: KeyMaterial,
        strategies: Vec<Box<dyn DeployStrategy>>,
    ) -> Self {
        Self::spawn_inner(params, key, Some(strategies))
    }

    fn spawn_inner(
        params: ConnectionParams,
        key: KeyMaterial,
        strategies: Option<Vec<Box<dyn DeployStrategy>>>,
    ) -> Self {
        let (sink, events) = ProgressSink::channel();
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();

        // 编排器内的网络调用都是同步阻塞的，放到阻塞线程池执行
        tokio::task::spawn_blocking(move || {
            let mut orchestrator = match strategies {
                Some(list) => {
                    DeployOrchestrator::with_strategies(list, sink.clone(), worker_cancel)
                }
                None => DeployOrchestrator::new(sink.clone(), worker_cancel),
            };

            let outcome = match orchestrator.run(&params, &key) {
                Ok(outcome) => outcome,
                Err(e) => {
                    // spawn 前已校验，这里只可能是防御性路径
                    error!("部署运行被拒绝: {}", e);
                    DeployOutcome {
                        succeeded: false,
                        cancelled: false,
                        message: e.to_string(),
                    }
                }
            };
            sink.done(outcome);
        });

        Self { events, cancel }
    }

    /// 请求取消，尽力而为：杀死当前策略的子进程 / 在下一个
    /// 有界操作处中断 ssh 会话。已完成的策略不会回滚（远端
    /// 序列只追加与去重，取消只会留下未变或已正确更新的状态）。
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 取一个独立的取消句柄，可在事件循环之外持有
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// 取下一个事件；事件流随终态结束
    pub async fn next_event(&mut self) -> Option<DeployEvent> {
        self.events.recv().await
    }

    /// 丢弃中间进度，直接等待终态
    pub async fn wait(mut self) -> DeployOutcome {
        while let Some(event) = self.events.recv().await {
            if let DeployEvent::Done(outcome) = event {
                return outcome;
            }
        }
        // 工作线程异常退出时的兜底
        DeployOutcome {
            succeeded: false,
            cancelled: false,
            message: "部署任务异常终止".to_string(),
        }
    }
}

/// 发起一次公钥部署（外部调用入口）
///
/// 调用方提供连接参数与公钥材料，返回的句柄上消费进度事件流
/// 与恰好一次的终态。
pub fn deploy(params: ConnectionParams, key: KeyMaterial) -> Result<DeployTask, DeployError> {
    DeployTask::spawn(params, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keydeploy::params::StrategyResult;
    use crate::keydeploy::strategies::{AttemptCx, Manual};
    use std::time::Duration;

    /// 成功或失败固定的模拟策略
    struct Fixed {
        name: &'static str,
        succeed: bool,
    }

    impl DeployStrategy for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }
        fn preflight(&self) -> Result<(), String> {
            Ok(())
        }
        fn attempt(&self, _cx: &AttemptCx<'_>) -> StrategyResult {
            if self.succeed {
                StrategyResult::succeeded("ok")
            } else {
                StrategyResult::failed("no")
            }
        }
    }

    /// 在取消标志置位前一直忙等的模拟策略
    struct BlockUntilCancelled;

    impl DeployStrategy for BlockUntilCancelled {
        fn name(&self) -> &'static str {
            "blocker"
        }
        fn preflight(&self) -> Result<(), String> {
            Ok(())
        }
        fn attempt(&self, cx: &AttemptCx<'_>) -> StrategyResult {
            while !cx.cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(10));
            }
            StrategyResult::failed("被取消中断")
        }
    }

    fn params() -> ConnectionParams {
        ConnectionParams::new("10.0.0.5", 22, "alice", "x")
    }

    fn key() -> KeyMaterial {
        KeyMaterial::new("ssh-ed25519 AAAA alice@laptop")
    }

    #[tokio::test]
    async fn test_terminal_outcome_is_last_and_unique() {
        let task = DeployTask::spawn_with_strategies(
            params(),
            key(),
            vec![
                Box::new(Fixed {
                    name: "loser",
                    succeed: false,
                }),
                Box::new(Fixed {
                    name: "winner",
                    succeed: true,
                }),
                Box::new(Manual),
            ],
        );

        let mut task = task;
        let mut done_count = 0;
        let mut after_done = 0;
        while let Some(event) = task.next_event().await {
            match event {
                DeployEvent::Done(outcome) => {
                    done_count += 1;
                    assert!(outcome.succeeded);
                    assert!(outcome.message.contains("winner"));
                }
                DeployEvent::Progress(_) => {
                    if done_count > 0 {
                        after_done += 1;
                    }
                }
            }
        }
        assert_eq!(done_count, 1);
        assert_eq!(after_done, 0);
    }

    #[tokio::test]
    async fn test_exhaustion_delivers_manual_text() {
        let task = DeployTask::spawn_with_strategies(
            params(),
            key(),
            vec![
                Box::new(Fixed {
                    name: "a",
                    succeed: false,
                }),
                Box::new(Manual),
            ],
        );

        let outcome = task.wait().await;
        assert!(!outcome.succeeded);
        assert!(outcome.is_manual());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_strategy() {
        let mut task = DeployTask::spawn_with_strategies(
            params(),
            key(),
            vec![Box::new(BlockUntilCancelled), Box::new(Manual)],
        );

        // 等拿到第一条进度，说明策略已经在跑
        let first = task.next_event().await.unwrap();
        assert!(matches!(first, DeployEvent::Progress(_)));

        task.cancel();
        let outcome = task.wait().await;
        assert!(!outcome.succeeded);
        assert!(outcome.cancelled);
    }

    #[tokio::test]
    async fn test_spawn_rejects_empty_fields() {
        let bad = ConnectionParams::new("10.0.0.5", 22, "", "x");
        assert!(matches!(
            DeployTask::spawn(bad, key()),
            Err(DeployError::InvalidInput(_))
        ));
    }
}

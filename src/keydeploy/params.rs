//! 部署参数与结果类型
//!
//! 每次部署请求都会创建一组全新的参数对象，部署结束后即丢弃，
//! 不同请求之间不共享任何状态。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zeroize::Zeroize;

use super::error::DeployError;
use super::script;

/// 安全字符串包装，在 Drop 时自动清除内存
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecureString(***)")
    }
}

/// 目标主机连接参数
///
/// 在一次部署尝试的生命周期内不可变。启动前四个字段必须全部非空。
#[derive(Debug)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecureString,
}

impl ConnectionParams {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<SecureString>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// 启动前校验，任何必填字段为空则拒绝启动
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.host.trim().is_empty() {
            return Err(DeployError::InvalidInput("主机地址为空".to_string()));
        }
        if self.port == 0 {
            return Err(DeployError::InvalidInput("端口无效".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(DeployError::InvalidInput("用户名为空".to_string()));
        }
        if self.password.is_empty() {
            return Err(DeployError::InvalidInput("密码为空".to_string()));
        }
        Ok(())
    }

    /// `user@host` 形式的目标描述
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

/// 公钥材料
///
/// `private_key_path` 仅作为 ssh-copy-id 选择身份文件的提示，从不强制要求。
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub public_key: String,
    pub private_key_path: Option<PathBuf>,
}

impl KeyMaterial {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key_path: None,
        }
    }

    pub fn with_private_key_hint(mut self, path: PathBuf) -> Self {
        self.private_key_path = Some(path);
        self
    }

    /// 从 `.pub` 文件加载公钥
    ///
    /// 同名去掉 `.pub` 后缀的文件如果存在，作为私钥提示一并记录。
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeployError::InvalidInput(format!("无法读取公钥文件: {}", e)))?;
        let key = content.trim().to_string();

        let mut material = Self::validated(key)?;

        if path.extension().and_then(|e| e.to_str()) == Some("pub") {
            let private = path.with_extension("");
            if private.exists() {
                material.private_key_path = Some(private);
            }
        }
        Ok(material)
    }

    /// 校验公钥内容格式（单行 OpenSSH 公钥文本）
    pub fn validated(key: String) -> Result<Self, DeployError> {
        if key.is_empty() {
            return Err(DeployError::InvalidInput("公钥内容为空".to_string()));
        }
        if key.lines().count() != 1 {
            return Err(DeployError::InvalidInput(
                "公钥必须是单行 OpenSSH 文本".to_string(),
            ));
        }
        if !(key.starts_with("ssh-") || key.starts_with("ecdsa-") || key.starts_with("sk-")) {
            return Err(DeployError::InvalidInput("公钥格式无法识别".to_string()));
        }
        Ok(Self::new(key))
    }
}

/// 部署终态
///
/// 每次运行恰好产生一个终态；成功时 `message` 指明获胜的策略，
/// 全部自动策略耗尽时 `message` 为完整的手动操作说明。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub succeeded: bool,
    pub cancelled: bool,
    pub message: String,
}

impl DeployOutcome {
    pub fn success(strategy_name: &str) -> Self {
        Self {
            succeeded: true,
            cancelled: false,
            message: format!("SSH 密钥部署成功 (使用 {})", strategy_name),
        }
    }

    pub fn exhausted(manual_instructions: String) -> Self {
        Self {
            succeeded: false,
            cancelled: false,
            message: manual_instructions,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            succeeded: false,
            cancelled: true,
            message: "部署已取消".to_string(),
        }
    }

    /// 终态是否携带手动操作说明（调用方可据此提供 "查看步骤" 入口）
    pub fn is_manual(&self) -> bool {
        self.message.contains(script::MANUAL_MARKER)
    }
}

/// 部署过程事件，按发出顺序投递，终态事件始终最后且仅一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    /// 状态行（策略切换、策略内部进展）
    Progress(String),
    /// 终态
    Done(DeployOutcome),
}

/// 进度事件发送端
///
/// 策略与编排器共用同一个 sink；接收端被丢弃后发送静默失败，
/// 部署照常进行（调用方不再关心事件流不应影响远端结果）。
#[derive(Clone)]
pub struct ProgressSink {
    tx: tokio::sync::mpsc::UnboundedSender<DeployEvent>,
}

impl ProgressSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<DeployEvent>) -> Self {
        Self { tx }
    }

    /// 创建 sink 及配对的事件接收端
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<DeployEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, text: impl Into<String>) {
        let _ = self.tx.send(DeployEvent::Progress(text.into()));
    }

    pub fn done(&self, outcome: DeployOutcome) {
        let _ = self.tx.send(DeployEvent::Done(outcome));
    }
}

/// 策略尝试结果（内部）
///
/// `attempted = false` 表示前置条件不满足，策略被跳过，
/// 不计为失败尝试，也不消耗网络超时预算。
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub attempted: bool,
    pub succeeded: bool,
    pub detail: String,
}

impl StrategyResult {
    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            attempted: false,
            succeeded: false,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            attempted: true,
            succeeded: false,
            detail: detail.into(),
        }
    }

    pub fn succeeded(detail: impl Into<String>) -> Self {
        Self {
            attempted: true,
            succeeded: true,
            detail: detail.into(),
        }
    }
}

/// 取消标志，编排器与策略之间共享
///
/// 粗粒度、尽力而为：策略在命令间与子进程轮询中检查该标志。
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

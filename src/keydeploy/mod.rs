//! 公钥部署模块
//!
//! 将 SSH 公钥安装到远程账户的 `~/.ssh/authorized_keys`，依次尝试
//! 多种独立机制，处理各自的部分失败，并给出明确的终态。
//!
//! # 功能
//!
//! - 固定优先级的策略链: ssh-copy-id → sshpass → ssh2 库会话 → 手动说明
//! - 幂等的远程命令序列（重复部署不产生重复条目、不破坏已有密钥）
//! - 后台任务执行 + 有序进度事件流 + 恰好一次的终态
//! - 尽力而为的取消
//!
//! # 使用示例
//!
//! ```no_run
//! use sshtm::keydeploy::{self, ConnectionParams, DeployEvent, KeyMaterial};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let params = ConnectionParams::new("10.0.0.5", 22, "alice", "secret");
//! let key = KeyMaterial::validated("ssh-ed25519 AAAA... alice@laptop".to_string())?;
//!
//! let mut task = keydeploy::deploy(params, key)?;
//! while let Some(event) = task.next_event().await {
//!     match event {
//!         DeployEvent::Progress(line) => println!("{}", line),
//!         DeployEvent::Done(outcome) => println!("{}", outcome.message),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod orchestrator;
mod params;
mod runner;
mod script;
mod strategies;
mod task;

#[cfg(feature = "libssh")]
mod ssh;

pub use error::DeployError;
pub use orchestrator::{DeployOrchestrator, RunState};
pub use params::{
    CancelFlag, ConnectionParams, DeployEvent, DeployOutcome, KeyMaterial, ProgressSink,
    SecureString, StrategyResult,
};
pub use runner::{run_sequence, CommandExec, ExecOutput};
pub use script::{install_commands, manual_instructions, MANUAL_MARKER};
pub use strategies::{default_strategies, AttemptCx, DeployStrategy};
pub use task::{deploy, DeployTask};

/// 单次策略尝试的网络操作超时（秒）
pub const ATTEMPT_TIMEOUT_SECS: u64 = 30;

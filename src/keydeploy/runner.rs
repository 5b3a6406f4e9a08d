//! 远程命令执行器
//!
//! 在一条已认证的通道上按顺序执行命令序列，遇到第一条非零退出的命令
//! 即停止，并报告该命令及其错误输出。全部命令退出码为零才算成功。

use tracing::debug;

use super::error::DeployError;
use super::params::CancelFlag;

/// 单条命令的执行结果
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// 命令执行通道抽象
///
/// LibSsh 策略通过 ssh2 会话实现；测试使用内存中的假远端实现。
pub trait CommandExec {
    fn exec(&mut self, command: &str) -> Result<ExecOutput, DeployError>;
}

/// 按顺序执行命令序列
///
/// 每条命令执行前检查取消标志；任何一条命令退出非零即整体失败。
pub fn run_sequence(
    exec: &mut dyn CommandExec,
    commands: &[String],
    cancel: &CancelFlag,
) -> Result<(), DeployError> {
    for command in commands {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        debug!("执行远程命令: {}", command);
        let output = exec.exec(command)?;
        if output.exit_code != 0 {
            return Err(DeployError::CommandFailed {
                command: command.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
    }
    Ok(())
}

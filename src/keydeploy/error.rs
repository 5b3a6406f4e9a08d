//! 部署错误类型
//!
//! 策略内部的所有错误都会被捕获并转换为 `StrategyResult`，
//! 不会穿透到编排器之外；唯一的硬错误是启动前的输入校验失败。

use thiserror::Error;

/// 密钥部署错误
#[derive(Debug, Error)]
pub enum DeployError {
    /// 本地工具或库不可用，策略跳过（不计为失败尝试）
    #[error("本地环境缺少 {0}")]
    PreconditionUnavailable(String),

    /// 远程主机拒绝了提供的凭据
    #[error("SSH 认证失败: {0}")]
    AuthenticationRejected(String),

    /// 幂等命令序列中某条命令返回非零退出码
    #[error("命令执行失败: {command} (退出码 {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// 网络操作超过固定时限
    #[error("操作超时 ({0} 秒)")]
    Timeout(u64),

    /// 调用方请求取消
    #[error("部署已取消")]
    Cancelled,

    /// 启动前输入校验失败（主机/用户名/密码/密钥为空）
    #[error("输入无效: {0}")]
    InvalidInput(String),

    /// 其他 I/O 或会话错误
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for DeployError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut || e.kind() == std::io::ErrorKind::WouldBlock {
            DeployError::Timeout(super::ATTEMPT_TIMEOUT_SECS)
        } else {
            DeployError::Other(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let e = DeployError::CommandFailed {
            command: "chmod 600 ~/.ssh/authorized_keys".to_string(),
            exit_code: 1,
            stderr: "Operation not permitted".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("chmod 600"));
        assert!(msg.contains("退出码 1"));
        assert!(msg.contains("Operation not permitted"));
    }

    #[test]
    fn test_timeout_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let e: DeployError = io.into();
        assert!(matches!(e, DeployError::Timeout(_)));
    }
}

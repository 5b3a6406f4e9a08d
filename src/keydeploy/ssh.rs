//! SSH 库会话
//!
//! 基于 ssh2 的密码认证会话，为 LibSsh 策略提供逐条命令执行能力。
//!
//! 注意: 会话自动信任未知主机密钥，这是为首次部署的便利性做出的
//! 已知取舍；加固环境应改为校验 known_hosts。

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ssh2::Session;
use tracing::{debug, info};

use super::error::DeployError;
use super::params::ConnectionParams;
use super::runner::{CommandExec, ExecOutput};
use super::ATTEMPT_TIMEOUT_SECS;

/// ssh2 会话包装
pub struct SshSession {
    session: Session,
}

impl SshSession {
    /// 建立密码认证的 SSH 连接
    ///
    /// TCP 连接、握手与后续所有通道操作都受固定超时约束。
    pub fn connect(params: &ConnectionParams) -> Result<Self, DeployError> {
        info!(
            "连接到 {}@{}:{}...",
            params.username, params.host, params.port
        );

        let timeout = Duration::from_secs(ATTEMPT_TIMEOUT_SECS);
        let addr = (params.host.as_str(), params.port)
            .to_socket_addrs()
            .map_err(|e| DeployError::Other(format!("无法解析主机地址: {}", e)))?
            .next()
            .ok_or_else(|| DeployError::Other("主机地址无解析结果".to_string()))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)?;
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;

        let mut session = Session::new().map_err(|e| DeployError::Other(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(ATTEMPT_TIMEOUT_SECS as u32 * 1000);
        session
            .handshake()
            .map_err(|e| DeployError::Other(format!("SSH 握手失败: {}", e)))?;

        session
            .userauth_password(&params.username, params.password.as_str())
            .map_err(|e| DeployError::AuthenticationRejected(e.to_string()))?;

        if !session.authenticated() {
            return Err(DeployError::AuthenticationRejected(
                "服务器拒绝了密码认证".to_string(),
            ));
        }

        debug!("SSH 会话建立成功");
        Ok(Self { session })
    }
}

impl CommandExec for SshSession {
    fn exec(&mut self, command: &str) -> Result<ExecOutput, DeployError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| DeployError::Other(e.to_string()))?;
        channel
            .exec(command)
            .map_err(|e| DeployError::Other(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        channel.read_to_string(&mut stdout)?;
        channel.stderr().read_to_string(&mut stderr)?;
        channel
            .wait_close()
            .map_err(|e| DeployError::Other(e.to_string()))?;

        let exit_code = channel
            .exit_status()
            .map_err(|e| DeployError::Other(e.to_string()))?;

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

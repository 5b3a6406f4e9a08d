//! 部署策略
//!
//! 四种互相独立的公钥安装机制，按固定优先级依次尝试：
//!
//! 1. `SshCopyId` - 本机的 ssh-copy-id 工具
//! 2. `Sshpass` - sshpass 非交互传递密码 + 单次 ssh 调用
//! 3. `LibSsh` - ssh2 库会话逐条执行命令（需 libssh feature）
//! 4. `Manual` - 生成手动操作说明，永远可用，作为终点
//!
//! 策略内部的所有错误都被捕获并转换为 `StrategyResult`，
//! 不会作为未捕获故障穿透到编排器。

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use super::error::DeployError;
use super::params::{CancelFlag, ConnectionParams, KeyMaterial, ProgressSink, StrategyResult};
use super::script;
use super::ATTEMPT_TIMEOUT_SECS;

/// 传给 askpass 垫片的密码环境变量，仅在子进程环境中存在
const ASKPASS_PASSWORD_ENV: &str = "SSHTM_ASKPASS_PASSWORD";

/// 一次策略尝试的上下文
pub struct AttemptCx<'a> {
    pub params: &'a ConnectionParams,
    pub key: &'a KeyMaterial,
    pub progress: &'a ProgressSink,
    pub cancel: &'a CancelFlag,
}

/// 部署策略接口
///
/// 扁平的值列表实现同一接口，顺序由编排器的列表显式给出。
pub trait DeployStrategy: Send {
    /// 策略名称（用于进度与结果文本）
    fn name(&self) -> &'static str;

    /// 前置条件检查，返回 Err(原因) 表示策略不可用、应跳过
    fn preflight(&self) -> Result<(), String>;

    /// 执行一次尝试
    fn attempt(&self, cx: &AttemptCx<'_>) -> StrategyResult;

    /// 终点策略：产出的 detail 直接成为 Exhausted 终态的内容
    fn terminal(&self) -> bool {
        false
    }
}

/// 检查本机 PATH 上是否存在指定工具
fn tool_available(tool: &str) -> bool {
    Command::new("which")
        .arg(tool)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// 运行子进程，轮询取消标志并施加固定超时
///
/// 取消或超时都会杀死子进程；正常退出后收集 stdout/stderr。
fn run_child(cmd: Command, cancel: &CancelFlag) -> Result<std::process::Output, DeployError> {
    run_child_with_timeout(cmd, cancel, Duration::from_secs(ATTEMPT_TIMEOUT_SECS))
}

fn run_child_with_timeout(
    mut cmd: Command,
    cancel: &CancelFlag,
    timeout: Duration,
) -> Result<std::process::Output, DeployError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| DeployError::Other(format!("无法启动子进程: {}", e)))?;

    // 后台线程边跑边排空管道，输出超过管道缓冲区的子进程不会卡死
    let stdout_reader = drain_pipe(child.stdout.take());
    let stderr_reader = drain_pipe(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DeployError::Cancelled);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DeployError::Timeout(timeout.as_secs()));
        }
        std::thread::sleep(Duration::from_millis(100));
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(std::process::Output {
        status,
        stdout,
        stderr,
    })
}

/// 把子进程管道读到结束（管道句柄随子进程退出或被杀关闭）
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// 公共 ssh 选项：首次部署场景下自动信任主机密钥（已知取舍）
fn common_ssh_options(cmd: &mut Command) {
    cmd.args([
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "NumberOfPasswordPrompts=1",
    ]);
}

// ---------------------------------------------------------------------------
// SshCopyId
// ---------------------------------------------------------------------------

/// 策略 1: ssh-copy-id
///
/// 密码经由 askpass 垫片脚本转交。脚本本身不含任何机密，只回显
/// 子进程专属的环境变量，因此密码从不落盘；脚本以 0700 权限创建，
/// 无论成败都在策略返回前删除。
pub struct SshCopyId;

impl SshCopyId {
    fn run(&self, cx: &AttemptCx<'_>) -> Result<(), DeployError> {
        // 公钥内容写入临时 .pub 文件，除非调用方给了身份文件提示
        let mut key_file = tempfile::Builder::new()
            .prefix("sshtm-key-")
            .suffix(".pub")
            .tempfile()?;
        writeln!(key_file, "{}", cx.key.public_key.trim())?;
        key_file.flush()?;

        let identity = match &cx.key.private_key_path {
            Some(hint) => hint.clone(),
            None => key_file.path().to_path_buf(),
        };

        let shim = write_askpass_shim()?;

        let mut cmd = Command::new("ssh-copy-id");
        cmd.arg("-p").arg(cx.params.port.to_string());
        common_ssh_options(&mut cmd);
        cmd.arg("-i").arg(&identity);
        cmd.arg(cx.params.destination());
        cmd.env("SSH_ASKPASS", shim.path())
            .env("SSH_ASKPASS_REQUIRE", "force")
            .env("DISPLAY", ":0") // 旧版 OpenSSH 只认 DISPLAY + 无终端的组合
            .env(ASKPASS_PASSWORD_ENV, cx.params.password.as_str());

        let output = run_child(cmd, cx.cancel)?;
        // shim 与临时公钥文件在此作用域结束时删除（含错误路径）
        if output.status.success() {
            Ok(())
        } else {
            Err(DeployError::CommandFailed {
                command: "ssh-copy-id".to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// 创建 askpass 垫片脚本（0700，唯一命名，自动删除）
fn write_askpass_shim() -> Result<tempfile::NamedTempFile, DeployError> {
    let mut shim = tempfile::Builder::new()
        .prefix("sshtm-askpass-")
        .suffix(".sh")
        .tempfile()?;
    shim.write_all(
        format!("#!/bin/sh\nprintf '%s\\n' \"${}\"\n", ASKPASS_PASSWORD_ENV).as_bytes(),
    )?;
    shim.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(shim.path(), std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(shim)
}

impl DeployStrategy for SshCopyId {
    fn name(&self) -> &'static str {
        "ssh-copy-id"
    }

    fn preflight(&self) -> Result<(), String> {
        if tool_available("ssh-copy-id") {
            Ok(())
        } else {
            Err("本机无 ssh-copy-id 工具".to_string())
        }
    }

    fn attempt(&self, cx: &AttemptCx<'_>) -> StrategyResult {
        cx.progress.emit("通过 ssh-copy-id 部署公钥...");
        match self.run(cx) {
            Ok(()) => StrategyResult::succeeded("ssh-copy-id 部署完成"),
            Err(e) => StrategyResult::failed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Sshpass
// ---------------------------------------------------------------------------

/// 策略 2: sshpass + ssh
///
/// 幂等命令序列合并为单条 shell 调用一次执行；密码通过 `sshpass -e`
/// 的 SSHPASS 环境变量转交，只存在于子进程环境，不出现在 argv。
pub struct Sshpass;

impl Sshpass {
    fn run(&self, cx: &AttemptCx<'_>) -> Result<(), DeployError> {
        let mut cmd = Command::new("sshpass");
        cmd.arg("-e").arg("ssh");
        cmd.arg("-p").arg(cx.params.port.to_string());
        common_ssh_options(&mut cmd);
        cmd.arg(cx.params.destination());
        cmd.arg(script::install_command_line(cx.key));
        cmd.env("SSHPASS", cx.params.password.as_str());

        let output = run_child(cmd, cx.cancel)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DeployError::CommandFailed {
                command: "sshpass ssh".to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl DeployStrategy for Sshpass {
    fn name(&self) -> &'static str {
        "sshpass"
    }

    fn preflight(&self) -> Result<(), String> {
        if tool_available("sshpass") {
            Ok(())
        } else {
            Err("本机无 sshpass 工具".to_string())
        }
    }

    fn attempt(&self, cx: &AttemptCx<'_>) -> StrategyResult {
        cx.progress.emit("通过 sshpass 部署公钥...");
        match self.run(cx) {
            Ok(()) => StrategyResult::succeeded("sshpass 部署完成"),
            Err(e) => StrategyResult::failed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// LibSsh
// ---------------------------------------------------------------------------

/// 策略 3: ssh2 库会话
///
/// 建立密码认证会话后逐条执行幂等序列，任何一条命令非零退出
/// 即判定整个策略失败。
pub struct LibSsh;

impl LibSsh {
    #[cfg(feature = "libssh")]
    fn run(&self, cx: &AttemptCx<'_>) -> Result<(), DeployError> {
        use super::runner;
        use super::ssh::SshSession;

        let mut session = SshSession::connect(cx.params)?;
        cx.progress.emit("会话已建立，执行安装命令...");
        let commands = script::install_commands(cx.key);
        runner::run_sequence(&mut session, &commands, cx.cancel)
    }
}

impl DeployStrategy for LibSsh {
    fn name(&self) -> &'static str {
        "ssh2"
    }

    fn preflight(&self) -> Result<(), String> {
        if cfg!(feature = "libssh") {
            Ok(())
        } else {
            Err("编译时未启用 libssh feature".to_string())
        }
    }

    #[cfg(feature = "libssh")]
    fn attempt(&self, cx: &AttemptCx<'_>) -> StrategyResult {
        cx.progress.emit("通过 ssh2 库会话部署公钥...");
        match self.run(cx) {
            Ok(()) => StrategyResult::succeeded("ssh2 会话部署完成"),
            Err(e) => StrategyResult::failed(e.to_string()),
        }
    }

    #[cfg(not(feature = "libssh"))]
    fn attempt(&self, _cx: &AttemptCx<'_>) -> StrategyResult {
        StrategyResult::skipped("编译时未启用 libssh feature")
    }
}

// ---------------------------------------------------------------------------
// Manual
// ---------------------------------------------------------------------------

/// 策略 4: 手动操作说明
///
/// 永远可用，从不远程执行任何内容；产出的说明文本由编排器
/// 作为 Exhausted 终态交付。
pub struct Manual;

impl DeployStrategy for Manual {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn preflight(&self) -> Result<(), String> {
        Ok(())
    }

    fn attempt(&self, cx: &AttemptCx<'_>) -> StrategyResult {
        debug!("自动策略均未成功，生成手动操作说明");
        cx.progress.emit("生成手动部署说明...");
        StrategyResult::succeeded(script::manual_instructions(cx.params, cx.key))
    }

    fn terminal(&self) -> bool {
        true
    }
}

/// 按固定优先级构造策略列表
pub fn default_strategies() -> Vec<Box<dyn DeployStrategy>> {
    vec![
        Box::new(SshCopyId),
        Box::new(Sshpass),
        Box::new(LibSsh),
        Box::new(Manual),
    ]
}

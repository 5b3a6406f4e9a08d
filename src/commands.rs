//! Command handlers for sshtm utility commands
//!
//! This module contains handlers for key deployment and config commands.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::Config;
use crate::keydeploy::{self, ConnectionParams, DeployEvent, KeyMaterial};

/// Initialize logging with the specified verbosity level
pub fn init_logging(verbose: u8) {
    use tracing::Level;
    use std::str::FromStr;

    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let level = Level::from_str(log_level).unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .init();
}

/// Handle the deploy-key command
pub async fn handle_deploy_key(
    config: &Config,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    key_path: Option<String>,
) -> Result<()> {
    let host = host
        .or_else(|| config.profile.host.clone())
        .ok_or_else(|| anyhow!("未指定目标主机 (--host 或配置档案)"))?;
    let port = port.unwrap_or(config.profile.port);
    let username = username
        .or_else(|| config.profile.username.clone())
        .ok_or_else(|| anyhow!("未指定用户名 (--username 或配置档案)"))?;

    let password = match password {
        Some(p) => p,
        None => rpassword::prompt_password(format!("{}@{} 的密码: ", username, host))?,
    };

    let key_path = key_path
        .map(PathBuf::from)
        .or_else(|| config.profile.public_key_path.clone().map(PathBuf::from))
        .or_else(detect_public_key)
        .ok_or_else(|| anyhow!("未找到公钥文件，请用 --key 指定"))?;

    let key = KeyMaterial::load(&key_path)?;
    let params = ConnectionParams::new(host, port, username, password);

    let mut task = keydeploy::deploy(params, key)?;
    let cancel = task.cancel_handle();

    loop {
        tokio::select! {
            event = task.next_event() => {
                match event {
                    Some(DeployEvent::Progress(line)) => println!("  {}", line),
                    Some(DeployEvent::Done(outcome)) => {
                        println!();
                        if outcome.succeeded {
                            println!("✅ {}", outcome.message);
                        } else if outcome.cancelled {
                            println!("⚠ {}", outcome.message);
                        } else {
                            // 自动策略耗尽，终态即手动操作说明
                            println!("❌ 自动部署未成功");
                            println!();
                            println!("{}", outcome.message);
                        }
                        return Ok(());
                    }
                    None => return Err(anyhow!("部署任务异常终止")),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("收到中断信号，取消部署...");
                cancel.cancel();
            }
        }
    }
}

/// Handle config generation command
pub fn handle_generate_config(path: Option<String>) -> Result<()> {
    let path = path.unwrap_or_else(|| "config.toml".to_string());
    let config = Config::default();
    config.save(&path)?;
    println!("配置文件已生成: {}", path);
    Ok(())
}

/// 自动探测本地公钥文件
///
/// 按优先级尝试 ~/.ssh 下的常见公钥
fn detect_public_key() -> Option<PathBuf> {
    let ssh_dir = dirs::home_dir()?.join(".ssh");
    let key_names = ["id_ed25519.pub", "id_rsa.pub", "id_ecdsa.pub"];

    for name in key_names {
        let path = ssh_dir.join(name);
        if path.exists() {
            debug!("检测到公钥文件: {}", path.display());
            return Some(path);
        }
    }
    None
}

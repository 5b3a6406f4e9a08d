//! 配置管理模块
//!
//! 负责加载部署命令的连接档案（主机/端口/用户名默认值）。
//! 档案只是输入来源，部署核心不依赖配置存储。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use anyhow::Result;

/// 应用程序配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// 连接档案默认值
    #[serde(default)]
    pub profile: ProfileConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 连接档案
///
/// 通常由隧道定义预填，用户在部署时可逐项覆盖。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    /// 默认主机
    #[serde(default)]
    pub host: Option<String>,
    /// 默认 SSH 端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 默认用户名
    #[serde(default)]
    pub username: Option<String>,
    /// 默认公钥文件路径 (None = 自动探测 ~/.ssh 下的常见公钥)
    #[serde(default)]
    pub public_key_path: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            profile: ProfileConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            host: None,
            port: 22,
            username: None,
            public_key_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// 从文件加载配置
    ///
    /// 如果文件不存在或解析失败，返回默认配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!("配置文件不存在: {:?}, 使用默认配置", path);
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("配置文件解析失败: {}", e))?;

        tracing::info!("配置加载成功: {:?}", path);
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// 获取配置文件路径
    ///
    /// 优先级: 命令行指定 > 当前目录 > 用户主目录
    pub fn get_config_path(cli_path: Option<&str>) -> String {
        if let Some(p) = cli_path {
            return p.to_string();
        }

        if Path::new("config.toml").exists() {
            return "config.toml".to_string();
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config/sshtm/config.toml");
            if config_path.exists() {
                return config_path.to_string_lossy().to_string();
            }
        }

        "config.toml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.profile.port, 22);
        assert_eq!(config.logging.level, "info");
        assert!(config.profile.host.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let _parsed: Config = toml::from_str(&toml_str).unwrap();
    }

    #[test]
    fn test_partial_config_parses() {
        let config: Config = toml::from_str(
            "[profile]\nhost = \"10.0.0.5\"\nusername = \"alice\"\n",
        )
        .unwrap();
        assert_eq!(config.profile.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.profile.port, 22);
    }
}

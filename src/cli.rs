//! CLI argument definitions for sshtm
//!
//! This module contains all command-line argument parsing logic.

use clap::{Parser, Subcommand};

/// sshtm - 命令行参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    /// 日志级别 (0=warn, 1=info, 2=debug, 3=trace)
    #[arg(short, long)]
    pub verbose: Option<u8>,
}

/// 子命令
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 将 SSH 公钥部署到远程服务器
    DeployKey {
        /// 目标主机 (未指定时取配置档案的默认值)
        #[arg(long)]
        host: Option<String>,

        /// SSH 端口
        #[arg(short, long)]
        port: Option<u16>,

        /// 用户名
        #[arg(short, long)]
        username: Option<String>,

        /// 密码 (未指定时交互式输入；也可通过 SSHTM_PASSWORD 环境变量传入)
        #[arg(long, env = "SSHTM_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// 公钥文件路径 (未指定时自动探测 ~/.ssh 下的常见公钥)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// 生成配置文件
    Config {
        /// 配置文件路径
        #[arg(short, long)]
        path: Option<String>,
    },
}

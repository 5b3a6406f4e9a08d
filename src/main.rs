//! sshtm - SSH 隧道管理器配套工具
//!
//! 主入口程序

use anyhow::Result;
use clap::Parser;

use sshtm::cli::{Args, Commands};
use sshtm::commands;
use sshtm::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    commands::init_logging(args.verbose.unwrap_or(1));

    let config_path = Config::get_config_path(args.config.as_deref());
    let config = Config::load(&config_path)?;

    match args.command {
        Some(Commands::DeployKey {
            host,
            port,
            username,
            password,
            key,
        }) => {
            commands::handle_deploy_key(&config, host, port, username, password, key).await?;
        }
        Some(Commands::Config { path }) => {
            commands::handle_generate_config(path)?;
        }
        None => {
            // 无子命令时打印帮助
            use clap::CommandFactory;
            Args::command().print_help()?;
        }
    }

    Ok(())
}

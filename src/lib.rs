//! sshtm - SSH 隧道管理器配套工具库
//!
//! 提供 SSH 公钥到远程服务器的自动部署功能

pub mod cli;
pub mod commands;
pub mod config;

// 公钥部署模块
pub mod keydeploy;

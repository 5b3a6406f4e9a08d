//! 幂等远程命令序列
//!
//! 固定的四步操作：确保目录、追加公钥、修正权限、排序去重后原子替换。
//! 序列可以安全地重复执行：重复部署同一公钥不会产生重复的
//! `authorized_keys` 条目，也不会破坏其他身份已有的密钥行。

use super::params::{ConnectionParams, KeyMaterial};

/// 手动操作说明的固定标记，调用方据此识别终态中的说明文本
pub const MANUAL_MARKER: &str = "手动部署 SSH 密钥步骤";

/// 单引号 shell 转义（'...' 内的 ' 替换为 '\''）
pub fn shell_escape_single_quoted(s: &str) -> String {
    s.replace('\'', "'\\''")
}

/// 构建幂等安装命令序列
///
/// 1. 确保 `~/.ssh` 存在且权限 0700
/// 2. 追加公钥行到 `~/.ssh/authorized_keys`
/// 3. 将 `authorized_keys` 权限设为 0600
/// 4. 排序去重写入临时路径，再原子地 mv 覆盖原文件
pub fn install_commands(key: &KeyMaterial) -> Vec<String> {
    let escaped = shell_escape_single_quoted(key.public_key.trim());
    vec![
        "mkdir -p ~/.ssh && chmod 700 ~/.ssh".to_string(),
        format!("echo '{}' >> ~/.ssh/authorized_keys", escaped),
        "chmod 600 ~/.ssh/authorized_keys".to_string(),
        "sort -u ~/.ssh/authorized_keys > ~/.ssh/authorized_keys.tmp \
         && mv ~/.ssh/authorized_keys.tmp ~/.ssh/authorized_keys"
            .to_string(),
    ]
}

/// 将命令序列合并为单条 shell 调用（用于 sshpass 一次性执行）
pub fn install_command_line(key: &KeyMaterial) -> String {
    install_commands(key).join(" && ")
}

/// 生成手动操作说明文本
///
/// 逐条复现幂等序列，代入实际的主机/端口/用户名/公钥，不远程执行任何内容。
pub fn manual_instructions(params: &ConnectionParams, key: &KeyMaterial) -> String {
    let escaped = shell_escape_single_quoted(key.public_key.trim());
    format!(
        "{marker}\n\
         \n\
         自动部署未能完成，请按以下步骤手动安装公钥:\n\
         \n\
         1. 通过 SSH 连接到服务器:\n\
         \x20  ssh -p {port} {user}@{host}\n\
         \n\
         2. 创建 .ssh 目录 (如果不存在):\n\
         \x20  mkdir -p ~/.ssh\n\
         \x20  chmod 700 ~/.ssh\n\
         \n\
         3. 将公钥追加到 authorized_keys:\n\
         \x20  echo '{key}' >> ~/.ssh/authorized_keys\n\
         \x20  chmod 600 ~/.ssh/authorized_keys\n\
         \n\
         4. 去除重复条目:\n\
         \x20  sort -u ~/.ssh/authorized_keys > ~/.ssh/authorized_keys.tmp\n\
         \x20  mv ~/.ssh/authorized_keys.tmp ~/.ssh/authorized_keys\n\
         \n\
         完成后即可使用该密钥登录。",
        marker = MANUAL_MARKER,
        port = params.port,
        user = params.username,
        host = params.host,
        key = escaped,
    )
}

//! 一次性发送 - 不经过目录监视

use std::path::Path;

use anyhow::{Result, anyhow};
use dropwatch_core::watch::parse_selection;
use dropwatch_core::{Dispatcher, Settings, TransferClient, TransferReport};
use tokio::io::BufReader;

/// 发送目标
pub enum Target {
    /// 直接指定地址
    Host(String),
    /// 配置中主机列表的序号（从 1 开始）
    Index(usize),
    /// 交互式选择
    Prompt,
}

pub async fn send_file(settings: &Settings, file: &Path, target: Target) -> Result<TransferReport> {
    let client = TransferClient::new(settings);

    let host = match target {
        Target::Host(host) => host,
        Target::Index(index) => {
            let i = parse_selection(&index.to_string(), settings.hosts.len()).ok_or_else(|| {
                anyhow!(
                    "invalid index {}, expected 1..={}",
                    index,
                    settings.hosts.len()
                )
            })?;
            settings.hosts[i].clone()
        }
        Target::Prompt => {
            let mut dispatcher = Dispatcher::new(
                settings,
                client.clone(),
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
            );
            let i = dispatcher.select_host().await?;
            settings.hosts[i].clone()
        }
    };

    println!("   目标主机: {}", host);
    Ok(client.send_file(&host, file).await?)
}

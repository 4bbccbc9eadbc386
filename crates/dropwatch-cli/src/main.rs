//! Dropwatch CLI
//!
//! 命令行工具：一次性发送文件、查看和初始化配置

mod client;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dropwatch_core::Settings;
use tracing_subscriber::EnvFilter;

use client::Target;

#[derive(Parser)]
#[command(name = "dropwatch", version, about = "Dropwatch - 局域网文件推送工具")]
struct Cli {
    /// 配置文件路径 (默认: <config_dir>/dropwatch/settings.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 发送单个文件
    Send {
        /// 要发送的文件路径
        file: PathBuf,
        /// 目标地址 host:port (不指定则交互式选择)
        #[arg(long, conflicts_with = "index")]
        host: Option<String>,
        /// 配置中主机列表的序号 (从 1 开始)
        #[arg(short, long)]
        index: Option<usize>,
    },
    /// 配置文件管理
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// 显示配置文件路径
    Path,
    /// 显示当前生效的配置
    Show,
    /// 写入默认配置
    Init {
        /// 覆盖已有文件
        #[arg(short, long)]
        force: bool,
    },
}

/// 初始化日志：显示 dropwatch-core 的进度和成功消息
fn init_logging() {
    // 桥接 log crate（dropwatch-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,dropwatch_core=info")),
        )
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let config_path = cli.config.unwrap_or_else(Settings::default_path);

    match cli.command {
        Commands::Send { file, host, index } => {
            let settings = Settings::load(&config_path)?;
            let target = match (host, index) {
                (Some(host), _) => Target::Host(host),
                (None, Some(index)) => Target::Index(index),
                (None, None) => Target::Prompt,
            };

            println!("📤 发送文件: {}", file.display());
            let report = client::send_file(&settings, &file, target).await?;
            println!(
                "✅ 已发送 {} ({} 字节)",
                report.file_name, report.bytes_sent
            );
        }
        Commands::Config { action } => match action {
            ConfigAction::Path => println!("{}", config_path.display()),
            ConfigAction::Show => {
                let settings = Settings::load(&config_path)?;
                print!("{}", settings.to_toml()?);
            }
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists, use --force to overwrite",
                        config_path.display()
                    );
                }
                Settings::default().save(&config_path)?;
                println!("✅ 已写入默认配置: {}", config_path.display());
            }
        },
    }

    Ok(())
}

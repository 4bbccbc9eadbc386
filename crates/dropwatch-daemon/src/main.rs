//! Dropwatch Daemon
//!
//! 常驻进程，负责：
//! - TCP 接收服务器（独立监听循环）
//! - 目录监视 + 交互式分发（终端中选择目标主机）
//!
//! 任一循环退出都视为致命错误，进程以状态码 2 结束。

mod service;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dropwatch_core::{Settings, TransferServer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dropwatch-daemon", version, about = "监视目录并把新文件推送到对端")]
struct Args {
    /// 配置文件路径 (默认: <config_dir>/dropwatch/settings.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// 覆盖配置中的监听地址
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // 桥接 log crate（dropwatch-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dropwatch_core=debug")),
        )
        .try_init();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{:#}", e);
            2
        }
    };

    // 阻塞在 stdin 上的读取线程会让运行时无法正常关闭
    std::process::exit(code);
}

async fn run(args: Args) -> Result<()> {
    let path = args.config.unwrap_or_else(Settings::default_path);
    let mut settings =
        Settings::load(&path).with_context(|| format!("failed to load settings from {path:?}"))?;
    if let Some(listen) = args.listen {
        settings.listen_addr = listen;
        settings.validate()?;
    }

    tracing::info!("Dropwatch daemon starting...");

    let server = TransferServer::bind(&settings).await?;
    let server_handle = tokio::spawn(server.run());
    let watch_handle = tokio::spawn(service::run_watch(settings));

    // 等待任一任务完成
    tokio::select! {
        res = server_handle => {
            res.context("transfer server panicked")??;
            anyhow::bail!("transfer server exited");
        }
        res = watch_handle => {
            res.context("watch pipeline panicked")??;
            anyhow::bail!("watch pipeline exited");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

//! Dropwatch Core Library
//!
//! 监视本地目录，把新文件通过 TCP 推送到操作员选择的对端；对端运行接收服务器保存文件。
//!
//! # 模块
//!
//! - **config**: 设置加载、默认模板和校验
//! - **logging**: 成功消息（✅ 前缀，按 Info 输出）
//! - **transfer**: 线路协议、发送客户端、接收服务器
//! - **watch**: 目录监视器和交互式分发器
//!
//! # 使用示例
//!
//! ## 接收文件
//!
//! ```ignore
//! use dropwatch_core::{Settings, TransferServer};
//!
//! let settings = Settings::load(&Settings::default_path())?;
//! let server = TransferServer::bind(&settings).await?;
//! tokio::spawn(server.run());
//! ```
//!
//! ## 监视并发送
//!
//! ```ignore
//! use dropwatch_core::{DirectoryWatcher, Dispatcher, TransferClient};
//! use tokio::io::{BufReader, stdin, stdout};
//!
//! let (_watcher, channels) = DirectoryWatcher::start(&settings)?;
//! let client = TransferClient::new(&settings);
//! Dispatcher::new(&settings, client, BufReader::new(stdin()), stdout())
//!     .run(channels)
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod transfer;
pub mod watch;

pub use config::Settings;
pub use error::{ConfigError, DispatchError, ProtocolError, TransferError, WatchError};

// Transfer re-exports
pub use transfer::{
    FileSender, SendState, ServerOptions, SessionStatus, TransferClient, TransferReport,
    TransferServer,
};

// Watch re-exports
pub use watch::{DirectoryWatcher, Dispatcher, WatchChannels, WatchEvent, WatchEventKind};

//! 文件传输模块
//!
//! 包含:
//! - 线路协议（长度前缀文件名 + "ok" 确认）
//! - TCP 发送客户端
//! - TCP 接收服务器

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{FileSender, SendState, TransferClient, TransferReport};
pub use protocol::{ACK, MAX_HEADER_LEN};
pub use server::{ServerOptions, SessionStatus, TransferServer};

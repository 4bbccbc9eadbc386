//! 错误类型
//!
//! 按子系统划分：配置、传输、协议、目录监视、分发。

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 配置错误（启动前致命）
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write settings file {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// 线路协议错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty header")]
    EmptyHeader,

    #[error("header is {0} bytes, limit is {limit}", limit = crate::transfer::protocol::MAX_HEADER_LEN)]
    HeaderTooLong(usize),

    #[error("header is not valid UTF-8")]
    InvalidUtf8,

    #[error("refusing unsafe file name {0:?}")]
    UnsafeName(String),

    #[error("invalid acknowledgment {0:?}")]
    BadAck([u8; 2]),
}

/// 单次传输会话的错误
///
/// 只影响所在会话，不会终止监听循环或分发循环。
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to open {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("{0:?} is not a regular file")]
    NotAFile(PathBuf),

    #[error("failed to connect to {host}: {source}")]
    Connect { host: String, source: io::Error },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("failed to create {path:?}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("no acknowledgment from peer: {0}")]
    NoAck(io::Error),

    #[error("accept failed: {0}")]
    Accept(io::Error),

    #[error("peer idle for longer than {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 目录监视错误（致命）
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch directory {0:?} does not exist or is not a directory")]
    NotADirectory(PathBuf),

    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// 分发循环错误
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("operator input closed")]
    InputClosed,

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("console i/o error: {0}")]
    Io(#[from] io::Error),
}

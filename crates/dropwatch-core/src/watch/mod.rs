//! 目录监视与分发
//!
//! 监视器在后端线程上把新文件事件放入有界队列，分发器在独立任务中逐个处理。

pub mod dispatcher;
pub mod watcher;

pub use dispatcher::{Dispatcher, parse_selection};
pub use watcher::{
    DirectoryWatcher, Disposition, EventSink, WatchChannels, WatchEvent, WatchEventKind, classify,
};

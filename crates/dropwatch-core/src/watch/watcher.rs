//! 目录监视器
//!
//! 非递归地监视单个目录，把新建或移入的普通文件送入有界队列。
//! 队列由分发器消费，操作员选择主机时监视不会停止。
//! 监视错误走单独的无界通道，不会排在未处理的事件后面。

use log::{debug, error, info, warn};

use std::path::{Path, PathBuf};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::error::WatchError;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Create,
    /// 从别处重命名进来
    MovedIn,
    Other,
}

/// 文件系统事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchEventKind::Create,
            path: path.into(),
        }
    }

    /// 一个 notify 事件可能带多个路径，逐个拆开
    ///
    /// `RenameMode::Both` 的路径依次是旧名和新名，只取新名。
    fn from_notify(mut event: Event) -> Vec<Self> {
        let kind = match event.kind {
            EventKind::Create(_) => WatchEventKind::Create,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventKind::MovedIn,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths = event.paths.pop().into_iter().collect();
                WatchEventKind::MovedIn
            }
            _ => WatchEventKind::Other,
        };
        event
            .paths
            .into_iter()
            .map(|path| Self { kind, path })
            .collect()
    }
}

/// 事件处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 新建的普通文件，交给分发器
    Dispatch,
    /// 新建的目录，暂不支持
    Directory,
    Ignore,
}

pub fn classify(event: &WatchEvent) -> Disposition {
    match event.kind {
        WatchEventKind::Create | WatchEventKind::MovedIn if event.path.is_dir() => {
            Disposition::Directory
        }
        WatchEventKind::Create | WatchEventKind::MovedIn => Disposition::Dispatch,
        WatchEventKind::Other => Disposition::Ignore,
    }
}

/// 监视器的接收端
///
/// 事件队列有界；错误通道无界，发送方从不阻塞。
#[derive(Debug)]
pub struct WatchChannels {
    pub events: mpsc::Receiver<WatchEvent>,
    pub errors: mpsc::UnboundedReceiver<WatchError>,
}

impl WatchChannels {
    /// 创建一对回调端和接收端
    pub fn new(capacity: usize) -> (EventSink, Self) {
        let (events_tx, events) = mpsc::channel(capacity.max(1));
        let (errors_tx, errors) = mpsc::unbounded_channel();
        (
            EventSink {
                events: events_tx,
                errors: errors_tx,
                last_moved_in: None,
            },
            Self { events, errors },
        )
    }
}

/// notify 回调端，运行在监视后端自己的线程上
#[derive(Debug, Clone)]
pub struct EventSink {
    events: mpsc::Sender<WatchEvent>,
    errors: mpsc::UnboundedSender<WatchError>,
    /// inotify 对同一次移入会先后报告 `To` 和 `Both`，只处理一次
    last_moved_in: Option<PathBuf>,
}

impl EventSink {

    /// 处理一个 notify 回调
    ///
    /// 队列满时阻塞当前线程，不丢事件。不能在异步任务中调用。
    pub fn handle(&mut self, result: notify::Result<Event>) {
        match result {
            Ok(event) => {
                for event in WatchEvent::from_notify(event) {
                    if self.is_repeated_move(&event) {
                        continue;
                    }
                    match classify(&event) {
                        Disposition::Dispatch => {
                            info!("Found new file {:?}", event.path);
                            if self.events.blocking_send(event).is_err() {
                                debug!("Event queue closed, dropping event");
                                return;
                            }
                        }
                        Disposition::Directory => {
                            warn!("Directories are not supported yet: {:?}", event.path);
                        }
                        Disposition::Ignore => {}
                    }
                }
            }
            Err(e) => {
                error!("Watcher error: {}", e);
                if self.errors.send(e.into()).is_err() {
                    debug!("Error channel closed, dropping watcher error");
                }
            }
        }
    }
}

impl EventSink {
    fn is_repeated_move(&mut self, event: &WatchEvent) -> bool {
        if event.kind != WatchEventKind::MovedIn {
            self.last_moved_in = None;
            return false;
        }
        if self.last_moved_in.as_ref() == Some(&event.path) {
            return true;
        }
        self.last_moved_in = Some(event.path.clone());
        false
    }
}

/// 目录监视器
///
/// drop 后停止监视，队列随之关闭。
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl DirectoryWatcher {
    /// 按配置开始监视
    pub fn start(settings: &Settings) -> Result<(Self, WatchChannels), WatchError> {
        Self::start_with(&settings.watch_path, settings.event_queue_capacity)
    }

    pub fn start_with(
        path: &Path,
        capacity: usize,
    ) -> Result<(Self, WatchChannels), WatchError> {
        if !path.is_dir() {
            return Err(WatchError::NotADirectory(path.to_path_buf()));
        }

        let (mut sink, channels) = WatchChannels::new(capacity);

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| sink.handle(result),
            Config::default(),
        )?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        info!("Start watching {:?}", path);

        Ok((
            Self {
                _watcher: watcher,
                path: path.to_path_buf(),
            },
            channels,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

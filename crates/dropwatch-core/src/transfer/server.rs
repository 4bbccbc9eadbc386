//! TCP 接收服务器
//!
//! 每个连接一个独立任务，每个任务最多写出一个文件。
//!
//! # 会话流程
//!
//! 1. 读取带长度前缀的文件名并校验（拒绝路径分隔符、`..` 等）
//! 2. 在接收目录中创建临时文件 `.<uuid>.part`
//! 3. 回复 "ok"
//! 4. 把剩余字节写入临时文件直到对端关闭
//! 5. 刷盘后重命名为 `<receive_dir>/<name>`
//!
//! 任意一步失败都会删除临时文件，不影响监听循环和其他会话。
//! 对端停住超过空闲超时，会话同样按失败处理。

use log::{debug, error, info, warn};

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};

use crate::config::Settings;
use crate::error::TransferError;
use crate::logging;
use crate::transfer::protocol;

/// 会话状态通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Accepted {
        peer: SocketAddr,
    },
    Completed {
        peer: SocketAddr,
        path: PathBuf,
        bytes: u64,
    },
    Failed {
        peer: SocketAddr,
        reason: String,
    },
    /// 达到并发上限，连接被直接关闭
    Rejected {
        peer: SocketAddr,
    },
}

/// 服务器选项
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub idle_timeout: Option<Duration>,
    pub max_sessions: Option<usize>,
}

impl From<&Settings> for ServerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            idle_timeout: settings.idle_timeout(),
            max_sessions: settings.session_limit(),
        }
    }
}

struct SessionContext {
    receive_dir: PathBuf,
    idle_timeout: Option<Duration>,
    status_tx: broadcast::Sender<SessionStatus>,
}

/// 传输服务器
pub struct TransferServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    admission: Option<Arc<Semaphore>>,
}

impl TransferServer {
    /// 按配置绑定监听地址
    pub async fn bind(settings: &Settings) -> Result<Self, TransferError> {
        Self::bind_with(
            &settings.listen_addr,
            settings.receive_path.clone(),
            ServerOptions::from(settings),
        )
        .await
    }

    pub async fn bind_with(
        addr: &str,
        receive_dir: PathBuf,
        options: ServerOptions,
    ) -> Result<Self, TransferError> {
        fs::create_dir_all(&receive_dir)
            .await
            .map_err(|source| TransferError::Create {
                path: receive_dir.clone(),
                source,
            })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransferError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let (status_tx, _) = broadcast::channel(64);

        info!(
            "Transfer server listening on {}, saving to {:?}",
            listener.local_addr()?,
            receive_dir
        );

        Ok(Self {
            listener,
            ctx: Arc::new(SessionContext {
                receive_dir,
                idle_timeout: options.idle_timeout,
                status_tx,
            }),
            admission: options.max_sessions.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 订阅会话状态更新
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatus> {
        self.ctx.status_tx.subscribe()
    }

    /// 监听循环
    ///
    /// 临时性的 accept 错误记录后继续；其他错误结束循环并返回。
    pub async fn run(self) -> Result<(), TransferError> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) if is_transient(&e) => {
                    warn!("Transient accept error: {}", e);
                    if is_fd_exhaustion(&e) {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    continue;
                }
                Err(e) => {
                    error!("Network error: {}", e);
                    return Err(TransferError::Accept(e));
                }
            };

            let permit = match self.admit() {
                Ok(permit) => permit,
                Err(()) => {
                    warn!("Session limit reached, rejecting {}", peer);
                    let _ = self.ctx.status_tx.send(SessionStatus::Rejected { peer });
                    drop(stream);
                    continue;
                }
            };

            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                handle_connection(stream, peer, ctx).await;
                drop(permit);
            });
        }
    }

    fn admit(&self) -> Result<Option<OwnedSemaphorePermit>, ()> {
        match &self.admission {
            Some(sem) => sem.clone().try_acquire_owned().map(Some).map_err(|_| ()),
            None => Ok(None),
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) {
    debug!("Accepted connection from {}", peer);
    let _ = ctx.status_tx.send(SessionStatus::Accepted { peer });

    let result = receive(stream, &ctx.receive_dir, ctx.idle_timeout).await;

    let status = match result {
        Ok((path, bytes)) => {
            logging::success(format!("Received {:?} ({}B) from {}", path, bytes, peer));
            SessionStatus::Completed { peer, path, bytes }
        }
        Err(e) => {
            error!("Session from {} failed: {}", peer, e);
            SessionStatus::Failed {
                peer,
                reason: e.to_string(),
            }
        }
    };
    let _ = ctx.status_tx.send(status);
}

/// 单个接收会话
async fn receive(
    mut stream: TcpStream,
    receive_dir: &Path,
    idle: Option<Duration>,
) -> Result<(PathBuf, u64), TransferError> {
    let header = protocol::within_idle(idle, protocol::read_header(&mut stream)).await?;
    let name = protocol::validate_file_name(&header)?;

    let target = receive_dir.join(name);
    let part = PartFile::create(receive_dir).await?;

    protocol::within_idle(idle, async {
        stream.write_all(protocol::ACK).await?;
        stream.flush().await?;
        Ok::<_, TransferError>(())
    })
    .await?;

    part.fill_from(&mut stream, &target, idle).await
}

/// 接收中的临时文件，未完成时在 drop 中删除
///
/// 文件名只由 uuid 组成，不受目标文件名长度影响。
struct PartFile {
    path: PathBuf,
    file: Option<File>,
    published: bool,
}

impl PartFile {
    async fn create(dir: &Path) -> Result<Self, TransferError> {
        let path = dir.join(format!(".{}.part", uuid::Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| TransferError::Create {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Some(file),
            published: false,
        })
    }

    async fn fill_from(
        mut self,
        stream: &mut TcpStream,
        target: &Path,
        idle: Option<Duration>,
    ) -> Result<(PathBuf, u64), TransferError> {
        let Some(mut file) = self.file.take() else {
            return Err(io::Error::other("part file already consumed").into());
        };

        let bytes = protocol::copy_with_idle(stream, &mut file, idle).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&self.path, target).await?;
        self.published = true;
        Ok((target.to_path_buf(), bytes))
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.published {
            drop(self.file.take());
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!("Could not remove {:?}: {}", self.path, e);
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_fd_exhaustion(e)
}

fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(code) if code == libc::EMFILE || code == libc::ENFILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_error_classification() {
        assert!(is_transient(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_fd_exhaustion(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_transient(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }

    #[tokio::test]
    async fn test_part_file_removed_when_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let part = PartFile::create(dir.path()).await.unwrap();
        let path = part.path.clone();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with('.') && name.ends_with(".part"), "{name}");
        // "." + 36 字符 uuid + ".part"
        assert_eq!(name.len(), 42);

        drop(part);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let first = TransferServer::bind_with(
            "127.0.0.1:0",
            dir.path().to_path_buf(),
            ServerOptions::default(),
        )
        .await
        .unwrap();
        let addr = first.local_addr().unwrap().to_string();

        let second =
            TransferServer::bind_with(&addr, dir.path().to_path_buf(), ServerOptions::default())
                .await;
        assert!(matches!(second, Err(TransferError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_creates_missing_receive_dir() {
        let dir = tempfile::tempdir().unwrap();
        let receive = dir.path().join("incoming");
        let _server =
            TransferServer::bind_with("127.0.0.1:0", receive.clone(), ServerOptions::default())
                .await
                .unwrap();
        assert!(receive.is_dir());
    }
}

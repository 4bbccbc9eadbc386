//! 发送客户端
//!
//! 一次连接推送一个文件：
//! 打开文件 → 拨号 → 发送文件名 → 等待 "ok" → 发送内容 → 关闭。
//! 不重试，不续传。

use log::{debug, error, info};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::config::Settings;
use crate::error::TransferError;
use crate::logging;
use crate::transfer::protocol;

/// 发送会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Connected,
    HeaderSent,
    AwaitingAck,
    Streaming,
    Closed,
    Aborted,
}

/// 一次成功发送的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub file_name: String,
    pub bytes_sent: u64,
}

/// 把文件发送到指定主机
///
/// 分发器通过这个 trait 调用发送端，测试中可以替换。
#[async_trait]
pub trait FileSender: Send + Sync {
    async fn send(&self, host: &str, path: &Path) -> Result<TransferReport, TransferError>;
}

#[async_trait]
impl<T: FileSender + ?Sized> FileSender for Arc<T> {
    async fn send(&self, host: &str, path: &Path) -> Result<TransferReport, TransferError> {
        (**self).send(host, path).await
    }
}

/// TCP 发送客户端
///
/// 拨号、等待确认以及每次写入都受空闲超时约束，总时长不限。
#[derive(Debug, Clone, Default)]
pub struct TransferClient {
    idle_timeout: Option<Duration>,
}

impl TransferClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            idle_timeout: settings.idle_timeout(),
        }
    }

    pub fn with_timeout(idle_timeout: Option<Duration>) -> Self {
        Self { idle_timeout }
    }

    /// 发送单个文件
    pub async fn send_file(&self, host: &str, path: &Path) -> Result<TransferReport, TransferError> {
        let result = SendSession::new(host, path, self.idle_timeout).run().await;

        if let Err(e) = &result {
            error!("Transfer of {:?} to {} failed: {}", path, host, e);
        }
        result
    }
}

#[async_trait]
impl FileSender for TransferClient {
    async fn send(&self, host: &str, path: &Path) -> Result<TransferReport, TransferError> {
        self.send_file(host, path).await
    }
}

struct SendSession<'a> {
    host: &'a str,
    path: &'a Path,
    idle: Option<Duration>,
    state: SendState,
}

impl<'a> SendSession<'a> {
    fn new(host: &'a str, path: &'a Path, idle: Option<Duration>) -> Self {
        Self {
            host,
            path,
            idle,
            state: SendState::Idle,
        }
    }

    fn advance(&mut self, next: SendState) {
        debug!("{} -> {:?}: {:?} -> {:?}", self.host, self.path, self.state, next);
        self.state = next;
    }

    async fn run(mut self) -> Result<TransferReport, TransferError> {
        let result = self.drive().await;
        if result.is_err() {
            self.advance(SendState::Aborted);
        }
        result
    }

    async fn drive(&mut self) -> Result<TransferReport, TransferError> {
        let open_err = |source| TransferError::Open {
            path: self.path.to_path_buf(),
            source,
        };
        let mut file = File::open(self.path).await.map_err(open_err)?;
        let metadata = file.metadata().await.map_err(open_err)?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(self.path.to_path_buf()));
        }

        let file_name = protocol::header_name(self.path)?;
        info!("File name: {}; size: {}B", file_name, metadata.len());

        let host = self.host;
        let mut stream = protocol::within_idle(self.idle, async {
            TcpStream::connect(host)
                .await
                .map_err(|source| TransferError::Connect {
                    host: host.to_string(),
                    source,
                })
        })
        .await?;
        self.advance(SendState::Connected);
        logging::success(format!("Connection established to {}", self.host));

        protocol::within_idle(self.idle, protocol::write_header(&mut stream, &file_name)).await?;
        self.advance(SendState::HeaderSent);

        self.advance(SendState::AwaitingAck);
        protocol::within_idle(self.idle, protocol::read_ack(&mut stream)).await?;
        logging::success("Header acknowledged");

        self.advance(SendState::Streaming);
        let bytes_sent = protocol::copy_with_idle(&mut file, &mut stream, self.idle).await?;
        protocol::within_idle(self.idle, async {
            stream.shutdown().await.map_err(TransferError::from)
        })
        .await?;
        self.advance(SendState::Closed);
        logging::success(format!("File sent: {} ({}B)", file_name, bytes_sent));

        Ok(TransferReport {
            file_name,
            bytes_sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_missing_file_aborts_before_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let client = TransferClient::default();
        let err = client
            .send_file(&addr, Path::new("/definitely/not/here.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Open { .. }));

        // 没有任何连接进来
        let accepted =
            tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn test_directory_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let client = TransferClient::default();
        let err = client
            .send_file("127.0.0.1:1", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotAFile(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        // 绑定后立即释放，得到一个大概率无人监听的端口
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };

        let err = TransferClient::default()
            .send_file(&addr, &path)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_bad_ack_sends_no_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.bin");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let name = protocol::read_header(&mut stream).await.unwrap();
            stream.write_all(b"no").await.unwrap();
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).await.unwrap();
            (name, rest)
        });

        let err = TransferClient::default()
            .send_file(&addr, &path)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Protocol(ProtocolError::BadAck(_))
        ));

        let (name, rest) = peer.await.unwrap();
        assert_eq!(name, "secret.bin");
        assert!(rest.is_empty(), "payload leaked: {} bytes", rest.len());
    }

    #[tokio::test]
    async fn test_missing_ack_sends_no_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.bin");
        std::fs::write(&path, b"do not send").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // 对端读完文件名后直接关闭写端，不发送确认
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut rd, mut wr) = stream.into_split();
            protocol::read_header(&mut rd).await.unwrap();
            wr.shutdown().await.unwrap();
            let mut rest = Vec::new();
            rd.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let err = TransferClient::default()
            .send_file(&addr, &path)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NoAck(_)));
        assert!(peer.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_peer_hits_idle_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _peer = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = TransferClient::with_timeout(Some(Duration::from_millis(200)));
        let err = client.send_file(&addr, &path).await.unwrap_err();
        assert!(matches!(err, TransferError::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_slow_reader_within_idle_completes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let content: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 241) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            protocol::read_header(&mut stream).await.unwrap();
            stream.write_all(protocol::ACK).await.unwrap();

            // 每次只读一小块，整体耗时超过空闲超时
            let mut received = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            received
        });

        let client = TransferClient::with_timeout(Some(Duration::from_millis(300)));
        let report = client.send_file(&addr, &path).await.unwrap();
        assert_eq!(report.bytes_sent, content.len() as u64);
        assert_eq!(peer.await.unwrap(), content);
    }
}

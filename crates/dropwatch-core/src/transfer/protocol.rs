//! 传输线路协议
//!
//! 每个 TCP 连接只传输一个文件：
//!
//! ```text
//! client -> server   [u16 BE 长度 n][n 字节 UTF-8 文件名]
//! server -> client   "ok"                   (目标文件创建成功后)
//! client -> server   文件内容 ...            (客户端关闭写端表示结束)
//! ```
//!
//! 文件名带长度前缀，接收端不会因为一次读取不完整而截断文件名。
//!
//! 两端的每一次网络读写都受同一个空闲超时约束：对端持续有进展时传输
//! 可以任意长，停住超过超时时间才会失败。

use std::path::{Component, Path};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, TransferError};

/// 文件名最大字节数
pub const MAX_HEADER_LEN: usize = 1024;

/// 确认消息
pub const ACK: &[u8; 2] = b"ok";

const COPY_BUF_LEN: usize = 64 * 1024;

/// 从本地路径得到发送用的文件名
///
/// 先把 `\` 统一成 `/`，再去掉目录部分。
pub fn header_name(path: &Path) -> Result<String, ProtocolError> {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let name = normalized
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    if name.is_empty() {
        return Err(ProtocolError::EmptyHeader);
    }
    if name.len() > MAX_HEADER_LEN {
        return Err(ProtocolError::HeaderTooLong(name.len()));
    }
    Ok(name.to_string())
}

/// 校验收到的文件名，只接受单个普通路径组件
pub fn validate_file_name(name: &str) -> Result<&str, ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::EmptyHeader);
    }
    let unsafe_name = || ProtocolError::UnsafeName(name.to_string());

    if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(unsafe_name());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(unsafe_name()),
    }
}

/// 写入带长度前缀的文件名
pub async fn write_header<W>(writer: &mut W, name: &str) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    if name.is_empty() {
        return Err(ProtocolError::EmptyHeader.into());
    }
    let len = u16::try_from(name.len())
        .ok()
        .filter(|&n| usize::from(n) <= MAX_HEADER_LEN)
        .ok_or(ProtocolError::HeaderTooLong(name.len()))?;

    let mut frame = Vec::with_capacity(2 + name.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(name.as_bytes());
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取带长度前缀的文件名
pub async fn read_header<R>(reader: &mut R) -> Result<String, TransferError>
where
    R: AsyncRead + Unpin,
{
    let len = usize::from(reader.read_u16().await?);
    if len == 0 {
        return Err(ProtocolError::EmptyHeader.into());
    }
    if len > MAX_HEADER_LEN {
        return Err(ProtocolError::HeaderTooLong(len).into());
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8.into())
}

/// 读取并校验确认消息
pub async fn read_ack<R>(reader: &mut R) -> Result<(), TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(TransferError::NoAck)?;
    if &buf != ACK {
        return Err(ProtocolError::BadAck(buf).into());
    }
    Ok(())
}

/// 在空闲超时内完成一步 I/O，`None` 表示不限制
pub async fn within_idle<T, F>(idle: Option<Duration>, op: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    match idle {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .unwrap_or(Err(TransferError::TimedOut(limit))),
        None => op.await,
    }
}

/// 拷贝到读端结束
///
/// 超时只针对单次读或写，不限制总时长。
pub async fn copy_with_idle<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Option<Duration>,
) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUF_LEN];
    let mut total = 0u64;
    loop {
        let n = within_idle(idle, async {
            reader.read(&mut buf).await.map_err(TransferError::from)
        })
        .await?;
        if n == 0 {
            return Ok(total);
        }
        within_idle(idle, async {
            writer.write_all(&buf[..n]).await.map_err(TransferError::from)
        })
        .await?;
        total += n as u64;
    }
}

//! 分发器
//!
//! 从队列取出新文件事件，让操作员在主机菜单中选择目标，然后发送一次。
//! 同一时间最多只有一个发送中的传输。

use log::{error, info};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Settings;
use crate::error::DispatchError;
use crate::transfer::{FileSender, TransferReport};
use crate::watch::watcher::{WatchChannels, WatchEvent};

/// 解析操作员输入的序号（从 1 开始），返回 0 起始的下标
pub fn parse_selection(input: &str, host_count: usize) -> Option<usize> {
    let index: usize = input.trim().parse().ok()?;
    (1..=host_count).contains(&index).then(|| index - 1)
}

/// 交互式分发器
pub struct Dispatcher<S, R, W> {
    hosts: Vec<String>,
    sender: S,
    input: R,
    output: W,
}

impl<S, R, W> Dispatcher<S, R, W>
where
    S: FileSender,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(settings: &Settings, sender: S, input: R, output: W) -> Self {
        Self::with_hosts(settings.hosts.clone(), sender, input, output)
    }

    pub fn with_hosts(hosts: Vec<String>, sender: S, input: R, output: W) -> Self {
        Self {
            hosts,
            sender,
            input,
            output,
        }
    }

    /// 消费队列直到关闭
    ///
    /// 监视错误和输入关闭会结束循环；单次传输失败只记录日志。
    /// 监视错误随时生效，包括正在等待操作员输入或正在发送的时候。
    pub async fn run(mut self, channels: WatchChannels) -> Result<(), DispatchError> {
        let WatchChannels {
            mut events,
            mut errors,
        } = channels;

        loop {
            let event = tokio::select! {
                biased;
                Some(e) = errors.recv() => return Err(e.into()),
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                Some(e) = errors.recv() => return Err(e.into()),
                result = self.dispatch(&event) => {
                    result?;
                }
            }
        }

        info!("Event queue closed, dispatcher stopping");
        Ok(())
    }

    /// 为一个事件选择主机并发送
    pub async fn dispatch(
        &mut self,
        event: &WatchEvent,
    ) -> Result<Option<TransferReport>, DispatchError> {
        let index = self.select_host().await?;
        let host = &self.hosts[index];

        info!("File will be sent to {}", host);
        match self.sender.send(host, &event.path).await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                error!("Dropping {:?}: {}", event.path, e);
                Ok(None)
            }
        }
    }

    /// 显示菜单并读取序号，输入无效时重新显示
    pub async fn select_host(&mut self) -> Result<usize, DispatchError> {
        let mut line = String::new();
        loop {
            self.print_menu().await?;

            line.clear();
            if self.input.read_line(&mut line).await? == 0 {
                return Err(DispatchError::InputClosed);
            }

            match parse_selection(&line, self.hosts.len()) {
                Some(index) => return Ok(index),
                None => error!("Invalid index {:?}", line.trim()),
            }
        }
    }

    async fn print_menu(&mut self) -> Result<(), DispatchError> {
        let mut menu = String::from("Please choose one of following hosts:\n");
        for (i, host) in self.hosts.iter().enumerate() {
            menu.push_str(&format!("  {} {}\n", i + 1, host));
        }
        self.output.write_all(menu.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransferError, WatchError};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSender {
        calls: Mutex<Vec<(String, PathBuf)>>,
        fail: bool,
    }

    #[async_trait]
    impl FileSender for RecordingSender {
        async fn send(&self, host: &str, path: &Path) -> Result<TransferReport, TransferError> {
            self.calls
                .lock()
                .unwrap()
                .push((host.to_string(), path.to_path_buf()));
            if self.fail {
                return Err(TransferError::NotAFile(path.to_path_buf()));
            }
            Ok(TransferReport {
                file_name: "x".to_string(),
                bytes_sent: 0,
            })
        }
    }

    fn channels(
        capacity: usize,
    ) -> (
        mpsc::Sender<WatchEvent>,
        mpsc::UnboundedSender<WatchError>,
        WatchChannels,
    ) {
        let (tx, events) = mpsc::channel(capacity);
        let (errors_tx, errors) = mpsc::unbounded_channel();
        (tx, errors_tx, WatchChannels { events, errors })
    }

    fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("10.0.0.{}:5000", 29 + i)).collect()
    }

    #[test]
    fn test_parse_selection_bounds() {
        assert_eq!(parse_selection("0", 3), None);
        assert_eq!(parse_selection("4", 3), None);
        assert_eq!(parse_selection("abc", 3), None);
        assert_eq!(parse_selection("", 3), None);
        assert_eq!(parse_selection("-1", 3), None);
        assert_eq!(parse_selection("1", 3), Some(0));
        assert_eq!(parse_selection(" 3\n", 3), Some(2));
    }

    #[tokio::test]
    async fn test_invalid_input_reprompts() {
        let sender = Arc::new(RecordingSender::default());
        let mut output = Vec::new();
        let input: &[u8] = b"0\n3\nabc\n2\n";

        let mut dispatcher = Dispatcher::with_hosts(hosts(2), sender.clone(), input, &mut output);
        let report = dispatcher
            .dispatch(&WatchEvent::created("/watch/report.csv"))
            .await
            .unwrap();
        assert!(report.is_some());
        drop(dispatcher);

        let calls = sender.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "10.0.0.31:5000".to_string(),
                PathBuf::from("/watch/report.csv")
            )]
        );

        let printed = String::from_utf8(output).unwrap();
        assert_eq!(
            printed
                .matches("Please choose one of following hosts:")
                .count(),
            4
        );
        assert!(printed.contains("  1 10.0.0.30:5000\n  2 10.0.0.31:5000\n"));
    }

    #[tokio::test]
    async fn test_each_index_maps_to_host() {
        for i in 1..=3 {
            let sender = Arc::new(RecordingSender::default());
            let line = format!("{}\n", i);
            let mut dispatcher = Dispatcher::with_hosts(
                hosts(3),
                sender.clone(),
                line.as_bytes(),
                tokio::io::sink(),
            );
            dispatcher
                .dispatch(&WatchEvent::created("f"))
                .await
                .unwrap();
            drop(dispatcher);
            assert_eq!(sender.calls.lock().unwrap()[0].0, hosts(3)[i - 1]);
        }
    }

    #[tokio::test]
    async fn test_input_closed() {
        let sender = Arc::new(RecordingSender::default());
        let mut dispatcher =
            Dispatcher::with_hosts(hosts(1), sender.clone(), &b"9\n"[..], tokio::io::sink());
        let err = dispatcher
            .dispatch(&WatchEvent::created("f"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InputClosed));
        assert!(sender.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_survives_failed_transfer() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let (tx, _errors_tx, channels) = channels(4);
        tx.send(WatchEvent::created("a")).await.unwrap();
        tx.send(WatchEvent::created("b")).await.unwrap();
        drop(tx);

        let dispatcher =
            Dispatcher::with_hosts(hosts(1), sender.clone(), &b"1\n1\n"[..], tokio::io::sink());
        dispatcher.run(channels).await.unwrap();
        assert_eq!(sender.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_watch_error() {
        let sender = Arc::new(RecordingSender::default());
        let (tx, errors_tx, channels) = channels(4);
        errors_tx
            .send(WatchError::Notify(notify::Error::generic("boom")))
            .unwrap();
        tx.send(WatchEvent::created("a")).await.unwrap();

        let dispatcher =
            Dispatcher::with_hosts(hosts(1), sender.clone(), &b"1\n"[..], tokio::io::sink());
        let err = dispatcher.run(channels).await.unwrap_err();
        assert!(matches!(err, DispatchError::Watch(_)));
        assert!(sender.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_error_interrupts_pending_prompt() {
        let sender = Arc::new(RecordingSender::default());
        let (tx, errors_tx, channels) = channels(4);
        for name in ["a", "b", "c"] {
            tx.send(WatchEvent::created(name)).await.unwrap();
        }

        // 操作员一直不输入
        let (_keyboard, terminal) = tokio::io::duplex(64);
        let dispatcher = Dispatcher::with_hosts(
            hosts(2),
            sender.clone(),
            BufReader::new(terminal),
            tokio::io::sink(),
        );
        let run = tokio::spawn(dispatcher.run(channels));

        tokio::time::sleep(Duration::from_millis(50)).await;
        errors_tx
            .send(WatchError::Notify(notify::Error::generic("watch root removed")))
            .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("dispatcher kept waiting for input")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, DispatchError::Watch(_)));
        assert!(sender.calls.lock().unwrap().is_empty());
    }
}

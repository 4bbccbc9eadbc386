//! 监视 + 分发流水线

use dropwatch_core::error::DispatchError;
use dropwatch_core::{DirectoryWatcher, Dispatcher, Settings, TransferClient};
use tokio::io::BufReader;

/// 监视配置目录，逐个询问操作员并发送新文件
///
/// 监视器在返回前一直保持存活；队列关闭、监视出错或终端输入结束时返回。
pub async fn run_watch(settings: Settings) -> Result<(), DispatchError> {
    let (watcher, channels) = DirectoryWatcher::start(&settings)?;
    tracing::info!("Start watching {:?}...", watcher.path());

    let client = TransferClient::new(&settings);
    let dispatcher = Dispatcher::new(
        &settings,
        client,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );

    let result = dispatcher.run(channels).await;
    drop(watcher);
    result
}

//! 应用配置和持久化
//!
//! 设置在进程启动时加载一次，之后以值的形式传给服务器、监视器、分发器和客户端。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// 应用设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 接收服务器监听地址
    pub listen_addr: String,
    /// 监视目录（非递归）
    pub watch_path: PathBuf,
    /// 接收文件保存目录
    pub receive_path: PathBuf,
    /// 目标主机列表，菜单序号从 1 开始
    pub hosts: Vec<String>,
    /// 监视事件队列容量
    pub event_queue_capacity: usize,
    /// 对端无进展的最长时间（秒），0 表示不限制
    pub idle_timeout_secs: u64,
    /// 同时处理的接收会话上限，0 表示不限制
    pub max_sessions: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            watch_path: PathBuf::from("watch"),
            receive_path: PathBuf::from("receive"),
            hosts: vec!["127.0.0.1:5000".to_string()],
            event_queue_capacity: 64,
            idle_timeout_secs: 60,
            max_sessions: 64,
        }
    }
}

impl Settings {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dropwatch");
        config_dir.join("settings.toml")
    }

    /// 加载设置
    ///
    /// 文件不存在时先写入默认模板再读取。读取或解析失败、校验不通过都返回错误。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::default().save(path)?;
            debug!("Wrote default settings to {:?}", path);
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;

        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// 保存设置
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, self.to_toml()?).map_err(write_err)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 校验必填项
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::invalid("listen_addr", "must not be empty"));
        }
        if self.watch_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("watch_path", "must not be empty"));
        }
        if self.receive_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("receive_path", "must not be empty"));
        }
        if self.hosts.is_empty() {
            return Err(ConfigError::invalid("hosts", "no host configured"));
        }
        if let Some(i) = self.hosts.iter().position(|h| h.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "hosts",
                format!("entry {} is blank", i + 1),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "event_queue_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// 单次网络读写的空闲超时，`None` 表示不限制
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// 会话并发上限，`None` 表示不限制
    pub fn session_limit(&self) -> Option<usize> {
        (self.max_sessions > 0).then_some(self.max_sessions)
    }
}

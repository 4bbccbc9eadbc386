//! 日志模块
//!
//! 普通级别直接使用 `log` 宏。`Success` 没有对应的 `log::Level`，
//! 按 Info 输出并带上 ✅ 图标。

/// 成功消息的前缀图标
pub const SUCCESS_ICON: &str = "✅";

/// 格式化一条成功消息
pub fn success_line(message: &str) -> String {
    format!("{SUCCESS_ICON} {message}")
}

/// 记录一条成功消息
pub fn success(message: impl AsRef<str>) {
    log::info!("{}", success_line(message.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_line() {
        assert_eq!(success_line("File sent"), "✅ File sent");
        assert_eq!(
            success_line(&format!("Connection established to {}", "10.0.0.30:5000")),
            "✅ Connection established to 10.0.0.30:5000"
        );
    }
}

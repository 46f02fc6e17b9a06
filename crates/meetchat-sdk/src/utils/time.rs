//! 时间处理工具模块
//!
//! - **存储层**: 所有时间字段使用 UTC 毫秒时间戳（i64）
//! - **业务层**: 统一使用 `now_millis()` 生成时间
//! - **显示层**: 由 `TimeFormatter` 转换为可读字符串

use chrono::{DateTime, Local, TimeZone, Utc};

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 时间格式化工具
pub struct TimeFormatter;

impl TimeFormatter {
    /// 毫秒时间戳转为 UTC 时间
    pub fn to_datetime(timestamp_ms: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(timestamp_ms).single()
    }

    /// 格式化为本地时间 `HH:MM`（聊天气泡用）
    pub fn format_short(timestamp_ms: i64) -> String {
        match Self::to_datetime(timestamp_ms) {
            Some(dt) => dt.with_timezone(&Local).format("%H:%M").to_string(),
            None => String::new(),
        }
    }

    /// 格式化为 RFC3339（日志、调试用）
    pub fn format_rfc3339(timestamp_ms: i64) -> String {
        Self::to_datetime(timestamp_ms)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }

    /// 两个时间戳之间的可读间隔，如 `1h2m3s`
    pub fn format_elapsed(from_ms: i64, to_ms: i64) -> String {
        let secs = ((to_ms - from_ms).max(0)) / 1000;
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h{}m{}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m{}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

//! 时间工具模块

use chrono::{Local, Utc};

/// 当前 unix 时间戳 (秒)
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// 当前 unix 时间戳 (毫秒)
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 获取当前本地时间的格式化字符串
pub fn now_local_str() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

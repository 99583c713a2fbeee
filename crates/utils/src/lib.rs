mod logger;
pub mod time_utils;

pub use logger::LoggerManager;
pub use time_utils::{now_millis, now_secs, now_local_str};

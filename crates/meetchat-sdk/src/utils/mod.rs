//! 通用工具模块

pub mod logging;
pub mod time;

pub use logging::init_logging;
pub use time::{now_millis, TimeFormatter};

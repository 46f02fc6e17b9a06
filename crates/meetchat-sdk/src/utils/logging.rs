//! 日志初始化
//!
//! 优先读取 `RUST_LOG`，未设置时按 debug_mode 选择 `debug` / `info`。

use tracing_subscriber::EnvFilter;

/// 初始化全局 tracing 订阅者
///
/// 重复调用是安全的：已存在全局订阅者时直接返回 false。
pub fn init_logging(debug_mode: bool) -> bool {
    let default_level = if debug_mode { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

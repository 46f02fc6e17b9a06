//! SDK 版本与运行时元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Build Time** → build.rs 中由 vergen 生成

/// SDK semver，来自 Cargo.toml
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// 版本摘要，用于启动日志
pub fn version_summary() -> String {
    format!("meetchat-sdk {} (built {})", SDK_VERSION, BUILD_TIME)
}

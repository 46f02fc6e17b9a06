//! 固定间隔、有上限的重连策略
//!
//! 意外断开后每隔 `interval_ms` 尝试一次，最多 `max_attempts` 次；
//! 用尽后停止重试，直到网络重新恢复时调用 `reset()`。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 重连配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 重连间隔（毫秒）
    pub interval_ms: u64,
    /// 单轮最大重连次数
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// 重连策略状态
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    /// 本轮已用的重连次数
    attempts: RwLock<u32>,
    /// 累计重连次数（不随 reset 清零）
    total_attempts: RwLock<u64>,
    last_attempt: RwLock<Option<Instant>>,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: RwLock::new(0),
            total_attempts: RwLock::new(0),
            last_attempt: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// 申请下一次重连
    ///
    /// 返回 `(第几次, 等待时间)`；次数用尽时返回 `None`。
    pub fn next_attempt(&self) -> Option<(u32, Duration)> {
        let mut attempts = self.attempts.write();
        if *attempts >= self.config.max_attempts {
            warn!("⚠️ 重连次数已用尽 ({}/{})", *attempts, self.config.max_attempts);
            return None;
        }
        *attempts += 1;
        *self.total_attempts.write() += 1;
        *self.last_attempt.write() = Some(Instant::now());
        info!(
            "🔄 重连尝试 #{}/{}，{}ms 后执行",
            *attempts, self.config.max_attempts, self.config.interval_ms
        );
        Some((*attempts, self.config.interval()))
    }

    /// 连接成功
    pub fn mark_success(&self) {
        let mut attempts = self.attempts.write();
        if *attempts > 0 {
            info!("连接成功！重置重连计数器（之前尝试了 {} 次）", *attempts);
        }
        *attempts = 0;
    }

    /// 网络恢复，开始新一轮重连
    pub fn reset(&self) {
        *self.attempts.write() = 0;
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.read()
    }

    pub fn is_exhausted(&self) -> bool {
        *self.attempts.read() >= self.config.max_attempts
    }

    pub fn stats(&self) -> ReconnectStats {
        ReconnectStats {
            attempts: self.attempts(),
            max_attempts: self.config.max_attempts,
            total_attempts: *self.total_attempts.read(),
            last_attempt_elapsed_ms: self
                .last_attempt
                .read()
                .map(|t| Instant::now().duration_since(t).as_millis() as u64),
        }
    }
}

/// 重连统计信息
#[derive(Debug, Clone)]
pub struct ReconnectStats {
    pub attempts: u32,
    pub max_attempts: u32,
    pub total_attempts: u64,
    pub last_attempt_elapsed_ms: Option<u64>,
}

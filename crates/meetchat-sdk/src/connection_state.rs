//! 连接状态管理
//!
//! 记录实时传输通道的完整状态，包括：
//! - 后端类型和端点地址
//! - 连接状态与重连次数
//! - 帧收发统计
//! - 最近一次错误

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionBackend {
    /// WebSocket 实时端点
    WebSocket,
    /// 本地内存后备服务
    Local,
}

impl std::fmt::Display for ConnectionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionBackend::WebSocket => write!(f, "WebSocket"),
            ConnectionBackend::Local => write!(f, "Local"),
        }
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// 未连接
    Disconnected,
    /// 连接中
    Connecting,
    /// 已连接
    Connected,
    /// 重连中
    Reconnecting,
    /// 重连次数耗尽，等待网络恢复
    Failed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "未连接"),
            ConnectionStatus::Connecting => write!(f, "连接中"),
            ConnectionStatus::Connected => write!(f, "已连接"),
            ConnectionStatus::Reconnecting => write!(f, "重连中"),
            ConnectionStatus::Failed => write!(f, "连接失败"),
        }
    }
}

/// 连接状态变化事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatusEvent {
    pub old_status: ConnectionStatus,
    pub new_status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub timestamp: i64,
}

/// 帧收发统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// 成功建立连接的次数
    pub connections_established: u64,
    /// 最后活动时间（UTC毫秒时间戳）
    pub last_activity_time: Option<i64>,
}

/// 传输通道状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub backend: ConnectionBackend,
    /// 端点地址（本地后备为 `local://memory`）
    pub endpoint: String,
    pub status: ConnectionStatus,
    /// 当前这一轮的重连次数
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub stats: TransportStats,
    /// 连接建立时间（UTC毫秒时间戳）
    pub connected_at: Option<i64>,
    pub last_error: Option<String>,
    pub sdk_version: String,
}

impl ConnectionState {
    pub fn new(backend: ConnectionBackend, endpoint: impl Into<String>, max_reconnect_attempts: u32) -> Self {
        Self {
            backend,
            endpoint: endpoint.into(),
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            stats: TransportStats::default(),
            connected_at: None,
            last_error: None,
            sdk_version: crate::version::SDK_VERSION.to_string(),
        }
    }

    /// 获取连接持续时间（秒）
    pub fn connection_duration_secs(&self) -> Option<i64> {
        self.connected_at.map(|connected_at| {
            let now = Utc::now().timestamp_millis();
            (now - connected_at) / 1000
        })
    }

    /// 格式化连接持续时间为可读字符串
    pub fn format_connection_duration(&self) -> String {
        match self.connection_duration_secs() {
            Some(secs) => {
                let hours = secs / 3600;
                let minutes = (secs % 3600) / 60;
                let seconds = secs % 60;

                if hours > 0 {
                    format!("{}小时{}分{}秒", hours, minutes, seconds)
                } else if minutes > 0 {
                    format!("{}分{}秒", minutes, seconds)
                } else {
                    format!("{}秒", seconds)
                }
            }
            None => "未连接".to_string(),
        }
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        format!(
            "【连接状态】\n\
             后端: {}\n\
             端点: {}\n\
             状态: {}\n\
             重连: {}/{}\n\
             已连接: {}\n\
             统计: 发送{}帧/接收{}帧\n\
             最近错误: {}\n\
             SDK版本: {}",
            self.backend,
            self.endpoint,
            self.status,
            self.reconnect_attempts,
            self.max_reconnect_attempts,
            self.format_connection_duration(),
            self.stats.frames_sent,
            self.stats.frames_received,
            self.last_error.as_deref().unwrap_or("无"),
            self.sdk_version
        )
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// 连接状态管理器（线程安全，克隆共享同一份状态）
#[derive(Debug, Clone)]
pub struct ConnectionStateManager {
    state: Arc<RwLock<ConnectionState>>,
    sender: broadcast::Sender<ConnectionStatusEvent>,
}

impl ConnectionStateManager {
    pub fn new(backend: ConnectionBackend, endpoint: impl Into<String>, max_reconnect_attempts: u32) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::new(
                backend,
                endpoint,
                max_reconnect_attempts,
            ))),
            sender,
        }
    }

    /// 订阅连接状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatusEvent> {
        self.sender.subscribe()
    }

    /// 更新状态；状态未变化时不广播
    pub fn set_status(&self, status: ConnectionStatus) -> bool {
        let event = {
            let mut state = self.state.write();
            if state.status == status {
                return false;
            }
            let old_status = std::mem::replace(&mut state.status, status);
            match status {
                ConnectionStatus::Connected => {
                    state.connected_at = Some(Utc::now().timestamp_millis());
                    state.stats.connections_established += 1;
                }
                _ => state.connected_at = None,
            }
            ConnectionStatusEvent {
                old_status,
                new_status: status,
                reconnect_attempts: state.reconnect_attempts,
                timestamp: Utc::now().timestamp_millis(),
            }
        };

        tracing::debug!("连接状态: {} -> {}", event.old_status, event.new_status);
        let _ = self.sender.send(event);
        true
    }

    pub fn mark_connecting(&self) {
        self.set_status(ConnectionStatus::Connecting);
    }

    /// 标记连接成功（清零重连计数）
    pub fn mark_connected(&self) {
        {
            let mut state = self.state.write();
            state.reconnect_attempts = 0;
            state.last_error = None;
        }
        self.set_status(ConnectionStatus::Connected);
    }

    /// 标记进入第 `attempt` 次重连
    pub fn mark_reconnecting(&self, attempt: u32) {
        self.state.write().reconnect_attempts = attempt;
        self.set_status(ConnectionStatus::Reconnecting);
    }

    /// 标记重连耗尽
    pub fn mark_failed(&self, error: impl Into<String>) {
        self.state.write().last_error = Some(error.into());
        self.set_status(ConnectionStatus::Failed);
    }

    pub fn mark_disconnected(&self, reason: Option<String>) {
        if let Some(reason) = reason {
            self.state.write().last_error = Some(reason);
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    pub fn record_error(&self, error: impl Into<String>) {
        self.state.write().last_error = Some(error.into());
    }

    /// 网络恢复后清零重连计数
    pub fn reset_attempts(&self) {
        self.state.write().reconnect_attempts = 0;
    }

    /// 增加发送帧计数
    pub fn increment_sent(&self, byte_count: u64) {
        let mut state = self.state.write();
        state.stats.frames_sent += 1;
        state.stats.bytes_sent += byte_count;
        state.stats.last_activity_time = Some(Utc::now().timestamp_millis());
    }

    /// 增加接收帧计数
    pub fn increment_received(&self, byte_count: u64) {
        let mut state = self.state.write();
        state.stats.frames_received += 1;
        state.stats.bytes_received += byte_count;
        state.stats.last_activity_time = Some(Utc::now().timestamp_millis());
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state.read().reconnect_attempts
    }

    /// 获取当前状态快照
    pub fn get_state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub fn get_summary(&self) -> String {
        self.state.read().summary()
    }

    /// 打印状态到日志
    pub fn log_state(&self) {
        tracing::info!("\n{}", self.get_summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_state_manager() {
        let manager = ConnectionStateManager::new(ConnectionBackend::WebSocket, "ws://127.0.0.1:9000/chat", 10);
        let mut events = manager.subscribe();

        manager.mark_connecting();
        manager.mark_connected();
        manager.increment_sent(128);
        manager.increment_received(256);

        let state = manager.get_state();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert!(state.connected_at.is_some());
        assert_eq!(state.stats.frames_sent, 1);
        assert_eq!(state.stats.bytes_received, 256);
        assert_eq!(state.stats.connections_established, 1);

        let first = events.recv().await.unwrap();
        assert_eq!(first.new_status, ConnectionStatus::Connecting);
        let second = events.recv().await.unwrap();
        assert_eq!(second.old_status, ConnectionStatus::Connecting);
        assert_eq!(second.new_status, ConnectionStatus::Connected);

        assert!(manager.get_summary().contains("ws://127.0.0.1:9000/chat"));
    }

    #[test]
    fn test_reconnect_bookkeeping() {
        let manager = ConnectionStateManager::new(ConnectionBackend::WebSocket, "ws://x", 3);
        manager.mark_reconnecting(1);
        manager.mark_reconnecting(2);
        assert_eq!(manager.reconnect_attempts(), 2);
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);

        manager.mark_failed("connection refused");
        let state = manager.get_state();
        assert_eq!(state.status, ConnectionStatus::Failed);
        assert_eq!(state.last_error.as_deref(), Some("connection refused"));
        assert!(state.connected_at.is_none());

        manager.reset_attempts();
        manager.mark_connected();
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(manager.get_state().last_error.is_none());
    }

    #[test]
    fn test_unchanged_status_not_broadcast() {
        let manager = ConnectionStateManager::new(ConnectionBackend::Local, "local://memory", 0);
        let mut events = manager.subscribe();
        assert!(!manager.set_status(ConnectionStatus::Disconnected));
        assert!(manager.set_status(ConnectionStatus::Connected));
        assert!(!manager.set_status(ConnectionStatus::Connected));
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }
}

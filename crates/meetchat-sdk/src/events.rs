//! 事件系统模块 - 把消息核心的状态变化广播给 UI
//!
//! 功能包括：
//! - 网络连通性、传输连接状态变更事件
//! - 离线队列长度与回放结果事件
//! - 消息投递状态变更、新消息到达事件
//! - 广播订阅、按类型注册的监听器、事件统计

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::connection_state::ConnectionStatus;
use crate::network::NetworkStatus;
use crate::storage::entities::{AuthorRef, DeliveryStatus};
use crate::utils::time::now_millis;

/// SDK 事件类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SdkEvent {
    /// 网络连通性变更
    ConnectivityChanged {
        old_status: NetworkStatus,
        new_status: NetworkStatus,
        timestamp: i64,
    },
    /// 传输连接状态变更
    ConnectionStateChanged {
        old_status: ConnectionStatus,
        new_status: ConnectionStatus,
        reconnect_attempts: u32,
        timestamp: i64,
    },
    /// 离线队列长度变化
    QueueLengthChanged { length: usize, timestamp: i64 },
    /// 离线队列全部回放成功
    FlushCompleted { replayed: usize, timestamp: i64 },
    /// 离线队列回放中途失败（剩余动作等待下次恢复）
    FlushPartialFailure {
        replayed: usize,
        remaining: usize,
        reason: String,
        timestamp: i64,
    },
    /// 离线动作因不可重试的错误被丢弃
    ActionDropped {
        kind: String,
        channel_id: String,
        reason: String,
        timestamp: i64,
    },
    /// 消息投递状态变更
    MessageStatusChanged {
        message_id: String,
        channel_id: String,
        old_status: DeliveryStatus,
        new_status: DeliveryStatus,
        timestamp: i64,
    },
    /// 收到他人发送的新消息
    MessageReceived {
        message_id: String,
        channel_id: String,
        author: AuthorRef,
        timestamp: i64,
    },
}

impl SdkEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SdkEvent::ConnectivityChanged { .. } => "connectivity_changed",
            SdkEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            SdkEvent::QueueLengthChanged { .. } => "queue_length_changed",
            SdkEvent::FlushCompleted { .. } => "flush_completed",
            SdkEvent::FlushPartialFailure { .. } => "flush_partial_failure",
            SdkEvent::ActionDropped { .. } => "action_dropped",
            SdkEvent::MessageStatusChanged { .. } => "message_status_changed",
            SdkEvent::MessageReceived { .. } => "message_received",
        }
    }

    /// 获取事件关联的频道
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            SdkEvent::ActionDropped { channel_id, .. } => Some(channel_id),
            SdkEvent::MessageStatusChanged { channel_id, .. } => Some(channel_id),
            SdkEvent::MessageReceived { channel_id, .. } => Some(channel_id),
            _ => None,
        }
    }

    /// 获取事件时间戳（UTC 毫秒）
    pub fn timestamp(&self) -> i64 {
        match self {
            SdkEvent::ConnectivityChanged { timestamp, .. }
            | SdkEvent::ConnectionStateChanged { timestamp, .. }
            | SdkEvent::QueueLengthChanged { timestamp, .. }
            | SdkEvent::FlushCompleted { timestamp, .. }
            | SdkEvent::FlushPartialFailure { timestamp, .. }
            | SdkEvent::ActionDropped { timestamp, .. }
            | SdkEvent::MessageStatusChanged { timestamp, .. }
            | SdkEvent::MessageReceived { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 频道过滤器
    pub channel_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_channel_ids(mut self, channel_ids: Vec<String>) -> Self {
        self.channel_ids = Some(channel_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SdkEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref channel_ids) = self.channel_ids {
            match event.channel_id() {
                Some(channel_id) if channel_ids.iter().any(|c| c == channel_id) => {}
                // 事件没有频道但过滤器要求有
                _ => return false,
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Arc<dyn Fn(&SdkEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    sender: broadcast::Sender<SdkEvent>,
    /// 事件类型 -> 监听器，`*` 表示全部事件
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    stats: RwLock<EventStats>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// 发布事件
    ///
    /// 同步执行，可以在存储回调等非异步上下文中调用。
    pub fn emit(&self, event: SdkEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 的客户端）
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        // 先拷贝出监听器再调用，监听器内部可以再注册监听器
        let targets: Vec<EventListener> = {
            let listeners = self.listeners.read();
            listeners
                .get(event.event_type())
                .into_iter()
                .chain(listeners.get("*"))
                .flatten()
                .cloned()
                .collect()
        };
        for listener in targets {
            listener(&event);
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器（`event_type` 为 `*` 时监听全部事件）
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SdkEvent) + Send + Sync + 'static,
    {
        let count = {
            let mut listeners = self.listeners.write();
            listeners
                .entry(event_type.to_string())
                .or_default()
                .push(Arc::new(listener));
            listeners.values().map(|v| v.len()).sum()
        };
        self.stats.write().listener_count = count;

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;

        info!("Cleared all event listeners");
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SdkEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SdkEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SdkEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SdkEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;
    use crate::storage::entities::ChatMessage;

    pub fn connectivity_changed(old_status: NetworkStatus, new_status: NetworkStatus) -> SdkEvent {
        SdkEvent::ConnectivityChanged {
            old_status,
            new_status,
            timestamp: now_millis(),
        }
    }

    pub fn connection_state_changed(
        old_status: ConnectionStatus,
        new_status: ConnectionStatus,
        reconnect_attempts: u32,
    ) -> SdkEvent {
        SdkEvent::ConnectionStateChanged {
            old_status,
            new_status,
            reconnect_attempts,
            timestamp: now_millis(),
        }
    }

    pub fn queue_length_changed(length: usize) -> SdkEvent {
        SdkEvent::QueueLengthChanged {
            length,
            timestamp: now_millis(),
        }
    }

    pub fn flush_completed(replayed: usize) -> SdkEvent {
        SdkEvent::FlushCompleted {
            replayed,
            timestamp: now_millis(),
        }
    }

    pub fn flush_partial_failure(replayed: usize, remaining: usize, reason: impl Into<String>) -> SdkEvent {
        SdkEvent::FlushPartialFailure {
            replayed,
            remaining,
            reason: reason.into(),
            timestamp: now_millis(),
        }
    }

    pub fn action_dropped(kind: &str, channel_id: &str, reason: impl Into<String>) -> SdkEvent {
        SdkEvent::ActionDropped {
            kind: kind.to_string(),
            channel_id: channel_id.to_string(),
            reason: reason.into(),
            timestamp: now_millis(),
        }
    }

    /// 创建消息状态变更事件（`message` 已是变更后的状态）
    pub fn message_status_changed(message: &ChatMessage, old_status: DeliveryStatus) -> SdkEvent {
        SdkEvent::MessageStatusChanged {
            message_id: message.id.clone(),
            channel_id: message.channel_id.clone(),
            old_status,
            new_status: message.status,
            timestamp: now_millis(),
        }
    }

    pub fn message_received(message: &ChatMessage) -> SdkEvent {
        SdkEvent::MessageReceived {
            message_id: message.id.clone(),
            channel_id: message.channel_id.clone(),
            author: message.author.clone(),
            timestamp: now_millis(),
        }
    }
}

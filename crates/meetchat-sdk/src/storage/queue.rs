//! 离线动作队列
//!
//! 离线期间用户发起的动作（发送消息、表情反馈）按 FIFO 顺序暂存，
//! 每次变更后整体写入本地存储的 `offlineQueue` 键，进程重启后仍可恢复。
//!
//! 回放规则：
//! - 严格按入队顺序回放，遇到第一个可重试的失败即停止
//! - 每确认一个动作立即移除并持久化，失败动作及其后的动作全部保留
//! - 不可重试的失败（例如目标消息不存在）丢弃该动作并继续回放后续动作
//! - 空队列回放没有任何可观察的副作用
//! - 同一时刻只允许一个回放在进行

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{MeetchatSDKError, Result};
use crate::events::{event_builders, EventManager};
use crate::network::NetworkMonitor;
use crate::storage::entities::{ChatMessage, Reaction};
use crate::storage::kv::{keys, LocalStorage, MemoryKvStore};
use crate::utils::time::now_millis;

/// 可离线暂存的动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OfflineAction {
    /// 发送消息（携带已生成的临时消息，回放时沿用同一个 id）
    SendMessage { message: ChatMessage },
    /// 添加或移除表情反馈
    React {
        message_id: String,
        channel_id: String,
        reaction: Reaction,
        add: bool,
    },
}

impl OfflineAction {
    pub fn channel_id(&self) -> &str {
        match self {
            OfflineAction::SendMessage { message } => &message.channel_id,
            OfflineAction::React { channel_id, .. } => channel_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OfflineAction::SendMessage { .. } => "send_message",
            OfflineAction::React { .. } => "react",
        }
    }
}

/// 队列条目（入队后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// 队列内单调递增序号
    pub seq: u64,
    pub action: OfflineAction,
    /// 入队时间（UTC 毫秒）
    pub enqueued_at: i64,
}

/// 动作回放目标（由聊天服务实现）
#[async_trait]
pub trait ActionReplayer: Send + Sync {
    async fn replay(&self, action: &OfflineAction) -> Result<()>;

    /// 动作因不可重试的错误被移出队列时调用
    fn discard(&self, _action: &OfflineAction, _error: &MeetchatSDKError) {}
}

/// 离线动作队列
pub struct OfflineActionQueue {
    entries: Mutex<VecDeque<QueuedAction>>,
    storage: RwLock<Arc<dyn LocalStorage>>,
    degraded: AtomicBool,
    flushing: AtomicBool,
    monitor: Arc<NetworkMonitor>,
    events: Option<Arc<EventManager>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl std::fmt::Debug for OfflineActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineActionQueue")
            .field("persistent", &self.is_persistent())
            .field("flushing", &self.flushing.load(Ordering::SeqCst))
            .finish()
    }
}

impl OfflineActionQueue {
    /// 从本地存储恢复队列
    ///
    /// 持久化内容无法解析时丢弃并从空队列开始（只记录警告）。
    pub async fn load(
        storage: Arc<dyn LocalStorage>,
        monitor: Arc<NetworkMonitor>,
        events: Option<Arc<EventManager>>,
    ) -> Self {
        let (entries, degraded) = match storage.get(keys::OFFLINE_QUEUE, Value::Array(Vec::new())).await {
            Ok(value) => match serde_json::from_value::<Vec<QueuedAction>>(value) {
                Ok(entries) => (entries, false),
                Err(e) => {
                    warn!("⚠️ 离线队列数据损坏，已丢弃: {}", e);
                    (Vec::new(), false)
                }
            },
            Err(e) => {
                warn!("⚠️ 读取离线队列失败，降级为内存队列: {}", e);
                (Vec::new(), true)
            }
        };

        let next_seq = entries.iter().map(|e| e.seq).max().map(|s| s + 1).unwrap_or(1);
        if !entries.is_empty() {
            info!("🔄 恢复离线队列: {} 个待回放动作", entries.len());
        }

        let storage: Arc<dyn LocalStorage> = if degraded {
            Arc::new(MemoryKvStore::new())
        } else {
            storage
        };

        Self {
            entries: Mutex::new(entries.into_iter().collect()),
            storage: RwLock::new(storage),
            degraded: AtomicBool::new(degraded),
            flushing: AtomicBool::new(false),
            monitor,
            events,
            next_seq: std::sync::atomic::AtomicU64::new(next_seq),
        }
    }

    /// 入队（仅允许离线时调用）
    pub async fn enqueue(&self, action: OfflineAction) -> Result<QueuedAction> {
        if self.monitor.is_online() {
            return Err(MeetchatSDKError::InvalidOperation(
                "enqueue is only valid while offline; dispatch directly instead".to_string(),
            ));
        }
        self.push(action).await
    }

    /// 传输层不可用时（网络在线但连接未就绪）暂存动作
    pub(crate) async fn defer(&self, action: OfflineAction) -> Result<QueuedAction> {
        self.push(action).await
    }

    async fn push(&self, action: OfflineAction) -> Result<QueuedAction> {
        let entry = QueuedAction {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            action,
            enqueued_at: now_millis(),
        };

        let length = {
            let mut entries = self.entries.lock().await;
            entries.push_back(entry.clone());
            self.persist(&entries).await;
            entries.len()
        };

        debug!(
            "📥 动作入队: seq={}, kind={}, channel={}, 队列长度={}",
            entry.seq,
            entry.action.kind(),
            entry.action.channel_id(),
            length
        );
        self.emit_length(length);
        Ok(entry)
    }

    /// 按入队顺序回放全部动作，返回成功回放的数量
    ///
    /// 可重试的失败返回 `FlushPartialFailure`，失败动作及其后的动作保留在队列中；
    /// 其余失败丢弃该动作，发出 `ActionDropped` 事件后继续。
    pub async fn flush<R>(&self, replayer: &R) -> Result<usize>
    where
        R: ActionReplayer + ?Sized,
    {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("离线队列正在回放，跳过本次触发");
            return Ok(0);
        }
        let _guard = FlushGuard(&self.flushing);

        let snapshot: Vec<QueuedAction> = self.entries.lock().await.iter().cloned().collect();
        if snapshot.is_empty() {
            return Ok(0);
        }

        info!("🔄 开始回放离线队列: {} 个动作", snapshot.len());

        let mut confirmed = 0usize;
        let mut dropped = 0usize;
        let mut failure: Option<MeetchatSDKError> = None;
        for entry in &snapshot {
            match replayer.replay(&entry.action).await {
                Ok(()) => {
                    confirmed += 1;
                    self.remove_entry(entry.seq).await;
                }
                Err(e) if e.is_retryable() || matches!(e, MeetchatSDKError::ShuttingDown(_)) => {
                    warn!(
                        "⚠️ 回放失败，保留剩余动作: seq={}, kind={}, error={}",
                        entry.seq,
                        entry.action.kind(),
                        e
                    );
                    failure = Some(e);
                    break;
                }
                Err(e) => {
                    // 不可重试：丢弃该动作后继续回放
                    warn!(
                        "🗑️ 丢弃无法回放的动作: seq={}, kind={}, channel={}, error={}",
                        entry.seq,
                        entry.action.kind(),
                        entry.action.channel_id(),
                        e
                    );
                    replayer.discard(&entry.action, &e);
                    dropped += 1;
                    self.remove_entry(entry.seq).await;
                    self.emit(event_builders::action_dropped(
                        entry.action.kind(),
                        entry.action.channel_id(),
                        e.to_string(),
                    ));
                }
            }
        }

        let remaining = self.len().await;
        match failure {
            None => {
                info!("✅ 离线队列回放完成: {} 个动作, 丢弃 {} 个", confirmed, dropped);
                self.emit(event_builders::flush_completed(confirmed));
                Ok(confirmed)
            }
            Some(e) => {
                let reason = e.to_string();
                self.emit(event_builders::flush_partial_failure(confirmed, remaining, reason.clone()));
                Err(MeetchatSDKError::FlushPartialFailure {
                    replayed: confirmed,
                    remaining,
                    reason,
                })
            }
        }
    }

    /// 移除一个已处理的动作并立即持久化
    ///
    /// 回放中途进程退出时，已确认的动作不会在下次启动时重放。
    async fn remove_entry(&self, seq: u64) {
        let length = {
            let mut entries = self.entries.lock().await;
            let Some(position) = entries.iter().position(|e| e.seq == seq) else {
                return;
            };
            entries.remove(position);
            self.persist(&entries).await;
            entries.len()
        };
        self.emit_length(length);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// 当前队列快照（按入队顺序）
    pub async fn snapshot(&self) -> Vec<QueuedAction> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// 队列是否写入持久化存储（降级后为 false）
    pub fn is_persistent(&self) -> bool {
        !self.degraded.load(Ordering::SeqCst) && self.storage.read().is_persistent()
    }

    /// 整体写入；写入失败时切换为内存存储，本次会话内不再尝试持久化
    async fn persist(&self, entries: &VecDeque<QueuedAction>) {
        let value = match serde_json::to_value(entries) {
            Ok(value) => value,
            Err(e) => {
                error!("序列化离线队列失败: {}", e);
                return;
            }
        };

        let storage = self.storage.read().clone();
        let result = if entries.is_empty() {
            storage.remove(keys::OFFLINE_QUEUE).await
        } else {
            storage.set(keys::OFFLINE_QUEUE, value.clone()).await
        };

        if let Err(e) = result {
            warn!("⚠️ 离线队列持久化失败，降级为内存存储: {}", e);
            let memory: Arc<dyn LocalStorage> = Arc::new(MemoryKvStore::new());
            let _ = memory.set(keys::OFFLINE_QUEUE, value).await;
            *self.storage.write() = memory;
            self.degraded.store(true, Ordering::SeqCst);
        }
    }

    fn emit_length(&self, length: usize) {
        self.emit(event_builders::queue_length_changed(length));
    }

    fn emit(&self, event: crate::events::SdkEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SdkEvent;
    use crate::network::{HostNetworkSignal, NetworkStatus};
    use crate::storage::entities::AuthorRef;
    use crate::storage::kv::KvStore;
    use parking_lot::Mutex as SyncMutex;
    use tempfile::TempDir;

    /// 记录回放顺序
    ///
    /// `fail_on` 指定的内容返回可重试的传输错误，`reject_on` 指定的内容返回不可重试的错误，
    /// 对 `missing` 消息的表情反馈返回 `NotFound`。
    #[derive(Default)]
    struct RecordingReplayer {
        replayed: SyncMutex<Vec<String>>,
        discarded: SyncMutex<Vec<String>>,
        fail_on: SyncMutex<Option<String>>,
        reject_on: SyncMutex<Option<String>>,
    }

    #[async_trait]
    impl ActionReplayer for RecordingReplayer {
        async fn replay(&self, action: &OfflineAction) -> Result<()> {
            let message = match action {
                OfflineAction::SendMessage { message } => message,
                OfflineAction::React { message_id, .. } if message_id == "missing" => {
                    return Err(MeetchatSDKError::NotFound(format!("消息不存在: {}", message_id)));
                }
                OfflineAction::React { .. } => {
                    self.replayed.lock().push("react".to_string());
                    return Ok(());
                }
            };
            if self.fail_on.lock().as_deref() == Some(message.content.as_str()) {
                return Err(MeetchatSDKError::TransportUnavailable("socket closed".to_string()));
            }
            if self.reject_on.lock().as_deref() == Some(message.content.as_str()) {
                return Err(MeetchatSDKError::Protocol("payload rejected".to_string()));
            }
            self.replayed.lock().push(message.content.clone());
            Ok(())
        }

        fn discard(&self, action: &OfflineAction, _error: &MeetchatSDKError) {
            let label = match action {
                OfflineAction::SendMessage { message } => message.content.clone(),
                OfflineAction::React { .. } => "react".to_string(),
            };
            self.discarded.lock().push(label);
        }
    }

    /// 回放到指定内容时发出通知并永久挂起，模拟回放中途进程被杀
    struct StallingReplayer {
        stall_on: String,
        reached: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl ActionReplayer for StallingReplayer {
        async fn replay(&self, action: &OfflineAction) -> Result<()> {
            if let OfflineAction::SendMessage { message } = action {
                if message.content == self.stall_on {
                    self.reached.notify_one();
                    std::future::pending::<()>().await;
                }
            }
            Ok(())
        }
    }

    fn missing_reaction() -> OfflineAction {
        OfflineAction::React {
            message_id: "missing".to_string(),
            channel_id: "general".to_string(),
            reaction: Reaction::new("👍", AuthorRef::new("bob")),
            add: true,
        }
    }

    fn send(id: &str, content: &str) -> OfflineAction {
        OfflineAction::SendMessage {
            message: ChatMessage::compose(id, "general", content, AuthorRef::new("alice")),
        }
    }

    async fn offline_monitor() -> (Arc<HostNetworkSignal>, Arc<NetworkMonitor>) {
        let signal = Arc::new(HostNetworkSignal::new(NetworkStatus::Offline));
        let monitor = Arc::new(NetworkMonitor::new(signal.clone()));
        monitor.start().await.unwrap();
        (signal, monitor)
    }

    fn contents(entries: &[QueuedAction]) -> Vec<String> {
        entries
            .iter()
            .map(|e| match &e.action {
                OfflineAction::SendMessage { message } => message.content.clone(),
                OfflineAction::React { reaction, .. } => reaction.emoji.clone(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_enqueue_rejected_while_online() {
        let (_signal, monitor) = offline_monitor().await;
        monitor.set_status(NetworkStatus::Online);
        let queue = OfflineActionQueue::load(Arc::new(MemoryKvStore::new()), monitor, None).await;

        let err = queue.enqueue(send("m1", "hello")).await.unwrap_err();
        assert!(matches!(err, MeetchatSDKError::InvalidOperation(_)));
        assert!(queue.is_empty().await);

        // 传输层不可用时的内部暂存不受网络状态限制
        queue.defer(send("m1", "hello")).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_fifo_replay() {
        let (_signal, monitor) = offline_monitor().await;
        let queue = OfflineActionQueue::load(Arc::new(MemoryKvStore::new()), monitor, None).await;
        for (i, text) in ["A", "B", "C"].iter().enumerate() {
            queue.enqueue(send(&format!("m{}", i), text)).await.unwrap();
        }

        let replayer = RecordingReplayer::default();
        assert_eq!(queue.flush(&replayer).await.unwrap(), 3);
        assert_eq!(*replayer.replayed.lock(), vec!["A", "B", "C"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_partial_flush_keeps_suffix() {
        let (_signal, monitor) = offline_monitor().await;
        let events = Arc::new(EventManager::new(32));
        let mut rx = events.subscribe();
        let queue = OfflineActionQueue::load(Arc::new(MemoryKvStore::new()), monitor, Some(events)).await;
        for (i, text) in ["1", "2", "3"].iter().enumerate() {
            queue.enqueue(send(&format!("m{}", i), text)).await.unwrap();
        }

        let replayer = RecordingReplayer::default();
        *replayer.fail_on.lock() = Some("2".to_string());
        let err = queue.flush(&replayer).await.unwrap_err();
        assert!(matches!(
            err,
            MeetchatSDKError::FlushPartialFailure { replayed: 1, remaining: 2, .. }
        ));
        assert_eq!(contents(&queue.snapshot().await), vec!["2", "3"]);

        // 下一次恢复只回放剩余部分，已确认的 1 不会重放
        *replayer.fail_on.lock() = None;
        assert_eq!(queue.flush(&replayer).await.unwrap(), 2);
        assert_eq!(*replayer.replayed.lock(), vec!["1", "2", "3"]);

        let mut saw_partial = false;
        while let Ok(event) = rx.try_recv() {
            if let SdkEvent::FlushPartialFailure { replayed, remaining, .. } = event {
                assert_eq!((replayed, remaining), (1, 2));
                saw_partial = true;
            }
        }
        assert!(saw_partial);
    }

    #[tokio::test]
    async fn test_unreplayable_actions_are_dropped_and_flush_continues() {
        let (_signal, monitor) = offline_monitor().await;
        let events = Arc::new(EventManager::new(32));
        let mut rx = events.subscribe();
        let queue = OfflineActionQueue::load(Arc::new(MemoryKvStore::new()), monitor, Some(events)).await;
        queue.enqueue(send("m1", "A")).await.unwrap();
        queue.enqueue(missing_reaction()).await.unwrap();
        queue.enqueue(send("m2", "B")).await.unwrap();
        queue.enqueue(send("m3", "C")).await.unwrap();

        let replayer = RecordingReplayer::default();
        *replayer.reject_on.lock() = Some("B".to_string());
        assert_eq!(queue.flush(&replayer).await.unwrap(), 2);
        assert_eq!(*replayer.replayed.lock(), vec!["A", "C"]);
        assert_eq!(*replayer.discarded.lock(), vec!["react", "B"]);
        assert!(queue.is_empty().await);

        // 再次回放不会重试被丢弃的动作
        assert_eq!(queue.flush(&replayer).await.unwrap(), 0);
        assert_eq!(*replayer.replayed.lock(), vec!["A", "C"]);

        let mut dropped = Vec::new();
        let mut completed = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                SdkEvent::ActionDropped { kind, channel_id, .. } => {
                    assert_eq!(channel_id, "general");
                    dropped.push(kind);
                }
                SdkEvent::FlushCompleted { replayed, .. } => completed = Some(replayed),
                SdkEvent::FlushPartialFailure { .. } => panic!("dropped actions must not stop the flush"),
                _ => {}
            }
        }
        assert_eq!(dropped, vec!["react", "send_message"]);
        assert_eq!(completed, Some(2));
    }

    #[tokio::test]
    async fn test_transport_failure_after_dropped_action_keeps_suffix() {
        let (_signal, monitor) = offline_monitor().await;
        let queue = OfflineActionQueue::load(Arc::new(MemoryKvStore::new()), monitor, None).await;
        queue.enqueue(missing_reaction()).await.unwrap();
        queue.enqueue(send("m1", "1")).await.unwrap();
        queue.enqueue(send("m2", "2")).await.unwrap();

        let replayer = RecordingReplayer::default();
        *replayer.fail_on.lock() = Some("2".to_string());
        let err = queue.flush(&replayer).await.unwrap_err();
        assert!(matches!(
            err,
            MeetchatSDKError::FlushPartialFailure { replayed: 1, remaining: 1, .. }
        ));
        assert_eq!(contents(&queue.snapshot().await), vec!["2"]);
    }

    #[tokio::test]
    async fn test_confirmed_actions_are_persisted_during_flush() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryKvStore::new());
        let (_signal, monitor) = offline_monitor().await;
        let queue = Arc::new(OfflineActionQueue::load(storage.clone(), monitor.clone(), None).await);
        for (i, text) in ["1", "2", "3"].iter().enumerate() {
            queue.enqueue(send(&format!("m{}", i), text)).await.unwrap();
        }

        let reached = Arc::new(tokio::sync::Notify::new());
        let replayer = StallingReplayer {
            stall_on: "2".to_string(),
            reached: reached.clone(),
        };
        let flushing = queue.clone();
        let task = tokio::spawn(async move { flushing.flush(&replayer).await });

        tokio::time::timeout(std::time::Duration::from_secs(5), reached.notified())
            .await
            .unwrap();

        // 第二个动作仍在回放时，第一个动作已从持久化数据中移除
        let raw = storage.get(keys::OFFLINE_QUEUE, Value::Null).await.unwrap();
        assert_eq!(raw.as_array().map(|a| a.len()), Some(2));

        task.abort();
        let _ = task.await;

        // 此时重启只会恢复未确认的动作
        let restored = OfflineActionQueue::load(storage, monitor, None).await;
        assert_eq!(contents(&restored.snapshot().await), vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_empty_flush_has_no_side_effects() {
        let (_signal, monitor) = offline_monitor().await;
        let events = Arc::new(EventManager::new(8));
        let mut rx = events.subscribe();
        let queue = OfflineActionQueue::load(Arc::new(MemoryKvStore::new()), monitor, Some(events.clone())).await;

        let replayer = RecordingReplayer::default();
        assert_eq!(queue.flush(&replayer).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(events.get_stats().total_events, 0);
    }

    #[tokio::test]
    async fn test_queue_survives_reload() {
        let temp_dir = TempDir::new().unwrap();
        let (_signal, monitor) = offline_monitor().await;
        {
            let storage: Arc<dyn LocalStorage> = Arc::new(KvStore::new(temp_dir.path()).await.unwrap());
            let queue = OfflineActionQueue::load(storage, monitor.clone(), None).await;
            queue.enqueue(send("m1", "first")).await.unwrap();
            queue.enqueue(send("m2", "second")).await.unwrap();
            assert!(queue.is_persistent());
        }

        let storage: Arc<dyn LocalStorage> = Arc::new(KvStore::new(temp_dir.path()).await.unwrap());
        let queue = OfflineActionQueue::load(storage, monitor, None).await;
        let restored = queue.snapshot().await;
        assert_eq!(contents(&restored), vec!["first", "second"]);

        // 恢复后的序号继续递增
        let next = queue.enqueue(send("m3", "third")).await.unwrap();
        assert!(next.seq > restored[1].seq);
    }

    #[tokio::test]
    async fn test_react_action_roundtrips_through_storage() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryKvStore::new());
        let (_signal, monitor) = offline_monitor().await;
        let queue = OfflineActionQueue::load(storage.clone(), monitor.clone(), None).await;
        queue
            .enqueue(OfflineAction::React {
                message_id: "m1".to_string(),
                channel_id: "general".to_string(),
                reaction: Reaction::new("🎉", AuthorRef::new("bob")),
                add: true,
            })
            .await
            .unwrap();

        let raw = storage.get(keys::OFFLINE_QUEUE, Value::Null).await.unwrap();
        assert_eq!(raw[0]["action"]["kind"], "react");

        let reloaded = OfflineActionQueue::load(storage, monitor, None).await;
        assert_eq!(contents(&reloaded.snapshot().await), vec!["🎉"]);
    }

    #[derive(Debug)]
    struct BrokenStorage;

    #[async_trait]
    impl LocalStorage for BrokenStorage {
        async fn set(&self, _key: &str, _value: Value) -> Result<()> {
            Err(MeetchatSDKError::KvStore("quota exceeded".to_string()))
        }

        async fn get(&self, _key: &str, default: Value) -> Result<Value> {
            Ok(default)
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(MeetchatSDKError::KvStore("quota exceeded".to_string()))
        }

        fn is_persistent(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_degrades_to_memory() {
        let (_signal, monitor) = offline_monitor().await;
        let queue = OfflineActionQueue::load(Arc::new(BrokenStorage), monitor, None).await;
        assert!(queue.is_persistent());

        queue.enqueue(send("m1", "still queued")).await.unwrap();
        assert!(!queue.is_persistent());
        assert_eq!(queue.len().await, 1);

        let replayer = RecordingReplayer::default();
        assert_eq!(queue.flush(&replayer).await.unwrap(), 1);
        assert!(queue.is_empty().await);
    }
}

//! 频道消息存储
//!
//! ChatStore 是频道消息历史的权威内存视图：
//! - 按频道保存有序消息序列，在频道内按 `id` 幂等插入（重连回放的重复投递会被忽略）
//! - 不同频道允许出现相同 `id`，需要精确定位时使用带 `_in` 后缀的方法
//! - 投递状态只前进不回退（Delivered / Failed 为最终状态）
//! - 频道订阅者按变更发生的顺序收到通知
//!
//! 回调在变更所在的任务上、持有存储锁之外执行，因此回调内部可以再次读写存储。

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::storage::entities::{ChatMessage, DeliveryStatus, Reaction};

/// 订阅回调：`(message) -> ()`
pub type MessageCallback = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

/// 状态变更观察者：`(message_id, old, new)`
pub type StatusObserver = Arc<dyn Fn(&ChatMessage, DeliveryStatus) + Send + Sync>;

/// append 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// 已存在相同 id 的消息，忽略
    Duplicate,
}

/// update_status 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied {
        old: DeliveryStatus,
        new: DeliveryStatus,
    },
    /// 目标状态与当前状态相同
    Unchanged,
    /// 非法转换（例如从 Delivered 回退），保持原状态
    Rejected { current: DeliveryStatus },
    UnknownMessage,
}

impl StatusChange {
    pub fn is_applied(&self) -> bool {
        matches!(self, StatusChange::Applied { .. })
    }
}

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: MessageCallback,
}

#[derive(Default)]
struct ChannelState {
    messages: Vec<ChatMessage>,
    /// message_id -> 序列下标
    index: HashMap<String, usize>,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
struct StoreState {
    channels: HashMap<String, ChannelState>,
    /// message_id -> 包含该 id 的频道（按首次写入顺序）
    homes: HashMap<String, Vec<String>>,
}

impl StoreState {
    /// 定位消息；未指定频道时取最早写入该 id 的频道
    fn locate(&self, channel_id: Option<&str>, message_id: &str) -> Option<(String, usize)> {
        let channel_id = match channel_id {
            Some(channel_id) => channel_id.to_string(),
            None => self.homes.get(message_id)?.first()?.clone(),
        };
        let position = *self.channels.get(&channel_id)?.index.get(message_id)?;
        Some((channel_id, position))
    }
}

struct Notification {
    targets: Vec<(Arc<AtomicBool>, MessageCallback)>,
    message: ChatMessage,
}

struct StoreInner {
    state: Mutex<StoreState>,
    pending: Mutex<VecDeque<Notification>>,
    dispatching: Mutex<()>,
    next_subscriber_id: AtomicU64,
    status_observer: Option<StatusObserver>,
}

/// 频道消息存储（可廉价克隆，所有克隆共享同一份数据）
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChatStore")
            .field("channels", &state.channels.len())
            .field("messages", &state.channels.values().map(|c| c.messages.len()).sum::<usize>())
            .finish()
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// 创建带状态观察者的存储（SDK 用它把状态变更转发到事件系统）
    pub fn with_status_observer(observer: StatusObserver) -> Self {
        Self::build(Some(observer))
    }

    fn build(status_observer: Option<StatusObserver>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                pending: Mutex::new(VecDeque::new()),
                dispatching: Mutex::new(()),
                next_subscriber_id: AtomicU64::new(1),
                status_observer,
            }),
        }
    }

    /// 追加消息到频道末尾；同一频道内相同 id 已存在时忽略
    pub fn append(&self, message: ChatMessage) -> AppendOutcome {
        {
            let mut state = self.inner.state.lock();
            let channel_id = message.channel_id.clone();
            let channel = state.channels.entry(channel_id.clone()).or_default();
            if channel.index.contains_key(&message.id) {
                debug!("🔄 忽略重复消息: id={}, channel={}", message.id, message.channel_id);
                return AppendOutcome::Duplicate;
            }

            let position = channel.messages.len();
            channel.messages.push(message.clone());
            channel.index.insert(message.id.clone(), position);
            let targets = Self::targets_of(channel);
            state.homes.entry(message.id.clone()).or_default().push(channel_id);

            self.queue_notification(targets, message);
        }

        self.dispatch_pending();
        AppendOutcome::Appended
    }

    /// 更新投递状态；不允许的转换（如从 Delivered 回退）为空操作
    pub fn update_status(&self, message_id: &str, new_status: DeliveryStatus) -> StatusChange {
        self.apply_status(None, message_id, new_status)
    }

    /// 更新指定频道内消息的投递状态
    pub fn update_status_in(&self, channel_id: &str, message_id: &str, new_status: DeliveryStatus) -> StatusChange {
        self.apply_status(Some(channel_id), message_id, new_status)
    }

    fn apply_status(&self, scope: Option<&str>, message_id: &str, new_status: DeliveryStatus) -> StatusChange {
        let (change, updated) = {
            let mut state = self.inner.state.lock();
            let Some((channel_id, position)) = state.locate(scope, message_id) else {
                debug!("更新未知消息的状态: id={}", message_id);
                return StatusChange::UnknownMessage;
            };
            let Some(channel) = state.channels.get_mut(&channel_id) else {
                return StatusChange::UnknownMessage;
            };
            let targets = Self::targets_of(channel);
            let Some(message) = channel.messages.get_mut(position) else {
                return StatusChange::UnknownMessage;
            };

            let current = message.status;
            if current == new_status {
                return StatusChange::Unchanged;
            }
            if !current.can_transition_to(new_status) {
                debug!(
                    "拒绝状态回退: id={}, {} -> {}",
                    message_id, current, new_status
                );
                return StatusChange::Rejected { current };
            }

            message.status = new_status;
            let updated = message.clone();
            self.queue_notification(targets, updated.clone());
            (
                StatusChange::Applied {
                    old: current,
                    new: new_status,
                },
                updated,
            )
        };

        if let (Some(observer), StatusChange::Applied { old, .. }) = (&self.inner.status_observer, change) {
            observer(&updated, old);
        }
        self.dispatch_pending();
        change
    }

    /// 添加表情反馈（同一 emoji + 操作者只记录一次）
    pub fn add_reaction(&self, message_id: &str, reaction: Reaction) -> bool {
        self.mutate_reactions(None, message_id, |message| message.reactions.insert(reaction))
    }

    pub fn add_reaction_in(&self, channel_id: &str, message_id: &str, reaction: Reaction) -> bool {
        self.mutate_reactions(Some(channel_id), message_id, |message| message.reactions.insert(reaction))
    }

    /// 移除表情反馈
    pub fn remove_reaction(&self, message_id: &str, reaction: &Reaction) -> bool {
        self.mutate_reactions(None, message_id, |message| message.reactions.remove(reaction))
    }

    pub fn remove_reaction_in(&self, channel_id: &str, message_id: &str, reaction: &Reaction) -> bool {
        self.mutate_reactions(Some(channel_id), message_id, |message| message.reactions.remove(reaction))
    }

    fn mutate_reactions<F>(&self, scope: Option<&str>, message_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut ChatMessage) -> bool,
    {
        {
            let mut state = self.inner.state.lock();
            let Some((channel_id, position)) = state.locate(scope, message_id) else {
                return false;
            };
            let Some(channel) = state.channels.get_mut(&channel_id) else {
                return false;
            };
            let targets = Self::targets_of(channel);
            let Some(message) = channel.messages.get_mut(position) else {
                return false;
            };
            if !apply(message) {
                return false;
            }
            let updated = message.clone();
            self.queue_notification(targets, updated);
        }

        self.dispatch_pending();
        true
    }

    /// 合并服务端历史：未知消息按顺序追加，已知消息只推进状态
    pub fn merge_history(&self, messages: Vec<ChatMessage>) -> usize {
        let mut appended = 0;
        for message in messages {
            let status = message.status;
            let id = message.id.clone();
            let channel_id = message.channel_id.clone();
            match self.append(message) {
                AppendOutcome::Appended => appended += 1,
                AppendOutcome::Duplicate => {
                    self.update_status_in(&channel_id, &id, status);
                }
            }
        }
        appended
    }

    /// 频道历史快照（按插入顺序）
    pub fn get_history(&self, channel_id: &str) -> Vec<ChatMessage> {
        let state = self.inner.state.lock();
        state
            .channels
            .get(channel_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// 按 id 查找消息（多个频道存在同一 id 时返回最早写入的那条）
    pub fn get_message(&self, message_id: &str) -> Option<ChatMessage> {
        self.find(None, message_id)
    }

    pub fn get_message_in(&self, channel_id: &str, message_id: &str) -> Option<ChatMessage> {
        self.find(Some(channel_id), message_id)
    }

    fn find(&self, scope: Option<&str>, message_id: &str) -> Option<ChatMessage> {
        let state = self.inner.state.lock();
        let (channel_id, position) = state.locate(scope, message_id)?;
        state.channels.get(&channel_id)?.messages.get(position).cloned()
    }

    pub fn message_count(&self, channel_id: &str) -> usize {
        let state = self.inner.state.lock();
        state.channels.get(channel_id).map(|c| c.messages.len()).unwrap_or(0)
    }

    /// 当前有订阅者的频道（重连后用于重新订阅）
    pub fn subscribed_channels(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut channels: Vec<String> = state
            .channels
            .iter()
            .filter(|(_, c)| !c.subscribers.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        channels.sort();
        channels
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        let state = self.inner.state.lock();
        state.channels.get(channel_id).map(|c| c.subscribers.len()).unwrap_or(0)
    }

    /// 订阅频道的新消息和状态更新
    ///
    /// 返回的句柄被释放（drop 或 `release`）后回调不会再被调用。
    pub fn subscribe(&self, channel_id: &str, callback: MessageCallback) -> SubscriptionHandle {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        {
            let mut state = self.inner.state.lock();
            state
                .channels
                .entry(channel_id.to_string())
                .or_default()
                .subscribers
                .push(Subscriber {
                    id,
                    active: active.clone(),
                    callback,
                });
        }
        debug!("频道订阅: channel={}, subscription={}", channel_id, id);

        SubscriptionHandle {
            store: Arc::downgrade(&self.inner),
            channel_id: channel_id.to_string(),
            id,
            armed: true,
        }
    }

    /// 取消单个订阅；未注册的订阅为空操作
    pub fn unsubscribe(&self, channel_id: &str, subscription_id: u64) -> bool {
        remove_subscriber(&self.inner, channel_id, subscription_id)
    }

    /// 取消频道上的全部订阅，返回被移除的数量
    pub fn unsubscribe_channel(&self, channel_id: &str) -> usize {
        let mut state = self.inner.state.lock();
        let Some(channel) = state.channels.get_mut(channel_id) else {
            return 0;
        };
        let removed = channel.subscribers.len();
        for subscriber in channel.subscribers.drain(..) {
            subscriber.active.store(false, Ordering::SeqCst);
        }
        if removed > 0 {
            info!("频道订阅已全部取消: channel={}, count={}", channel_id, removed);
        }
        removed
    }

    fn targets_of(channel: &ChannelState) -> Vec<(Arc<AtomicBool>, MessageCallback)> {
        channel
            .subscribers
            .iter()
            .map(|s| (s.active.clone(), s.callback.clone()))
            .collect()
    }

    /// 必须在持有 state 锁时调用，保证通知顺序与变更顺序一致
    fn queue_notification(&self, targets: Vec<(Arc<AtomicBool>, MessageCallback)>, message: ChatMessage) {
        if targets.is_empty() {
            return;
        }
        self.inner.pending.lock().push_back(Notification { targets, message });
    }

    /// 依次派发待处理通知。已有派发者时直接返回，由其负责排空队列。
    fn dispatch_pending(&self) {
        loop {
            let Some(guard) = self.inner.dispatching.try_lock() else {
                return;
            };

            loop {
                let next = self.inner.pending.lock().pop_front();
                let Some(notification) = next else {
                    break;
                };
                for (active, callback) in &notification.targets {
                    if active.load(Ordering::SeqCst) {
                        callback(&notification.message);
                    }
                }
            }

            drop(guard);
            if self.inner.pending.lock().is_empty() {
                return;
            }
        }
    }
}

fn remove_subscriber(inner: &StoreInner, channel_id: &str, subscription_id: u64) -> bool {
    let mut state = inner.state.lock();
    let Some(channel) = state.channels.get_mut(channel_id) else {
        return false;
    };
    let Some(index) = channel.subscribers.iter().position(|s| s.id == subscription_id) else {
        return false;
    };
    let subscriber = channel.subscribers.remove(index);
    subscriber.active.store(false, Ordering::SeqCst);
    debug!("取消订阅: channel={}, subscription={}", channel_id, subscription_id);
    true
}

/// 订阅句柄
///
/// drop 时自动取消订阅；调用 `detach` 则保留订阅直到频道被整体取消订阅。
#[must_use = "丢弃句柄会立即取消订阅"]
pub struct SubscriptionHandle {
    store: Weak<StoreInner>,
    channel_id: String,
    id: u64,
    armed: bool,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// 立即取消订阅
    pub fn release(mut self) {
        self.release_inner();
    }

    /// 放弃句柄但保留订阅
    pub fn detach(mut self) {
        self.armed = false;
    }

    fn release_inner(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Some(inner) = self.store.upgrade() {
            remove_subscriber(&inner, &self.channel_id, self.id);
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel_id", &self.channel_id)
            .field("id", &self.id)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entities::AuthorRef;

    fn message(id: &str, channel: &str, content: &str) -> ChatMessage {
        ChatMessage::compose(id, channel, content, AuthorRef::new("alice"))
    }

    fn recorder() -> (Arc<Mutex<Vec<(String, DeliveryStatus)>>>, MessageCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: MessageCallback = Arc::new(move |m: &ChatMessage| {
            sink.lock().push((m.id.clone(), m.status));
        });
        (seen, callback)
    }

    #[test]
    fn test_idempotent_append() {
        let store = ChatStore::new();
        assert_eq!(store.append(message("m1", "general", "hi")), AppendOutcome::Appended);
        assert_eq!(store.append(message("m2", "general", "there")), AppendOutcome::Appended);

        let before: Vec<String> = store.get_history("general").into_iter().map(|m| m.id).collect();
        assert_eq!(store.append(message("m1", "general", "hi again")), AppendOutcome::Duplicate);
        let after: Vec<String> = store.get_history("general").into_iter().map(|m| m.id).collect();

        assert_eq!(before, after);
        assert_eq!(store.message_count("general"), 2);
        assert_eq!(store.get_message("m1").unwrap().content, "hi");
    }

    #[test]
    fn test_same_id_in_different_channels() {
        let store = ChatStore::new();
        assert_eq!(store.append(message("X", "a", "in a")), AppendOutcome::Appended);
        assert_eq!(store.append(message("X", "b", "in b")), AppendOutcome::Appended);
        assert_eq!(store.append(message("X", "b", "again")), AppendOutcome::Duplicate);

        assert_eq!(store.message_count("a"), 1);
        assert_eq!(store.message_count("b"), 1);
        assert_eq!(store.get_message_in("b", "X").unwrap().content, "in b");
        assert_eq!(store.get_message("X").unwrap().content, "in a");

        // 频道限定的更新只影响该频道
        assert!(store.update_status_in("b", "X", DeliveryStatus::Sent).is_applied());
        assert_eq!(store.get_message_in("a", "X").unwrap().status, DeliveryStatus::Queued);
        assert_eq!(store.get_message_in("b", "X").unwrap().status, DeliveryStatus::Sent);
        assert_eq!(
            store.update_status_in("c", "X", DeliveryStatus::Sent),
            StatusChange::UnknownMessage
        );

        let thumbs = Reaction::new("👍", AuthorRef::new("bob"));
        assert!(store.add_reaction_in("b", "X", thumbs.clone()));
        assert_eq!(store.get_message_in("a", "X").unwrap().reaction_count("👍"), 0);
        assert!(store.remove_reaction_in("b", "X", &thumbs));

        let mut delivered = message("X", "b", "in b");
        delivered.status = DeliveryStatus::Delivered;
        assert_eq!(store.merge_history(vec![delivered]), 0);
        assert_eq!(store.get_message_in("b", "X").unwrap().status, DeliveryStatus::Delivered);
        assert_eq!(store.get_message_in("a", "X").unwrap().status, DeliveryStatus::Queued);
    }

    #[test]
    fn test_status_never_regresses_from_delivered() {
        let store = ChatStore::new();
        store.append(message("m1", "general", "hi"));

        assert!(store.update_status("m1", DeliveryStatus::Sent).is_applied());
        assert!(store.update_status("m1", DeliveryStatus::Delivered).is_applied());
        assert_eq!(
            store.update_status("m1", DeliveryStatus::Sent),
            StatusChange::Rejected { current: DeliveryStatus::Delivered }
        );
        assert_eq!(
            store.update_status("m1", DeliveryStatus::Failed),
            StatusChange::Rejected { current: DeliveryStatus::Delivered }
        );
        assert_eq!(store.update_status("m1", DeliveryStatus::Delivered), StatusChange::Unchanged);
        assert_eq!(store.update_status("nope", DeliveryStatus::Sent), StatusChange::UnknownMessage);
        assert_eq!(store.get_message("m1").unwrap().status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_observed_status_sequence_is_monotonic() {
        let store = ChatStore::new();
        let (seen, callback) = recorder();
        let _handle = store.subscribe("general", callback);

        store.append(message("m1", "general", "hi"));
        store.update_status("m1", DeliveryStatus::Sent);
        store.update_status("m1", DeliveryStatus::Queued);
        store.update_status("m1", DeliveryStatus::Delivered);
        store.update_status("m1", DeliveryStatus::Failed);

        let statuses: Vec<DeliveryStatus> = seen.lock().iter().map(|(_, s)| *s).collect();
        assert_eq!(
            statuses,
            vec![DeliveryStatus::Queued, DeliveryStatus::Sent, DeliveryStatus::Delivered]
        );
    }

    #[test]
    fn test_subscriber_ordering() {
        let store = ChatStore::new();
        let (first, cb1) = recorder();
        let (second, cb2) = recorder();
        let _h1 = store.subscribe("x", cb1);
        let _h2 = store.subscribe("x", cb2);

        store.append(message("M1", "x", "one"));
        store.append(message("M2", "x", "two"));
        store.append(message("other", "y", "elsewhere"));

        for seen in [first, second] {
            let ids: Vec<String> = seen.lock().iter().map(|(id, _)| id.clone()).collect();
            assert_eq!(ids, vec!["M1".to_string(), "M2".to_string()]);
        }
    }

    #[test]
    fn test_released_handle_stops_callbacks() {
        let store = ChatStore::new();
        let (seen, callback) = recorder();
        let handle = store.subscribe("general", callback);

        store.append(message("m1", "general", "hi"));
        handle.release();
        store.append(message("m2", "general", "bye"));

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(store.subscriber_count("general"), 0);
        // 重复取消是空操作
        assert!(!store.unsubscribe("general", 999));
        assert!(!store.unsubscribe("unknown", 1));
    }

    #[test]
    fn test_dropped_handle_unsubscribes_and_detach_keeps() {
        let store = ChatStore::new();
        let (dropped_seen, cb1) = recorder();
        let (kept_seen, cb2) = recorder();
        {
            let _scoped = store.subscribe("general", cb1);
        }
        store.subscribe("general", cb2).detach();

        store.append(message("m1", "general", "hi"));
        assert!(dropped_seen.lock().is_empty());
        assert_eq!(kept_seen.lock().len(), 1);

        assert_eq!(store.unsubscribe_channel("general"), 1);
        store.append(message("m2", "general", "bye"));
        assert_eq!(kept_seen.lock().len(), 1);
    }

    #[test]
    fn test_reentrant_callback_keeps_order() {
        let store = ChatStore::new();
        let (seen, recorder_cb) = recorder();
        let _h1 = store.subscribe("general", recorder_cb);

        // 收到 m1 时回调内部追加 m2，m2 的通知必须排在 m1 之后
        let inner_store = store.clone();
        let reentrant: MessageCallback = Arc::new(move |m: &ChatMessage| {
            if m.id == "m1" && m.status == DeliveryStatus::Queued {
                inner_store.append(ChatMessage::compose("m2", "general", "echo", AuthorRef::new("bot")));
            }
        });
        let _h2 = store.subscribe("general", reentrant);

        store.append(message("m1", "general", "hi"));

        let ids: Vec<String> = seen.lock().iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn test_reactions_are_a_set() {
        let store = ChatStore::new();
        let (seen, callback) = recorder();
        let _handle = store.subscribe("general", callback);
        store.append(message("m1", "general", "hi"));

        let thumbs = Reaction::new("👍", AuthorRef::new("bob"));
        assert!(store.add_reaction("m1", thumbs.clone()));
        assert!(!store.add_reaction("m1", thumbs.clone()));
        assert!(store.add_reaction("m1", Reaction::new("👍", AuthorRef::new("carol"))));
        assert_eq!(store.get_message("m1").unwrap().reaction_count("👍"), 2);

        assert!(store.remove_reaction("m1", &thumbs));
        assert!(!store.remove_reaction("m1", &thumbs));
        assert!(!store.add_reaction("missing", thumbs));
        assert_eq!(store.get_message("m1").unwrap().reaction_count("👍"), 1);

        // append + 2 次添加 + 1 次移除
        assert_eq!(seen.lock().len(), 4);
    }

    #[test]
    fn test_merge_history_advances_known_messages() {
        let store = ChatStore::new();
        store.append(message("m1", "general", "hi"));

        let mut delivered = message("m1", "general", "hi");
        delivered.status = DeliveryStatus::Delivered;
        let mut remote = message("r1", "general", "from server");
        remote.status = DeliveryStatus::Delivered;

        assert_eq!(store.merge_history(vec![delivered, remote]), 1);
        let history = store.get_history("general");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, DeliveryStatus::Delivered);
        assert_eq!(history[1].id, "r1");
    }

    #[test]
    fn test_status_observer_sees_transitions() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = transitions.clone();
        let store = ChatStore::with_status_observer(Arc::new(move |m: &ChatMessage, old| {
            sink.lock().push((m.id.clone(), old, m.status));
        }));

        store.append(message("m1", "general", "hi"));
        store.update_status("m1", DeliveryStatus::Sent);
        store.update_status("m1", DeliveryStatus::Sent);

        assert_eq!(
            *transitions.lock(),
            vec![("m1".to_string(), DeliveryStatus::Queued, DeliveryStatus::Sent)]
        );
    }

    #[test]
    fn test_subscribed_channels() {
        let store = ChatStore::new();
        let (_, cb) = recorder();
        let _a = store.subscribe("b-room", cb.clone());
        let _b = store.subscribe("a-room", cb);
        store.append(message("m1", "silent", "no listeners"));
        assert_eq!(store.subscribed_channels(), vec!["a-room".to_string(), "b-room".to_string()]);
    }
}

//! 远程聊天服务
//!
//! 持有一条到实时端点的链路，由后台监督任务维护：
//! - 首次连接失败或链路意外断开后，按固定间隔重连，次数有上限
//! - 次数用尽进入 Failed，直到 `reset_reconnect()`（网络恢复）才开始新一轮
//! - 每次连上后为所有有订阅者的频道重新发送 `Subscribe`
//!
//! 发送通过发送锁串行化，存储中的顺序与帧写出的顺序一致。

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection_state::{ConnectionBackend, ConnectionStateManager};
use crate::error::{MeetchatSDKError, Result};
use crate::events::{event_builders, EventManager};
use crate::storage::chat_store::{AppendOutcome, ChatStore, MessageCallback, SubscriptionHandle};
use crate::storage::entities::{ChatMessage, DeliveryStatus, Reaction};
use crate::transport::link::{Connector, LinkWriter};
use crate::transport::protocol::{ClientFrame, ServerFrame};
use crate::transport::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::transport::ChatService;

/// 链路结束的原因
enum LinkExit {
    Closed,
    Shutdown,
}

struct RemoteInner {
    endpoint: String,
    connector: Arc<dyn Connector>,
    store: ChatStore,
    connection: ConnectionStateManager,
    policy: ReconnectPolicy,
    writer: RwLock<Option<LinkWriter>>,
    send_lock: tokio::sync::Mutex<()>,
    pending_history: Mutex<HashMap<String, oneshot::Sender<Vec<ChatMessage>>>>,
    history_timeout: Duration,
    wake: Notify,
    shutdown: CancellationToken,
    events: Option<Arc<EventManager>>,
}

/// WebSocket 实时端点上的聊天服务
pub struct RemoteChatService {
    inner: Arc<RemoteInner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RemoteChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChatService")
            .field("endpoint", &self.inner.endpoint)
            .field("status", &self.inner.connection.status())
            .finish()
    }
}

impl RemoteChatService {
    pub fn new(
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        store: ChatStore,
        reconnect: ReconnectConfig,
        history_timeout: Duration,
        events: Option<Arc<EventManager>>,
    ) -> Self {
        let endpoint = endpoint.into();
        let connection =
            ConnectionStateManager::new(ConnectionBackend::WebSocket, endpoint.clone(), reconnect.max_attempts);
        Self {
            inner: Arc::new(RemoteInner {
                endpoint,
                connector,
                store,
                connection,
                policy: ReconnectPolicy::new(reconnect),
                writer: RwLock::new(None),
                send_lock: tokio::sync::Mutex::new(()),
                pending_history: Mutex::new(HashMap::new()),
                history_timeout,
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                events,
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    pub fn is_connected(&self) -> bool {
        self.inner.writer.read().is_some()
    }

    fn current_writer(&self) -> Result<LinkWriter> {
        self.inner
            .writer
            .read()
            .clone()
            .ok_or_else(|| MeetchatSDKError::TransportUnavailable(format!("未连接: {}", self.inner.endpoint)))
    }

    /// 写出一帧（调用方需持有发送锁）
    async fn write_frame(&self, writer: &LinkWriter, frame: &ClientFrame) -> Result<()> {
        let text = frame.to_text()?;
        let bytes = text.len() as u64;
        writer.send_text(text).await.map_err(|e| match e {
            MeetchatSDKError::TransportUnavailable(_) => e,
            other => MeetchatSDKError::TransportUnavailable(other.to_string()),
        })?;
        self.inner.connection.increment_sent(bytes);
        Ok(())
    }

    async fn send_control(&self, frame: ClientFrame) -> Result<()> {
        let _guard = self.inner.send_lock.lock().await;
        let writer = self.current_writer()?;
        self.write_frame(&writer, &frame).await
    }
}

impl RemoteInner {
    /// 监督任务：连接、读取、断线重连
    async fn supervise(self: Arc<Self>) {
        self.connection.mark_connecting();
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.connector.connect(&self.endpoint) => result,
            };

            match connected {
                Ok(link) => {
                    let (writer, reader) = link.split();
                    self.policy.mark_success();
                    *self.writer.write() = Some(writer.clone());
                    self.connection.mark_connected();
                    info!("✅ 实时通道已连接: {}", self.endpoint);

                    self.resubscribe(&writer).await;

                    let exit = self.read_loop(reader).await;
                    *self.writer.write() = None;
                    self.fail_pending_history();
                    match exit {
                        LinkExit::Shutdown => break,
                        LinkExit::Closed => {
                            warn!("⚠️ 实时通道意外断开: {}", self.endpoint);
                            self.connection.mark_disconnected(Some("链路断开".to_string()));
                        }
                    }
                }
                Err(e) => {
                    warn!("⚠️ 连接 {} 失败: {}", self.endpoint, e);
                    self.connection.record_error(e.to_string());
                }
            }

            if !self.wait_before_retry().await {
                break;
            }
        }

        *self.writer.write() = None;
        self.connection.mark_disconnected(None);
        debug!("监督任务退出: {}", self.endpoint);
    }

    /// 等待下一次重连时机；返回 false 表示应当退出
    async fn wait_before_retry(&self) -> bool {
        match self.policy.next_attempt() {
            Some((attempt, delay)) => {
                self.connection.mark_reconnecting(attempt);
                tokio::select! {
                    _ = self.shutdown.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                    _ = self.wake.notified() => true,
                }
            }
            None => {
                let attempts = self.policy.config().max_attempts;
                error!("❌ 重连 {} 次后仍失败，等待网络恢复: {}", attempts, self.endpoint);
                self.connection
                    .mark_failed(MeetchatSDKError::ReconnectExhausted { attempts }.to_string());
                loop {
                    let notified = self.wake.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if !self.policy.is_exhausted() {
                        return true;
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return false,
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    async fn read_loop(&self, mut reader: mpsc::Receiver<String>) -> LinkExit {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return LinkExit::Shutdown,
                text = reader.recv() => match text {
                    Some(text) => self.handle_frame(&text),
                    None => return LinkExit::Closed,
                },
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        self.connection.increment_received(text.len() as u64);
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("⚠️ 忽略无法解析的帧: {}", e);
                return;
            }
        };

        match frame {
            ServerFrame::Delivered { message_id, channel_id } => {
                self.store
                    .update_status_in(&channel_id, &message_id, DeliveryStatus::Delivered);
            }
            ServerFrame::Message { mut message } => {
                if !message.status.is_final_state() {
                    message.status = DeliveryStatus::Delivered;
                }
                let id = message.id.clone();
                let channel_id = message.channel_id.clone();
                match self.store.append(message.clone()) {
                    AppendOutcome::Appended => {
                        if let Some(events) = &self.events {
                            events.emit(event_builders::message_received(&message));
                        }
                    }
                    // 自己发出的消息被服务端回显
                    AppendOutcome::Duplicate => {
                        self.store
                            .update_status_in(&channel_id, &id, DeliveryStatus::Delivered);
                    }
                }
            }
            ServerFrame::Rejected {
                message_id,
                channel_id,
                reason,
            } => {
                warn!("⚠️ 服务端拒绝消息 {}: {}", message_id, reason);
                self.store
                    .update_status_in(&channel_id, &message_id, DeliveryStatus::Failed);
            }
            ServerFrame::HistoryBatch {
                request_id,
                channel_id,
                messages,
            } => {
                let waiter = self.pending_history.lock().remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(messages);
                    }
                    None => {
                        debug!("迟到的历史批次: channel={}, request={}", channel_id, request_id);
                        self.store.merge_history(messages);
                    }
                }
            }
            ServerFrame::Reaction {
                message_id,
                channel_id,
                reaction,
                add,
            } => {
                if add {
                    self.store.add_reaction_in(&channel_id, &message_id, reaction);
                } else {
                    self.store.remove_reaction_in(&channel_id, &message_id, &reaction);
                }
            }
        }
    }

    async fn resubscribe(&self, writer: &LinkWriter) {
        let channels = self.store.subscribed_channels();
        if channels.is_empty() {
            return;
        }
        let _guard = self.send_lock.lock().await;
        for channel_id in channels {
            let frame = ClientFrame::Subscribe {
                channel_id: channel_id.clone(),
            };
            let Ok(text) = frame.to_text() else {
                continue;
            };
            let bytes = text.len() as u64;
            match writer.send_text(text).await {
                Ok(()) => {
                    self.connection.increment_sent(bytes);
                    debug!("🔄 重新订阅频道: {}", channel_id);
                }
                Err(e) => {
                    warn!("⚠️ 重新订阅 {} 失败: {}", channel_id, e);
                    return;
                }
            }
        }
    }

    fn fail_pending_history(&self) {
        // 丢弃等待方，调用方会回退到本地视图
        self.pending_history.lock().clear();
    }
}

#[async_trait]
impl ChatService for RemoteChatService {
    fn backend(&self) -> ConnectionBackend {
        ConnectionBackend::WebSocket
    }

    fn store(&self) -> &ChatStore {
        &self.inner.store
    }

    fn connection(&self) -> &ConnectionStateManager {
        &self.inner.connection
    }

    async fn start(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(MeetchatSDKError::ShuttingDown("服务已关闭".to_string()));
        }
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            return Ok(());
        }
        info!("🚀 启动实时通道: {}", self.inner.endpoint);
        *supervisor = Some(tokio::spawn(self.inner.clone().supervise()));
        Ok(())
    }

    fn next_message_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    async fn dispatch(&self, message: ChatMessage) -> Result<ChatMessage> {
        let _guard = self.inner.send_lock.lock().await;
        let writer = self.current_writer()?;

        let id = message.id.clone();
        self.inner.store.append(message.clone());
        self.write_frame(&writer, &ClientFrame::Send { message: message.clone() })
            .await?;
        self.inner
            .store
            .update_status_in(&message.channel_id, &id, DeliveryStatus::Sent);
        debug!("📤 消息已写出: id={}, channel={}", id, message.channel_id);

        Ok(self.inner.store.get_message_in(&message.channel_id, &id).unwrap_or(message))
    }

    async fn get_history(&self, channel_id: &str) -> Result<Vec<ChatMessage>> {
        if self.is_connected() {
            let request_id = uuid::Uuid::new_v4().to_string();
            let (tx, rx) = oneshot::channel();
            self.inner.pending_history.lock().insert(request_id.clone(), tx);

            let frame = ClientFrame::FetchHistory {
                request_id: request_id.clone(),
                channel_id: channel_id.to_string(),
                limit: None,
            };
            let fetched = match self.send_control(frame).await {
                Ok(()) => tokio::time::timeout(self.inner.history_timeout, rx).await,
                Err(e) => {
                    debug!("历史请求未发出: {}", e);
                    self.inner.pending_history.lock().remove(&request_id);
                    return Ok(self.inner.store.get_history(channel_id));
                }
            };

            match fetched {
                Ok(Ok(messages)) => {
                    let appended = self.inner.store.merge_history(messages);
                    debug!("历史合并完成: channel={}, 新增 {}", channel_id, appended);
                }
                Ok(Err(_)) => debug!("历史请求随链路断开而取消: channel={}", channel_id),
                Err(_) => {
                    self.inner.pending_history.lock().remove(&request_id);
                    warn!("⚠️ 历史请求超时，返回本地视图: channel={}", channel_id);
                }
            }
        }

        Ok(self.inner.store.get_history(channel_id))
    }

    async fn subscribe(&self, channel_id: &str, callback: MessageCallback) -> Result<SubscriptionHandle> {
        let first = self.inner.store.subscriber_count(channel_id) == 0;
        let handle = self.inner.store.subscribe(channel_id, callback);
        if first && self.is_connected() {
            if let Err(e) = self
                .send_control(ClientFrame::Subscribe {
                    channel_id: channel_id.to_string(),
                })
                .await
            {
                // 重连后会统一重新订阅
                debug!("订阅帧未发出: channel={}, {}", channel_id, e);
            }
        }
        Ok(handle)
    }

    async fn unsubscribe(&self, channel_id: &str) -> Result<()> {
        self.inner.store.unsubscribe_channel(channel_id);
        if self.is_connected() {
            if let Err(e) = self
                .send_control(ClientFrame::Unsubscribe {
                    channel_id: channel_id.to_string(),
                })
                .await
            {
                debug!("取消订阅帧未发出: channel={}, {}", channel_id, e);
            }
        }
        Ok(())
    }

    async fn react(&self, channel_id: &str, message_id: &str, reaction: Reaction, add: bool) -> Result<()> {
        self.send_control(ClientFrame::React {
            message_id: message_id.to_string(),
            channel_id: channel_id.to_string(),
            reaction: reaction.clone(),
            add,
        })
        .await?;

        if add {
            self.inner.store.add_reaction_in(channel_id, message_id, reaction);
        } else {
            self.inner.store.remove_reaction_in(channel_id, message_id, &reaction);
        }
        Ok(())
    }

    fn reset_reconnect(&self) {
        self.inner.policy.reset();
        self.inner.connection.reset_attempts();
        self.inner.wake.notify_waiters();
        debug!("重连计数已清零: {}", self.inner.endpoint);
    }

    async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        *self.inner.writer.write() = None;
        info!("实时通道已关闭: {}", self.inner.endpoint);
    }
}

impl Drop for RemoteChatService {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

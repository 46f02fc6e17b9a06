use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection_state::{ConnectionState, ConnectionStatus};
use crate::error::{MeetchatSDKError, Result};
use crate::events::{event_builders, EventManager, SdkEvent};
use crate::network::{NetworkMonitor, NetworkStatus, NetworkStatusListener};
use crate::storage::chat_store::{ChatStore, MessageCallback, SubscriptionHandle};
use crate::storage::entities::{AuthorRef, ChatMessage, Reaction};
use crate::storage::kv::{open_or_memory, LocalStorage};
use crate::storage::queue::{OfflineAction, OfflineActionQueue, QueuedAction};
use crate::transport::{
    ChatService, Connector, LocalBackendConfig, LocalChatService, ReconnectConfig, RemoteChatService, WsConnector,
};
use crate::version::version_summary;

/// 消息后端选择（启动时确定，会话内不切换）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendConfig {
    /// WebSocket 实时端点
    Remote { url: String },
    /// 纯内存后备服务
    Local,
}

/// SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetchatConfig {
    /// 数据存储目录（离线队列）
    pub data_dir: PathBuf,
    /// 消息后端
    pub backend: BackendConfig,
    /// 重连配置
    pub reconnect: ReconnectConfig,
    /// 本地后备服务的模拟延迟
    pub local: LocalBackendConfig,
    /// 事件缓冲区大小
    pub event_buffer_size: usize,
    /// 远程历史请求超时（毫秒）
    pub history_timeout_ms: u64,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for MeetchatConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("meetchat_data"),
            backend: BackendConfig::Local,
            reconnect: ReconnectConfig::default(),
            local: LocalBackendConfig::default(),
            event_buffer_size: 256,
            history_timeout_ms: 5000,
            debug_mode: false,
        }
    }
}

impl MeetchatConfig {
    pub fn builder() -> MeetchatConfigBuilder {
        MeetchatConfigBuilder::new()
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct MeetchatConfigBuilder {
    config: MeetchatConfig,
    /// 延迟到 build() 时报告的 URL 错误
    url_error: Option<String>,
}

impl MeetchatConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// 设置实时端点地址，仅接受 `ws://` 与 `wss://`
    pub fn server_url<S: Into<String>>(mut self, url: S) -> Self {
        let url = url.into();
        if url.starts_with("ws://") || url.starts_with("wss://") {
            self.config.backend = BackendConfig::Remote { url };
            self.url_error = None;
        } else {
            self.url_error = Some(url);
        }
        self
    }

    /// 使用本地内存后备服务
    pub fn local_backend(mut self) -> Self {
        self.config.backend = BackendConfig::Local;
        self.url_error = None;
        self
    }

    pub fn local_config(mut self, config: LocalBackendConfig) -> Self {
        self.config.local = config;
        self
    }

    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config.reconnect = config;
        self
    }

    pub fn reconnect_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.reconnect.interval_ms = interval_ms;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn history_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.history_timeout_ms = timeout_ms;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> Result<MeetchatConfig> {
        if let Some(url) = self.url_error {
            return Err(MeetchatSDKError::Config(format!(
                "不支持的端点地址（需要 ws:// 或 wss://）: {}",
                url
            )));
        }
        if self.config.event_buffer_size == 0 {
            return Err(MeetchatSDKError::Config("event_buffer_size 必须大于 0".to_string()));
        }
        if self.config.reconnect.interval_ms == 0 {
            return Err(MeetchatSDKError::Config("重连间隔必须大于 0".to_string()));
        }
        Ok(self.config)
    }
}

/// Meetchat SDK 主入口
///
/// 组装网络监控、本地存储、聊天服务、离线队列与事件系统：
/// - 离线时发送的消息先写入临时条目（Queued）并进入离线队列
/// - 网络恢复或传输层重新连上时按入队顺序回放
/// - 所有状态变化通过 `SdkEvent` 广播，不以错误形式抛给 UI
pub struct MeetchatSDK {
    config: MeetchatConfig,
    monitor: Arc<NetworkMonitor>,
    events: Arc<EventManager>,
    store: ChatStore,
    service: Arc<dyn ChatService>,
    queue: Arc<OfflineActionQueue>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for MeetchatSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetchatSDK")
            .field("backend", &self.config.backend)
            .field("service", &self.service)
            .field("queue", &self.queue)
            .finish()
    }
}

impl MeetchatSDK {
    /// 初始化 SDK
    ///
    /// 远程后端使用 WebSocket 连接器。
    pub async fn initialize(
        config: MeetchatConfig,
        listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<Arc<Self>> {
        Self::initialize_with_connector(config, listener, Arc::new(WsConnector::default())).await
    }

    /// 使用指定连接器初始化（本地后端时忽略连接器）
    pub async fn initialize_with_connector(
        config: MeetchatConfig,
        listener: Arc<dyn NetworkStatusListener>,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>> {
        info!("正在初始化 {}...", version_summary());

        // === 第1层：网络监控 ===
        let monitor = Arc::new(NetworkMonitor::new(listener));
        monitor.start().await?;

        // === 第2层：本地存储 ===
        let storage: Arc<dyn LocalStorage> = open_or_memory(&config.data_dir).await;
        if !storage.is_persistent() {
            warn!("⚠️ 离线队列仅在本次会话内有效");
        }

        // === 第3层：事件管理器 ===
        let events = Arc::new(EventManager::new(config.event_buffer_size));

        // === 第4层：消息存储，状态变更转发为事件 ===
        let observer_events = events.clone();
        let store = ChatStore::with_status_observer(Arc::new(move |message: &ChatMessage, old_status| {
            observer_events.emit(event_builders::message_status_changed(message, old_status));
        }));

        // === 第5层：聊天服务 ===
        let service: Arc<dyn ChatService> = match &config.backend {
            BackendConfig::Remote { url } => Arc::new(RemoteChatService::new(
                url.clone(),
                connector,
                store.clone(),
                config.reconnect.clone(),
                config.history_timeout(),
                Some(events.clone()),
            )),
            BackendConfig::Local => Arc::new(LocalChatService::new(config.local.clone(), store.clone())),
        };

        // === 第6层：离线队列 ===
        let queue = Arc::new(OfflineActionQueue::load(storage, monitor.clone(), Some(events.clone())).await);

        let sdk = Arc::new(Self {
            config,
            monitor,
            events,
            store,
            service,
            queue,
            watcher: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        // 先订阅再启动服务，确保不漏掉首次 Connected
        sdk.spawn_watcher();
        sdk.service.start().await?;

        info!(
            "✅ MeetchatSDK 初始化完成: backend={:?}, network={}",
            sdk.config.backend,
            sdk.monitor.current_state()
        );
        Ok(sdk)
    }

    /// 监听网络与传输状态：恢复在线或重新连上时回放离线队列
    fn spawn_watcher(&self) {
        let mut network_rx = self.monitor.subscribe();
        let mut connection_rx = self.service.connection().subscribe();
        let monitor = self.monitor.clone();
        let service = self.service.clone();
        let queue = self.queue.clone();
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = network_rx.recv() => match event {
                        Ok(event) => {
                            info!("📡 网络状态: {} -> {}", event.old_status, event.new_status);
                            events.emit(event_builders::connectivity_changed(event.old_status, event.new_status));
                            if event.came_online() {
                                service.reset_reconnect();
                                spawn_flush(&queue, &service, &monitor);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("⚠️ 网络事件积压，跳过 {} 条", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = connection_rx.recv() => match event {
                        Ok(event) => {
                            events.emit(event_builders::connection_state_changed(
                                event.old_status,
                                event.new_status,
                                event.reconnect_attempts,
                            ));
                            if event.new_status == ConnectionStatus::Connected {
                                spawn_flush(&queue, &service, &monitor);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("⚠️ 连接事件积压，跳过 {} 条", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("SDK 状态监听任务退出");
        });

        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(MeetchatSDKError::ShuttingDown("SDK 已关闭".to_string()));
        }
        Ok(())
    }

    // ========== 消息操作 ==========

    /// 发送消息
    ///
    /// - 离线：写入 Queued 临时条目并进入离线队列
    /// - 在线但队列中仍有待回放动作，或传输层未就绪：同样排队，保持先后顺序
    /// - 否则直接经聊天服务发送
    ///
    /// 只有在动作被接受（已发送或已排队）后才返回 `Ok`。
    pub async fn send_message(&self, channel_id: &str, content: &str, author: &AuthorRef) -> Result<ChatMessage> {
        self.ensure_running()?;
        let message = self.service.compose(channel_id, content, author);

        if !self.monitor.is_online() {
            return self.queue_message(message, false).await;
        }
        if !self.queue.is_empty().await || self.queue.is_flushing() {
            return self.queue_message(message, true).await;
        }

        match self.service.dispatch(message.clone()).await {
            Ok(sent) => Ok(sent),
            Err(e) if e.is_transport_unavailable() => {
                debug!("传输层不可用，消息转入离线队列: {}", e);
                self.queue_message(message, true).await
            }
            Err(e) => Err(e),
        }
    }

    async fn queue_message(&self, message: ChatMessage, deferred: bool) -> Result<ChatMessage> {
        self.store.append(message.clone());
        self.queue_action(OfflineAction::SendMessage {
            message: message.clone(),
        }, deferred)
        .await?;
        Ok(self
            .store
            .get_message_in(&message.channel_id, &message.id)
            .unwrap_or(message))
    }

    async fn queue_action(&self, action: OfflineAction, deferred: bool) -> Result<QueuedAction> {
        let queued = if deferred {
            self.queue.defer(action).await?
        } else {
            match self.queue.enqueue(action.clone()).await {
                // 入队前网络刚好恢复
                Err(MeetchatSDKError::InvalidOperation(_)) => self.queue.defer(action).await?,
                other => other?,
            }
        };
        if self.monitor.is_online() && self.service.connection().is_connected() {
            spawn_flush(&self.queue, &self.service, &self.monitor);
        }
        Ok(queued)
    }

    /// 添加或移除表情反馈（离线时排队）
    pub async fn react(&self, channel_id: &str, message_id: &str, reaction: Reaction, add: bool) -> Result<()> {
        self.ensure_running()?;
        let action = OfflineAction::React {
            message_id: message_id.to_string(),
            channel_id: channel_id.to_string(),
            reaction: reaction.clone(),
            add,
        };

        if !self.monitor.is_online() {
            self.queue_action(action, false).await?;
            return Ok(());
        }
        if !self.queue.is_empty().await || self.queue.is_flushing() {
            self.queue_action(action, true).await?;
            return Ok(());
        }

        match self.service.react(channel_id, message_id, reaction, add).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transport_unavailable() => {
                self.queue_action(action, true).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 频道历史（按顺序）
    pub async fn get_history(&self, channel_id: &str) -> Result<Vec<ChatMessage>> {
        self.ensure_running()?;
        self.service.get_history(channel_id).await
    }

    /// 订阅频道消息，释放返回的句柄即停止回调
    pub async fn subscribe<F>(&self, channel_id: &str, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        let callback: MessageCallback = Arc::new(callback);
        self.service.subscribe(channel_id, callback).await
    }

    pub async fn unsubscribe(&self, channel_id: &str) -> Result<()> {
        self.service.unsubscribe(channel_id).await
    }

    // ========== 状态查询 ==========

    pub fn connectivity(&self) -> NetworkStatus {
        self.monitor.current_state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.service.connection().get_state()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    pub async fn pending_actions(&self) -> Vec<QueuedAction> {
        self.queue.snapshot().await
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn events(&self) -> Arc<EventManager> {
        self.events.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SdkEvent> {
        self.events.subscribe()
    }

    pub fn network_monitor(&self) -> Arc<NetworkMonitor> {
        self.monitor.clone()
    }

    pub fn config(&self) -> &MeetchatConfig {
        &self.config
    }

    /// 立即回放离线队列，返回本次回放成功的动作数
    pub async fn flush_now(&self) -> Result<usize> {
        self.ensure_running()?;
        flush_queue(&self.queue, self.service.as_ref(), &self.monitor).await
    }

    /// 关闭 SDK
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        info!("正在关闭 MeetchatSDK...");
        self.shutdown.cancel();

        let watcher = self.watcher.lock().take();
        if let Some(handle) = watcher {
            let _ = handle.await;
        }
        self.service.shutdown().await;
        self.monitor.stop().await;

        let pending = self.queue.len().await;
        if pending > 0 {
            info!("离线队列中仍有 {} 个动作，下次启动时回放", pending);
        }
        info!("MeetchatSDK 关闭完成");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for MeetchatSDK {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.watcher.get_mut().take() {
            handle.abort();
        }
    }
}

/// 在线且传输就绪时循环回放，直到队列为空
///
/// 已有回放在进行时直接返回，由进行中的回放负责收尾。
async fn flush_queue(queue: &OfflineActionQueue, service: &dyn ChatService, monitor: &NetworkMonitor) -> Result<usize> {
    let mut total = 0;
    loop {
        if !monitor.is_online() || !service.connection().is_connected() {
            break;
        }
        if queue.is_flushing() || queue.is_empty().await {
            break;
        }
        // 被丢弃的动作也会缩短队列，因此不以本轮回放数量判断是否结束
        total += queue.flush(service).await?;
    }
    Ok(total)
}

fn spawn_flush(queue: &Arc<OfflineActionQueue>, service: &Arc<dyn ChatService>, monitor: &Arc<NetworkMonitor>) {
    let queue = queue.clone();
    let service = service.clone();
    let monitor = monitor.clone();
    tokio::spawn(async move {
        match flush_queue(&queue, service.as_ref(), &monitor).await {
            Ok(0) => {}
            Ok(replayed) => info!("✅ 离线队列回放完成: {} 个动作", replayed),
            Err(e) => warn!("⚠️ 离线队列回放未完成: {}", e),
        }
    });
}

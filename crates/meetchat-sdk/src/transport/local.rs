//! 本地内存聊天服务
//!
//! 没有后端时使用：消息只存在于本进程内，发送、拉取历史都带模拟延迟，
//! 发送成功后延迟一段时间再自动确认为 Delivered。

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection_state::{ConnectionBackend, ConnectionStateManager};
use crate::error::{MeetchatSDKError, Result};
use crate::storage::chat_store::{ChatStore, MessageCallback, SubscriptionHandle};
use crate::storage::entities::{ChatMessage, DeliveryStatus, Reaction};
use crate::transport::ChatService;

const LOCAL_ENDPOINT: &str = "local://memory";

/// 本地服务的模拟延迟
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    pub send_latency_ms: u64,
    pub fetch_latency_ms: u64,
    /// 发送成功到确认送达的间隔
    pub ack_latency_ms: u64,
    /// 每次延迟额外叠加 [0, jitter_ms] 的随机抖动
    pub jitter_ms: u64,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            send_latency_ms: 150,
            fetch_latency_ms: 100,
            ack_latency_ms: 300,
            jitter_ms: 50,
        }
    }
}

impl LocalBackendConfig {
    /// 全部延迟为 0（测试用）
    pub fn instant() -> Self {
        Self {
            send_latency_ms: 0,
            fetch_latency_ms: 0,
            ack_latency_ms: 0,
            jitter_ms: 0,
        }
    }

    fn delay(&self, base_ms: u64) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base_ms + jitter)
    }
}

pub struct LocalChatService {
    config: LocalBackendConfig,
    store: ChatStore,
    connection: ConnectionStateManager,
    next_id: AtomicU64,
    send_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    ack_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for LocalChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChatService")
            .field("config", &self.config)
            .field("status", &self.connection.status())
            .finish()
    }
}

impl LocalChatService {
    pub fn new(config: LocalBackendConfig, store: ChatStore) -> Self {
        Self {
            config,
            store,
            connection: ConnectionStateManager::new(ConnectionBackend::Local, LOCAL_ENDPOINT, 0),
            next_id: AtomicU64::new(1),
            send_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            ack_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &LocalBackendConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(MeetchatSDKError::TransportUnavailable("本地服务已关闭".to_string()));
        }
        if !self.connection.is_connected() {
            return Err(MeetchatSDKError::TransportUnavailable("本地服务未启动".to_string()));
        }
        Ok(())
    }

    fn schedule_ack(&self, channel_id: String, message_id: String) {
        let delay = self.config.delay(self.config.ack_latency_ms);
        let store = self.store.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    store.update_status_in(&channel_id, &message_id, DeliveryStatus::Delivered);
                }
            }
        });

        let mut tasks = self.ack_tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

#[async_trait]
impl ChatService for LocalChatService {
    fn backend(&self) -> ConnectionBackend {
        ConnectionBackend::Local
    }

    fn store(&self) -> &ChatStore {
        &self.store
    }

    fn connection(&self) -> &ConnectionStateManager {
        &self.connection
    }

    async fn start(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(MeetchatSDKError::ShuttingDown("本地服务已关闭".to_string()));
        }
        self.connection.mark_connected();
        info!("🚀 本地聊天服务已就绪");
        Ok(())
    }

    fn next_message_id(&self) -> String {
        format!("local-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn dispatch(&self, message: ChatMessage) -> Result<ChatMessage> {
        self.ensure_running()?;
        let delay = self.config.delay(self.config.send_latency_ms);

        let _guard = self.send_lock.lock().await;
        tokio::time::sleep(delay).await;
        self.ensure_running()?;

        let id = message.id.clone();
        self.store.append(message.clone());
        self.store
            .update_status_in(&message.channel_id, &id, DeliveryStatus::Sent);
        self.connection.increment_sent(message.content.len() as u64);
        self.schedule_ack(message.channel_id.clone(), id.clone());
        debug!("📤 本地消息已发送: id={}, channel={}", id, message.channel_id);

        Ok(self.store.get_message_in(&message.channel_id, &id).unwrap_or(message))
    }

    async fn get_history(&self, channel_id: &str) -> Result<Vec<ChatMessage>> {
        let delay = self.config.delay(self.config.fetch_latency_ms);
        tokio::time::sleep(delay).await;
        Ok(self.store.get_history(channel_id))
    }

    async fn subscribe(&self, channel_id: &str, callback: MessageCallback) -> Result<SubscriptionHandle> {
        Ok(self.store.subscribe(channel_id, callback))
    }

    async fn unsubscribe(&self, channel_id: &str) -> Result<()> {
        self.store.unsubscribe_channel(channel_id);
        Ok(())
    }

    async fn react(&self, channel_id: &str, message_id: &str, reaction: Reaction, add: bool) -> Result<()> {
        self.ensure_running()?;
        let applied = if add {
            self.store.add_reaction_in(channel_id, message_id, reaction)
        } else {
            self.store.remove_reaction_in(channel_id, message_id, &reaction)
        };
        if !applied && self.store.get_message_in(channel_id, message_id).is_none() {
            return Err(MeetchatSDKError::NotFound(format!("消息不存在: {}", message_id)));
        }
        Ok(())
    }

    fn reset_reconnect(&self) {}

    async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.ack_tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.connection.mark_disconnected(None);
        info!("本地聊天服务已关闭");
    }
}

//! 网络连通性监控
//!
//! - `NetworkStatusListener`：平台层实现（浏览器 online/offline、移动端网络回调等）
//! - `HostNetworkSignal`：通用实现，由宿主代码调用 `report()` 推送网络状态
//! - `NetworkMonitor`：进程内唯一的连通性状态，每次实际变化只广播一次

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::utils::time::now_millis;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
}

impl NetworkStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkStatus::Online)
    }
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Online => write!(f, "online"),
            NetworkStatus::Offline => write!(f, "offline"),
        }
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    /// UTC 毫秒
    pub timestamp: i64,
}

impl NetworkStatusEvent {
    pub fn came_online(&self) -> bool {
        self.new_status.is_online() && !self.old_status.is_online()
    }
}

/// 网络状态监听器 trait（由平台层实现）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 宿主推送的网络信号
///
/// 宿主（或测试）调用 `report(status)`，状态未变化时不会产生事件。
#[derive(Debug)]
pub struct HostNetworkSignal {
    status: RwLock<NetworkStatus>,
    sender: broadcast::Sender<NetworkStatusEvent>,
}

impl HostNetworkSignal {
    pub fn new(initial: NetworkStatus) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            status: RwLock::new(initial),
            sender,
        }
    }

    pub fn online() -> Self {
        Self::new(NetworkStatus::Online)
    }

    pub fn offline() -> Self {
        Self::new(NetworkStatus::Offline)
    }

    /// 上报网络状态，返回是否发生了变化
    pub fn report(&self, status: NetworkStatus) -> bool {
        let old_status = {
            let mut current = self.status.write();
            if *current == status {
                return false;
            }
            std::mem::replace(&mut *current, status)
        };

        debug!("宿主网络信号: {} -> {}", old_status, status);
        let _ = self.sender.send(NetworkStatusEvent {
            old_status,
            new_status: status,
            timestamp: now_millis(),
        });
        true
    }

    pub fn set_online(&self) -> bool {
        self.report(NetworkStatus::Online)
    }

    pub fn set_offline(&self) -> bool {
        self.report(NetworkStatus::Offline)
    }
}

#[async_trait]
impl NetworkStatusListener for HostNetworkSignal {
    async fn get_current_status(&self) -> NetworkStatus {
        *self.status.read()
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
        Ok(self.sender.subscribe())
    }

    async fn stop_monitoring(&self) {}
}

/// 网络监控管理器
#[derive(Debug)]
pub struct NetworkMonitor {
    listener: Arc<dyn NetworkStatusListener>,
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<RwLock<NetworkStatus>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(listener: Arc<dyn NetworkStatusListener>) -> Self {
        Self::with_capacity(listener, 100)
    }

    pub fn with_capacity(listener: Arc<dyn NetworkStatusListener>, capacity: usize) -> Self {
        let (status_sender, _) = broadcast::channel(capacity.max(1));

        Self {
            listener,
            status_sender,
            current_status: Arc::new(RwLock::new(NetworkStatus::Offline)),
            task: Mutex::new(None),
        }
    }

    /// 启动网络监控
    ///
    /// 初始状态直接从监听器读取，不产生变化事件。
    pub async fn start(&self) -> Result<()> {
        // 先订阅再读取初始状态，读取期间发生的变化会留在接收端
        let mut receiver = self.listener.start_monitoring().await?;
        let initial = self.listener.get_current_status().await;
        *self.current_status.write() = initial;
        info!("✅ 网络监控已启动，初始状态: {}", initial);

        let status_sender = self.status_sender.clone();
        let current_status = self.current_status.clone();

        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        apply_transition(&current_status, &status_sender, event.new_status);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("⚠️ 网络事件积压，跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("网络监听任务退出");
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// 停止网络监控
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.listener.stop_monitoring().await;
    }

    /// 获取当前网络状态
    pub fn current_state(&self) -> NetworkStatus {
        *self.current_status.read()
    }

    pub fn is_online(&self) -> bool {
        self.current_state().is_online()
    }

    /// 手动设置网络状态，返回是否发生了变化
    pub fn set_status(&self, new_status: NetworkStatus) -> bool {
        apply_transition(&self.current_status, &self.status_sender, new_status).is_some()
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// 写入新状态，仅在实际变化时广播
fn apply_transition(
    current_status: &RwLock<NetworkStatus>,
    sender: &broadcast::Sender<NetworkStatusEvent>,
    new_status: NetworkStatus,
) -> Option<NetworkStatusEvent> {
    let old_status = {
        let mut status = current_status.write();
        if *status == new_status {
            return None;
        }
        std::mem::replace(&mut *status, new_status)
    };

    let event = NetworkStatusEvent {
        old_status,
        new_status,
        timestamp: now_millis(),
    };
    match new_status {
        NetworkStatus::Online => info!("🌐 网络恢复: {} -> {}", old_status, new_status),
        NetworkStatus::Offline => warn!("📴 网络断开: {} -> {}", old_status, new_status),
    }
    let _ = sender.send(event.clone());
    Some(event)
}

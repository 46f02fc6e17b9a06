//! Meetchat SDK - 会议聊天的客户端消息核心
//!
//! 本 SDK 负责在不稳定网络下可靠地收发频道消息：
//! - 📡 网络状态监控：只在状态真正变化时通知
//! - 📥 离线动作队列：离线时的发送与表情反馈持久化，恢复后按顺序回放
//! - 🔗 实时通道：WebSocket 连接，固定间隔、有上限的自动重连
//! - 💬 频道消息存储：去重、投递状态单调递进、按顺序通知订阅者
//! - 🧪 本地后备服务：没有后端时提供同样的行为约定
//! - ⚙️ 事件系统：所有状态变化以事件形式广播
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meetchat_sdk::{AuthorRef, HostNetworkSignal, MeetchatConfig, MeetchatSDK};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MeetchatConfig::builder()
//!         .data_dir("/path/to/data")
//!         .server_url("wss://chat.example.com/rt")
//!         .build()?;
//!
//!     // 平台层负责上报网络状态
//!     let network = Arc::new(HostNetworkSignal::online());
//!     let sdk = MeetchatSDK::initialize(config, network.clone()).await?;
//!
//!     let _handle = sdk
//!         .subscribe("general", |message| {
//!             println!("[{}] {}: {}", message.channel_id, message.author, message.content);
//!         })
//!         .await?;
//!
//!     // 离线时同样返回成功，消息进入离线队列
//!     sdk.send_message("general", "Hello, World!", &AuthorRef::new("alice")).await?;
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod connection_state;
pub mod error;
pub mod events;
pub mod network;
pub mod sdk;
pub mod storage;
pub mod transport;
pub mod utils;
pub mod version;

pub use connection_state::{
    ConnectionBackend, ConnectionState, ConnectionStateManager, ConnectionStatus, ConnectionStatusEvent,
    TransportStats,
};
pub use error::{MeetchatSDKError, Result};
pub use events::{event_builders, EventFilter, EventManager, EventStats, FilteredEventReceiver, SdkEvent};
pub use network::{HostNetworkSignal, NetworkMonitor, NetworkStatus, NetworkStatusEvent, NetworkStatusListener};
pub use sdk::{BackendConfig, MeetchatConfig, MeetchatConfigBuilder, MeetchatSDK};
pub use storage::{
    AppendOutcome, AuthorRef, ChatMessage, ChatStore, DeliveryStatus, KvStore, LocalStorage, MemoryKvStore,
    MessageType, OfflineAction, OfflineActionQueue, QueuedAction, Reaction, StatusChange, SubscriptionHandle,
};
pub use transport::{
    ChatService, Connector, LocalBackendConfig, LocalChatService, ReconnectConfig, RemoteChatService, WsConnector,
};

#[cfg(feature = "mock")]
pub use transport::MockConnector;
pub use utils::{init_logging, now_millis, TimeFormatter};
pub use version::{version_summary, BUILD_TIME, SDK_VERSION};

//! 聊天服务
//!
//! `ChatService` 是消息核心唯一的能力接口，有两个实现：
//! - `RemoteChatService`：通过 WebSocket 实时端点收发，断线自动重连
//! - `LocalChatService`：纯内存后备服务，用于开发或无后端时
//!
//! 两者遵守同样的投递状态和顺序约定，启动时按配置选定其一。

use async_trait::async_trait;

use crate::connection_state::{ConnectionBackend, ConnectionStateManager};
use crate::error::{MeetchatSDKError, Result};
use crate::storage::chat_store::{ChatStore, MessageCallback, SubscriptionHandle};
use crate::storage::entities::{AuthorRef, ChatMessage, DeliveryStatus, Reaction};
use crate::storage::queue::{ActionReplayer, OfflineAction};

pub mod link;
pub mod local;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod protocol;
pub mod reconnect;
pub mod remote;
pub mod websocket;

pub use link::{Connector, Link, LinkPeer, LinkWriter, OutboundFrame};
pub use local::{LocalBackendConfig, LocalChatService};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockConnector;
pub use protocol::{ClientFrame, ServerFrame};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectStats};
pub use remote::RemoteChatService;
pub use websocket::WsConnector;

/// 聊天服务能力接口
#[async_trait]
pub trait ChatService: Send + Sync + std::fmt::Debug {
    fn backend(&self) -> ConnectionBackend;

    /// 服务持有的频道消息存储
    fn store(&self) -> &ChatStore;

    /// 传输连接状态
    fn connection(&self) -> &ConnectionStateManager;

    /// 启动服务（建立连接或就绪）
    async fn start(&self) -> Result<()>;

    /// 生成新消息 id
    fn next_message_id(&self) -> String;

    /// 生成一条 Queued 状态的临时消息（不写入存储）
    fn compose(&self, channel_id: &str, content: &str, author: &AuthorRef) -> ChatMessage {
        ChatMessage::compose(self.next_message_id(), channel_id, content, author.clone())
    }

    /// 发送已生成的消息：写入存储后经传输发送，成功后状态为 Sent
    ///
    /// 未连接时立即返回 `TransportUnavailable`，不修改存储。
    async fn dispatch(&self, message: ChatMessage) -> Result<ChatMessage>;

    async fn send(&self, channel_id: &str, content: &str, author: &AuthorRef) -> Result<ChatMessage> {
        let message = self.compose(channel_id, content, author);
        self.dispatch(message).await
    }

    /// 频道历史（按顺序）
    async fn get_history(&self, channel_id: &str) -> Result<Vec<ChatMessage>>;

    async fn subscribe(&self, channel_id: &str, callback: MessageCallback) -> Result<SubscriptionHandle>;

    /// 取消频道上的全部订阅
    async fn unsubscribe(&self, channel_id: &str) -> Result<()>;

    /// 添加或移除表情反馈
    async fn react(&self, channel_id: &str, message_id: &str, reaction: Reaction, add: bool) -> Result<()>;

    /// 网络恢复：清零重连计数，必要时立即重连
    fn reset_reconnect(&self);

    async fn shutdown(&self);
}

#[async_trait]
impl<T: ChatService + ?Sized> ActionReplayer for T {
    async fn replay(&self, action: &OfflineAction) -> Result<()> {
        match action {
            OfflineAction::SendMessage { message } => {
                self.dispatch(message.clone()).await?;
            }
            OfflineAction::React {
                message_id,
                channel_id,
                reaction,
                add,
            } => {
                self.react(channel_id, message_id, reaction.clone(), *add).await?;
            }
        }
        Ok(())
    }

    fn discard(&self, action: &OfflineAction, _error: &MeetchatSDKError) {
        if let OfflineAction::SendMessage { message } = action {
            self.store()
                .update_status_in(&message.channel_id, &message.id, DeliveryStatus::Failed);
        }
    }
}

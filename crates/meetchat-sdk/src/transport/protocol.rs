//! 实时通道的 JSON 帧格式
//!
//! 每个 WebSocket 文本帧携带一个 JSON 对象，`type` 字段区分帧类型。

use serde::{Deserialize, Serialize};

use crate::error::{MeetchatSDKError, Result};
use crate::storage::entities::{ChatMessage, Reaction};

/// 客户端 -> 服务端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        channel_id: String,
    },
    Unsubscribe {
        channel_id: String,
    },
    /// 发送消息（id 由客户端生成，服务端用它回执）
    Send {
        message: ChatMessage,
    },
    FetchHistory {
        request_id: String,
        channel_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    React {
        message_id: String,
        channel_id: String,
        reaction: Reaction,
        add: bool,
    },
}

impl ClientFrame {
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| MeetchatSDKError::Serialization(format!("编码客户端帧失败: {}", e)))
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            ClientFrame::Subscribe { .. } => "subscribe",
            ClientFrame::Unsubscribe { .. } => "unsubscribe",
            ClientFrame::Send { .. } => "send",
            ClientFrame::FetchHistory { .. } => "fetch_history",
            ClientFrame::React { .. } => "react",
        }
    }
}

/// 服务端 -> 客户端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// 服务端确认收到并投递
    Delivered {
        message_id: String,
        channel_id: String,
    },
    /// 频道内的新消息（包括其他成员发送的）
    Message {
        message: ChatMessage,
    },
    /// 服务端拒绝了某条消息
    Rejected {
        message_id: String,
        channel_id: String,
        reason: String,
    },
    HistoryBatch {
        request_id: String,
        channel_id: String,
        messages: Vec<ChatMessage>,
    },
    Reaction {
        message_id: String,
        channel_id: String,
        reaction: Reaction,
        add: bool,
    },
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| MeetchatSDKError::Protocol(format!("无法解析服务端帧: {}", e)))
    }

    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| MeetchatSDKError::Serialization(format!("编码服务端帧失败: {}", e)))
    }

    pub fn channel_id(&self) -> &str {
        match self {
            ServerFrame::Delivered { channel_id, .. }
            | ServerFrame::Rejected { channel_id, .. }
            | ServerFrame::HistoryBatch { channel_id, .. }
            | ServerFrame::Reaction { channel_id, .. } => channel_id,
            ServerFrame::Message { message } => &message.channel_id,
        }
    }
}

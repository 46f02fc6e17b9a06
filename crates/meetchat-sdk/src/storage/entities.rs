//! 数据实体定义
//!
//! 消息核心使用的所有值类型：消息、投递状态、表情反馈、作者引用。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::utils::time::now_millis;

/// 作者引用（由外部认证服务提供，SDK 不做校验）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorRef(pub String);

impl AuthorRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 消息投递状态
///
/// 常规路径单调递进：Queued → Sent → Delivered；
/// Queued / Sent 遇到传输错误可进入 Failed。
/// - Delivered: 最终状态，不会再回退
/// - Failed: 最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DeliveryStatus {
    Queued = 0,    // 已排队（本地临时条目）
    Sent = 1,      // 已写入传输通道
    Delivered = 2, // 服务端已确认
    Failed = 3,    // 发送失败
}

impl DeliveryStatus {
    /// 检查是否可以从当前状态转换到目标状态
    pub fn can_transition_to(&self, target: DeliveryStatus) -> bool {
        match (self, target) {
            (DeliveryStatus::Queued, DeliveryStatus::Sent) => true,
            (DeliveryStatus::Queued, DeliveryStatus::Delivered) => true,
            (DeliveryStatus::Sent, DeliveryStatus::Delivered) => true,
            (DeliveryStatus::Queued, DeliveryStatus::Failed) => true,
            (DeliveryStatus::Sent, DeliveryStatus::Failed) => true,
            _ => false,
        }
    }

    /// 检查状态是否为最终状态（不能再转换）
    pub fn is_final_state(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    /// 检查消息是否已离开本地
    pub fn is_sent_successfully(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Delivered)
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(DeliveryStatus::Queued),
            1 => Some(DeliveryStatus::Sent),
            2 => Some(DeliveryStatus::Delivered),
            3 => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Queued => write!(f, "queued"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// 普通文本
    Text,
    /// 系统提示（入会、离会等）
    System,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

/// 表情反馈（emoji + 操作者），在消息内按集合语义去重
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub actor: AuthorRef,
}

impl Reaction {
    pub fn new(emoji: impl Into<String>, actor: AuthorRef) -> Self {
        Self {
            emoji: emoji.into(),
            actor,
        }
    }
}

/// 聊天消息
///
/// 由 ChatStore 按频道持有；除投递状态和表情反馈外不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 频道内唯一 ID（由生成器分配）
    pub id: String,
    pub content: String,
    pub author: AuthorRef,
    pub channel_id: String,
    /// UTC 毫秒时间戳
    pub timestamp: i64,
    #[serde(default)]
    pub message_type: MessageType,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub reactions: BTreeSet<Reaction>,
    #[serde(default)]
    pub mentions: BTreeSet<AuthorRef>,
    /// 端到端加密尚未实现，始终为 false
    #[serde(default)]
    pub encrypted: bool,
}

impl ChatMessage {
    /// 创建一条处于 Queued 状态的临时消息，并解析 @提及
    pub fn compose(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
        author: AuthorRef,
    ) -> Self {
        let content = content.into();
        let mentions = extract_mentions(&content);
        Self {
            id: id.into(),
            content,
            author,
            channel_id: channel_id.into(),
            timestamp: now_millis(),
            message_type: MessageType::Text,
            status: DeliveryStatus::Queued,
            reactions: BTreeSet::new(),
            mentions,
            encrypted: false,
        }
    }

    /// 系统消息
    pub fn system(id: impl Into<String>, channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::compose(id, channel_id, content, AuthorRef::new("system"));
        message.message_type = MessageType::System;
        message.mentions.clear();
        message
    }

    /// 某个 emoji 的反馈数量
    pub fn reaction_count(&self, emoji: &str) -> usize {
        self.reactions.iter().filter(|r| r.emoji == emoji).count()
    }
}

/// `@` 前必须是行首或空白，避免把邮箱地址当作提及
fn mention_regex() -> Option<&'static Regex> {
    static MENTION: OnceLock<Option<Regex>> = OnceLock::new();
    MENTION
        .get_or_init(|| Regex::new(r"(?:^|\s)@([A-Za-z0-9_.\-]+)").ok())
        .as_ref()
}

/// 从消息内容中解析 `@handle` 提及
pub fn extract_mentions(content: &str) -> BTreeSet<AuthorRef> {
    let Some(re) = mention_regex() else {
        return BTreeSet::new();
    };
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| AuthorRef::new(m.as_str().trim_end_matches('.')))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transition_validation() {
        // 有效转换
        assert!(DeliveryStatus::Queued.can_transition_to(DeliveryStatus::Sent));
        assert!(DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Delivered));
        assert!(DeliveryStatus::Queued.can_transition_to(DeliveryStatus::Delivered));
        assert!(DeliveryStatus::Queued.can_transition_to(DeliveryStatus::Failed));
        assert!(DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Failed));

        // 无效转换
        assert!(!DeliveryStatus::Delivered.can_transition_to(DeliveryStatus::Sent));
        assert!(!DeliveryStatus::Delivered.can_transition_to(DeliveryStatus::Failed));
        assert!(!DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Queued));
        assert!(!DeliveryStatus::Failed.can_transition_to(DeliveryStatus::Sent));
        assert!(!DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Sent));
    }

    #[test]
    fn test_status_helpers() {
        assert!(DeliveryStatus::Delivered.is_final_state());
        assert!(DeliveryStatus::Failed.is_final_state());
        assert!(!DeliveryStatus::Queued.is_final_state());
        assert!(DeliveryStatus::Sent.is_sent_successfully());
        assert_eq!(DeliveryStatus::from_i32(2), Some(DeliveryStatus::Delivered));
        assert_eq!(DeliveryStatus::from_i32(9), None);
    }

    #[test]
    fn test_compose_extracts_mentions() {
        let msg = ChatMessage::compose(
            "m1",
            "general",
            "@alice can you share your screen? cc @bob.smith, mail me at carol@example.com",
            AuthorRef::new("dave"),
        );

        assert_eq!(msg.status, DeliveryStatus::Queued);
        assert_eq!(msg.message_type, MessageType::Text);
        assert!(!msg.encrypted);
        let mentions: Vec<&str> = msg.mentions.iter().map(|m| m.as_str()).collect();
        assert_eq!(mentions, vec!["alice", "bob.smith"]);
    }

    #[test]
    fn test_system_message_has_no_mentions() {
        let msg = ChatMessage::system("s1", "general", "@everyone joined");
        assert_eq!(msg.message_type, MessageType::System);
        assert!(msg.mentions.is_empty());
        assert_eq!(msg.author.as_str(), "system");
    }

    #[test]
    fn test_message_json_defaults() {
        let json = r#"{
            "id": "42",
            "content": "hi",
            "author": "alice",
            "channel_id": "general",
            "timestamp": 1,
            "status": "Sent"
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.message_type, MessageType::Text);
        assert!(msg.reactions.is_empty());
        assert!(!msg.encrypted);
    }
}

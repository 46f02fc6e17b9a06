//! 存储模块 - 消息核心的数据层
//!
//! - `entities`: 数据实体定义（消息、投递状态、表情反馈）
//! - `kv`: 本地键值持久化（sled），不可用时降级为内存
//! - `chat_store`: 按频道组织的消息历史与订阅
//! - `queue`: 离线动作队列

pub mod chat_store;
pub mod entities;
pub mod kv;
pub mod queue;

// 重新导出核心类型
pub use chat_store::{AppendOutcome, ChatStore, MessageCallback, StatusChange, SubscriptionHandle};
pub use entities::*;
pub use kv::{KvStore, LocalStorage, MemoryKvStore};
pub use queue::{ActionReplayer, OfflineAction, OfflineActionQueue, QueuedAction};

use thiserror::Error;

/// SDK 统一错误类型
///
/// 消息核心内部的失败都会被转换成状态（网络状态、连接状态、投递状态），
/// 只有调用方确实需要处理的情况才会以错误形式返回。
#[derive(Debug, Error)]
pub enum MeetchatSDKError {
    /// 传输层未连接（离线或重连中），调用方应改走离线队列
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// 重连次数已用尽，等待下一次网络恢复
    #[error("Reconnect exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// 离线队列回放中途失败，剩余动作保留在队列中
    #[error("Flush partially failed: replayed {replayed}, remaining {remaining}: {reason}")]
    FlushPartialFailure {
        replayed: usize,
        remaining: usize,
        reason: String,
    },

    #[error("KV store error: {0}")]
    KvStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    IO(String),

    /// 传输层错误（握手失败、写入失败等）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 协议帧无法解析
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl From<serde_json::Error> for MeetchatSDKError {
    fn from(error: serde_json::Error) -> Self {
        MeetchatSDKError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for MeetchatSDKError {
    fn from(error: std::io::Error) -> Self {
        MeetchatSDKError::IO(error.to_string())
    }
}

impl From<sled::Error> for MeetchatSDKError {
    fn from(error: sled::Error) -> Self {
        MeetchatSDKError::KvStore(error.to_string())
    }
}

impl MeetchatSDKError {
    /// 是否属于“未连接”类错误（应路由到离线队列）
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(
            self,
            MeetchatSDKError::TransportUnavailable(_) | MeetchatSDKError::ReconnectExhausted { .. }
        )
    }

    /// 是否可以在网络恢复后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeetchatSDKError::TransportUnavailable(_)
                | MeetchatSDKError::ReconnectExhausted { .. }
                | MeetchatSDKError::FlushPartialFailure { .. }
                | MeetchatSDKError::Transport(_)
                | MeetchatSDKError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MeetchatSDKError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(MeetchatSDKError::TransportUnavailable("offline".into()).is_transport_unavailable());
        assert!(MeetchatSDKError::ReconnectExhausted { attempts: 10 }.is_transport_unavailable());
        assert!(!MeetchatSDKError::Config("bad url".into()).is_transport_unavailable());

        assert!(MeetchatSDKError::Timeout("history".into()).is_retryable());
        assert!(!MeetchatSDKError::InvalidOperation("enqueue while online".into()).is_retryable());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: MeetchatSDKError = serde_json::from_str::<u32>("not-a-number").unwrap_err().into();
        assert!(matches!(err, MeetchatSDKError::Serialization(_)));
    }
}

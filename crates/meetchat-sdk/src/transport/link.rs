//! 传输链路抽象
//!
//! `Connector` 负责建立到端点的一条链路，`Link` 是链路的客户端一侧：
//! - 写端 `LinkWriter`：发送文本帧，等待底层写入完成后才返回
//! - 读端：服务端推送的文本帧；所有发送方关闭即表示链路断开
//!
//! `LinkPeer` 是链路的另一侧，由具体的连接器（WebSocket、测试用的模拟端点）驱动。

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{MeetchatSDKError, Result};

/// 待写出的帧及其写入结果回执
#[derive(Debug)]
pub struct OutboundFrame {
    pub text: String,
    ack: oneshot::Sender<Result<()>>,
}

impl OutboundFrame {
    /// 通知发送方写入结果
    pub fn complete(self, result: Result<()>) {
        let _ = self.ack.send(result);
    }
}

/// 链路写端（可克隆）
#[derive(Debug, Clone)]
pub struct LinkWriter {
    tx: mpsc::Sender<OutboundFrame>,
}

impl LinkWriter {
    /// 写出一个文本帧
    pub async fn send_text(&self, text: String) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(OutboundFrame { text, ack })
            .await
            .map_err(|_| MeetchatSDKError::TransportUnavailable("链路已关闭".to_string()))?;

        match done.await {
            Ok(result) => result,
            Err(_) => Err(MeetchatSDKError::TransportUnavailable(
                "链路在写入完成前关闭".to_string(),
            )),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 客户端一侧的链路
#[derive(Debug)]
pub struct Link {
    writer: LinkWriter,
    reader: mpsc::Receiver<String>,
}

/// 链路的对端
#[derive(Debug)]
pub struct LinkPeer {
    /// 客户端写出的帧
    pub outbound: mpsc::Receiver<OutboundFrame>,
    /// 推送给客户端的帧
    pub inbound: mpsc::Sender<String>,
}

impl Link {
    /// 创建一对相连的链路端
    pub fn pair(capacity: usize) -> (Link, LinkPeer) {
        let capacity = capacity.max(1);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            Link {
                writer: LinkWriter { tx: out_tx },
                reader: in_rx,
            },
            LinkPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    pub fn split(self) -> (LinkWriter, mpsc::Receiver<String>) {
        (self.writer, self.reader)
    }
}

/// 链路建立器
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// 建立一条到 `endpoint` 的新链路
    async fn connect(&self, endpoint: &str) -> Result<Link>;
}

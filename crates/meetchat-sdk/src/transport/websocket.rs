//! WebSocket 连接器（tokio-tungstenite）

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{MeetchatSDKError, Result};
use crate::transport::link::{Connector, Link};

/// 基于 WebSocket 文本帧的连接器
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
    buffer: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            buffer: 256,
        }
    }
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| MeetchatSDKError::Timeout(format!("连接 {} 超时", endpoint)))?
            .map_err(|e| MeetchatSDKError::Transport(format!("WebSocket 握手失败: {}", e)))?;

        info!("✅ WebSocket 已连接: {}", endpoint);

        let (mut write, mut read) = ws_stream.split();
        let (link, peer) = Link::pair(self.buffer);
        let mut outbound = peer.outbound;
        let inbound = peer.inbound;

        // 写任务：把客户端帧写入 socket，写入结果回执给发送方
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let text = frame.text.clone();
                match write.send(Message::Text(text)).await {
                    Ok(()) => frame.complete(Ok(())),
                    Err(e) => {
                        warn!("⚠️ WebSocket 写入失败: {}", e);
                        frame.complete(Err(MeetchatSDKError::Transport(e.to_string())));
                        break;
                    }
                }
            }
            let _ = write.close().await;
            debug!("WebSocket 写任务退出");
        });

        // 读任务：文本帧转交给客户端，Close 或错误时结束（读端随之关闭）
        tokio::spawn(async move {
            while let Some(item) = read.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        if inbound.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("WebSocket 收到关闭帧: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("⚠️ WebSocket 读取失败: {}", e);
                        break;
                    }
                }
            }
            debug!("WebSocket 读任务退出");
        });

        Ok(link)
    }
}

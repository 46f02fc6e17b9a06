//! 内存模拟端点
//!
//! 实现 `Connector`，在进程内模拟频道制实时端点：记录收到的帧、
//! 自动回执 `Delivered`、应答历史请求，并可以拒绝连接、断开连接、
//! 让特定内容的发送失败。只在测试构建或开启 `mock` feature 时编译。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{MeetchatSDKError, Result};
use crate::storage::entities::{ChatMessage, DeliveryStatus};
use crate::transport::link::{Connector, Link, LinkPeer};
use crate::transport::protocol::{ClientFrame, ServerFrame};

#[derive(Debug, Default)]
struct MockState {
    frames: Vec<ClientFrame>,
    /// 服务端保存的频道历史
    history: HashMap<String, Vec<ChatMessage>>,
    /// 写入时失败的消息内容
    fail_contents: Vec<String>,
    /// 收到但不回执的消息内容
    silent_contents: Vec<String>,
}

#[derive(Debug)]
struct MockInner {
    accepting: AtomicBool,
    auto_ack: AtomicBool,
    connect_attempts: AtomicU32,
    state: Mutex<MockState>,
    current: Mutex<Option<(mpsc::Sender<String>, JoinHandle<()>)>>,
    activity: Notify,
}

/// 模拟端点（克隆共享同一个端点）
#[derive(Debug, Clone)]
pub struct MockConnector {
    inner: Arc<MockInner>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                accepting: AtomicBool::new(true),
                auto_ack: AtomicBool::new(true),
                connect_attempts: AtomicU32::new(0),
                state: Mutex::new(MockState::default()),
                current: Mutex::new(None),
                activity: Notify::new(),
            }),
        }
    }

    /// 拒绝所有新的连接请求
    pub fn refusing() -> Self {
        let connector = Self::new();
        connector.set_accepting(false);
        connector
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.inner.accepting.store(accepting, Ordering::SeqCst);
    }

    /// 是否自动回执 `Delivered`
    pub fn set_auto_ack(&self, auto_ack: bool) {
        self.inner.auto_ack.store(auto_ack, Ordering::SeqCst);
    }

    /// 内容为 `content` 的消息写入时失败（链路保持）
    pub fn fail_content(&self, content: impl Into<String>) {
        self.inner.state.lock().fail_contents.push(content.into());
    }

    pub fn clear_failures(&self) {
        self.inner.state.lock().fail_contents.clear();
    }

    /// 内容为 `content` 的消息照常接收，但不回执
    pub fn withhold_ack_for(&self, content: impl Into<String>) {
        self.inner.state.lock().silent_contents.push(content.into());
    }

    /// 预置服务端历史
    pub fn seed_history(&self, channel_id: &str, messages: Vec<ChatMessage>) {
        self.inner
            .state
            .lock()
            .history
            .entry(channel_id.to_string())
            .or_default()
            .extend(messages);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.current.lock().is_some()
    }

    /// 服务端收到的全部帧
    pub fn frames(&self) -> Vec<ClientFrame> {
        self.inner.state.lock().frames.clone()
    }

    /// 服务端收到的某频道消息内容（按到达顺序）
    pub fn received_contents(&self, channel_id: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .frames
            .iter()
            .filter_map(|frame| match frame {
                ClientFrame::Send { message } if message.channel_id == channel_id => {
                    Some(message.content.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// 等待服务端收到满足条件的帧集合
    pub async fn wait_until<F>(&self, mut predicate: F)
    where
        F: FnMut(&[ClientFrame]) -> bool,
    {
        loop {
            let notified = self.inner.activity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if predicate(self.inner.state.lock().frames.as_slice()) {
                return;
            }
            notified.await;
        }
    }

    /// 向当前连接推送一帧
    pub async fn push(&self, frame: ServerFrame) -> Result<()> {
        let sender = self
            .inner
            .current
            .lock()
            .as_ref()
            .map(|(tx, _)| tx.clone())
            .ok_or_else(|| MeetchatSDKError::TransportUnavailable("mock 端点无连接".to_string()))?;
        let text = frame.to_text()?;
        sender
            .send(text)
            .await
            .map_err(|_| MeetchatSDKError::TransportUnavailable("mock 链路已关闭".to_string()))
    }

    /// 模拟服务端断开当前连接
    pub fn drop_connection(&self) {
        if let Some((_, task)) = self.inner.current.lock().take() {
            task.abort();
            debug!("mock 端点断开连接");
        }
        self.inner.activity.notify_waiters();
    }

    fn serve(inner: Arc<MockInner>, peer: LinkPeer) -> JoinHandle<()> {
        let LinkPeer {
            mut outbound,
            inbound,
        } = peer;

        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let parsed = match serde_json::from_str::<ClientFrame>(&frame.text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        frame.complete(Err(MeetchatSDKError::Protocol(e.to_string())));
                        continue;
                    }
                };

                let replies = {
                    let mut state = inner.state.lock();
                    if let ClientFrame::Send { message } = &parsed {
                        if state.fail_contents.contains(&message.content) {
                            drop(state);
                            frame.complete(Err(MeetchatSDKError::Transport(format!(
                                "mock 写入失败: {}",
                                message.content
                            ))));
                            continue;
                        }
                    }
                    let replies = Self::respond(&mut state, &parsed, inner.auto_ack.load(Ordering::SeqCst));
                    state.frames.push(parsed);
                    replies
                };

                frame.complete(Ok(()));
                inner.activity.notify_waiters();

                for reply in replies {
                    let Ok(text) = reply.to_text() else {
                        continue;
                    };
                    if inbound.send(text).await.is_err() {
                        return;
                    }
                }
            }
        })
    }

    fn respond(state: &mut MockState, frame: &ClientFrame, auto_ack: bool) -> Vec<ServerFrame> {
        match frame {
            ClientFrame::Send { message } => {
                let mut stored = message.clone();
                stored.status = DeliveryStatus::Delivered;
                let history = state.history.entry(message.channel_id.clone()).or_default();
                if !history.iter().any(|m| m.id == stored.id) {
                    history.push(stored);
                }
                if auto_ack && !state.silent_contents.contains(&message.content) {
                    vec![ServerFrame::Delivered {
                        message_id: message.id.clone(),
                        channel_id: message.channel_id.clone(),
                    }]
                } else {
                    Vec::new()
                }
            }
            ClientFrame::FetchHistory {
                request_id,
                channel_id,
                limit,
            } => {
                let mut messages = state.history.get(channel_id).cloned().unwrap_or_default();
                if let Some(limit) = limit {
                    let skip = messages.len().saturating_sub(*limit);
                    messages.drain(..skip);
                }
                vec![ServerFrame::HistoryBatch {
                    request_id: request_id.clone(),
                    channel_id: channel_id.clone(),
                    messages,
                }]
            }
            ClientFrame::React {
                message_id,
                channel_id,
                reaction,
                add,
            } => vec![ServerFrame::Reaction {
                message_id: message_id.clone(),
                channel_id: channel_id.clone(),
                reaction: reaction.clone(),
                add: *add,
            }],
            ClientFrame::Subscribe { .. } | ClientFrame::Unsubscribe { .. } => Vec::new(),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link> {
        let attempt = self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.inner.accepting.load(Ordering::SeqCst) {
            debug!("mock 端点拒绝连接 #{}: {}", attempt, endpoint);
            self.inner.activity.notify_waiters();
            return Err(MeetchatSDKError::Transport("connection refused".to_string()));
        }

        let (link, peer) = Link::pair(64);
        let inbound = peer.inbound.clone();
        let task = Self::serve(self.inner.clone(), peer);
        if let Some((_, previous)) = self.inner.current.lock().replace((inbound, task)) {
            previous.abort();
        }
        debug!("mock 端点接受连接 #{}: {}", attempt, endpoint);
        self.inner.activity.notify_waiters();
        Ok(link)
    }
}

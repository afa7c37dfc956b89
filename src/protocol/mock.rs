//! Mock 传输（用于测试与无后端运行）
//!
//! 回显最后一条用户消息：整段一次返回，分块时按词切片，推送时逐块推送后发 `END`。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tokio::sync::{mpsc, Notify};

use super::transport::{ChatTransport, DeltaStream, PushEventStream, PushTransport};
use super::wire::{ChatCompletion, ChatRequest, CompletionDelta, MessageDelta, PushEvent, PushRequest, WireMessage};
use crate::conversation::Role;
use crate::core::ChatError;

fn echo_text(messages: &[WireMessage]) -> String {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)");
    format!("Echo from Mock: {}", last_user)
}

/// 按空白切块，保留分隔符，拼回去与原文一致
fn split_chunks(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(String::from).collect()
}

enum Behavior {
    Echo,
    Script(Vec<Result<CompletionDelta, ChatError>>),
    Fail(ChatError),
    Hang,
    /// 先产出 head，等到放行后再产出 tail
    Gated {
        head: Vec<Result<CompletionDelta, ChatError>>,
        tail: Vec<Result<CompletionDelta, ChatError>>,
        release: Arc<Notify>,
    },
}

/// Mock AI Chat Protocol 传输
pub struct MockTransport {
    behavior: Behavior,
}

impl MockTransport {
    pub fn echo() -> Self {
        Self { behavior: Behavior::Echo }
    }

    /// 按给定顺序产出增量（整段模式下拼接所有 content，遇到错误即返回错误）
    pub fn scripted(frames: Vec<Result<CompletionDelta, ChatError>>) -> Self {
        Self { behavior: Behavior::Script(frames) }
    }

    /// 请求直接失败
    pub fn failing(err: ChatError) -> Self {
        Self { behavior: Behavior::Fail(err) }
    }

    /// 永不返回（用于超时）
    pub fn hanging() -> Self {
        Self { behavior: Behavior::Hang }
    }

    /// 分块时先产出 head，然后停住直到返回的 Notify 被放行
    pub fn gated(
        head: Vec<Result<CompletionDelta, ChatError>>,
        tail: Vec<Result<CompletionDelta, ChatError>>,
    ) -> (Self, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        let behavior = Behavior::Gated {
            head,
            tail,
            release: release.clone(),
        };
        (Self { behavior }, release)
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ChatError> {
        let content = match &self.behavior {
            Behavior::Echo => echo_text(&request.messages),
            Behavior::Script(frames) | Behavior::Gated { head: frames, .. } => {
                let mut content = String::new();
                for frame in frames {
                    let delta = frame.clone()?;
                    content.push_str(delta.delta.content.as_deref().unwrap_or(""));
                }
                content
            }
            Behavior::Fail(err) => return Err(err.clone()),
            Behavior::Hang => std::future::pending::<String>().await,
        };
        Ok(ChatCompletion {
            message: WireMessage {
                content,
                role: Role::Assistant,
            },
            session_state: None,
            context: None,
        })
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<DeltaStream, ChatError> {
        match &self.behavior {
            Behavior::Echo => {
                let mut frames = vec![Ok(CompletionDelta {
                    delta: MessageDelta {
                        role: Some(Role::Assistant),
                        ..Default::default()
                    },
                    ..Default::default()
                })];
                frames.extend(
                    split_chunks(&echo_text(&request.messages))
                        .iter()
                        .map(|c| Ok(CompletionDelta::content(c))),
                );
                Ok(Box::pin(stream::iter(frames)))
            }
            Behavior::Script(frames) => Ok(Box::pin(stream::iter(frames.clone()))),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Hang => Ok(Box::pin(stream::pending::<Result<CompletionDelta, ChatError>>())),
            Behavior::Gated { head, tail, release } => {
                let release = release.clone();
                let wait = stream::once(async move { release.notified().await })
                    .filter_map(|_| async { None::<Result<CompletionDelta, ChatError>> });
                Ok(Box::pin(
                    stream::iter(head.clone())
                        .chain(wait)
                        .chain(stream::iter(tail.clone())),
                ))
            }
        }
    }
}

/// Mock 推送通道：send 成功后把回显分块经事件流推回，最后推送 `END`
pub struct MockPushTransport {
    events: mpsc::UnboundedSender<Result<PushEvent, ChatError>>,
    reject_status: Option<u16>,
}

impl MockPushTransport {
    /// 返回传输与对应的事件流（接收端交给 PushClient::run_receiver）
    pub fn echo() -> (Self, PushEventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (
            Self {
                events: tx,
                reject_status: None,
            },
            Box::pin(events),
        )
    }

    /// 发送时返回非 2xx 状态
    pub fn rejecting(mut self, status: u16) -> Self {
        self.reject_status = Some(status);
        self
    }

    /// 直接向事件流注入一项（测试连接错误等）
    pub fn inject(&self, item: Result<PushEvent, ChatError>) {
        let _ = self.events.send(item);
    }
}

#[async_trait]
impl PushTransport for MockPushTransport {
    async fn send(&self, request: &PushRequest) -> Result<(), ChatError> {
        if let Some(status) = self.reject_status {
            return Err(ChatError::Status {
                status,
                reason: "Mock Rejected".to_string(),
            });
        }
        for chunk in split_chunks(&echo_text(&request.messages)) {
            self.inject(Ok(PushEvent::new(chunk)));
        }
        self.inject(Ok(PushEvent::end()));
        Ok(())
    }
}

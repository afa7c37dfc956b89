//! AI Chat Protocol 客户端（整段 / 分块）
//!
//! 驱动一次请求：先提交占位符，再把整段回复或逐块增量转换成对 [`Reconciler`] 的确定调用序列，
//! 最后记录耗时。任何失败都转成 error 级日志，不向调用方抛出。

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::Instant;

use super::transport::ChatTransport;
use super::wire::{ChatRequest, CompletionDelta, WireMessage};
use crate::conversation::{LogRecord, Message, Reconciler, Role};
use crate::core::ChatError;

/// 日志条目来源
pub const SOURCE: &str = "AIChatProtocol";

/// 单次调用的累积状态：角色、累积文本、续接令牌；调用结束即丢弃
#[derive(Debug)]
struct Accumulator {
    role: Role,
    content: String,
    session_state: Option<Value>,
}

impl Accumulator {
    fn new(session_state: Option<Value>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            session_state,
        }
    }

    /// 吸收一块增量；有新文本时返回 true
    fn absorb(&mut self, chunk: CompletionDelta) -> bool {
        if let Some(state) = chunk.session_state {
            self.session_state = Some(state);
        }
        if let Some(role) = chunk.delta.role {
            self.role = role;
        }
        match chunk.delta.content {
            Some(text) if !text.is_empty() => {
                self.content.push_str(&text);
                true
            }
            _ => false,
        }
    }

    fn snapshot(&self) -> Message {
        Message::streaming(self.role, self.content.clone())
    }
}

/// 协议客户端：持有传输、是否分块、整轮超时
pub struct ProtocolClient {
    transport: Arc<dyn ChatTransport>,
    streaming: bool,
    timeout: Duration,
}

impl ProtocolClient {
    pub fn new(transport: Arc<dyn ChatTransport>, streaming: bool, timeout: Duration) -> Self {
        Self {
            transport,
            streaming,
            timeout,
        }
    }

    /// 发送一轮对话。返回本轮拿到的续接令牌（若有），由调用方在下一轮带上。
    pub async fn send_message(
        &self,
        user: &Message,
        prior: &[Message],
        sink: &dyn Reconciler,
        session_state: Option<Value>,
    ) -> Option<Value> {
        let started = Instant::now();
        let request = ChatRequest {
            messages: WireMessage::outbound(prior, user),
            session_state: session_state.clone(),
        };
        let mut acc = Accumulator::new(session_state);

        let outcome = if self.streaming {
            sink.replace_tail_placeholder(Message::placeholder());
            sink.append_log(LogRecord::info(
                SOURCE,
                "Sending messages to streaming service using AI Chat Protocol",
            ));
            tokio::time::timeout(self.timeout, self.run_streaming(&request, &mut acc, sink)).await
        } else {
            sink.append_non_streaming(Message::placeholder());
            sink.append_log(LogRecord::info(
                SOURCE,
                "Sending messages to non streaming service using AI Chat Protocol",
            ));
            tokio::time::timeout(self.timeout, self.run_whole(&request, &mut acc, sink)).await
        };

        let result = outcome.unwrap_or(Err(ChatError::Timeout(self.timeout)));
        match result {
            Ok(()) => {
                let elapsed = started.elapsed().as_millis();
                let label = if self.streaming { "Streaming" } else { "Non streaming" };
                tracing::info!(streaming = self.streaming, elapsed_ms = elapsed as u64, "Chat turn completed");
                sink.append_log(LogRecord::info(
                    SOURCE,
                    format!("{} chat response took {}ms", label, elapsed),
                ));
            }
            Err(e) => {
                tracing::warn!(streaming = self.streaming, error = %e, "Chat turn failed");
                sink.append_log(LogRecord::error(SOURCE, e.to_string()));
            }
        }

        acc.session_state
    }

    async fn run_whole(
        &self,
        request: &ChatRequest,
        acc: &mut Accumulator,
        sink: &dyn Reconciler,
    ) -> Result<(), ChatError> {
        let completion = self.transport.complete(request).await?;
        if completion.session_state.is_some() {
            acc.session_state = completion.session_state;
        }
        sink.append_non_streaming(Message::assistant(completion.message.content));
        sink.append_log(LogRecord::info(
            SOURCE,
            "Received the message from the non streaming service using AI Chat Protocol",
        ));
        Ok(())
    }

    async fn run_streaming(
        &self,
        request: &ChatRequest,
        acc: &mut Accumulator,
        sink: &dyn Reconciler,
    ) -> Result<(), ChatError> {
        let mut chunks = self.transport.complete_stream(request).await?;

        while let Some(chunk) = chunks.next().await {
            if acc.absorb(chunk?) {
                sink.replace_tail_placeholder(acc.snapshot());
                sink.append_log(LogRecord::info(
                    SOURCE,
                    "Received a chunk from the streaming service using AI Chat Protocol",
                ));
            }
        }

        sink.replace_tail_placeholder(Message::streaming(Role::Assistant, ""));
        sink.append_log(LogRecord::info(SOURCE, "End of streaming chat response"));
        sink.append(Message::completed(acc.role, acc.content.clone()));
        tracing::debug!(chars = acc.content.len(), "Stream finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::reconciler::recording::{Call, RecordingReconciler};
    use crate::conversation::LogLevel;
    use crate::protocol::mock::MockTransport;

    fn client(transport: MockTransport, streaming: bool) -> ProtocolClient {
        ProtocolClient::new(Arc::new(transport), streaming, Duration::from_secs(30))
    }

    fn chunk(content: &str) -> Result<CompletionDelta, ChatError> {
        Ok(CompletionDelta::content(content))
    }

    fn duration_logs(rec: &RecordingReconciler) -> usize {
        rec.logs().iter().filter(|r| r.message.contains("took")).count()
    }

    #[tokio::test]
    async fn test_streaming_end_to_end() {
        let rec = RecordingReconciler::default();
        let c = client(
            MockTransport::scripted(vec![chunk("Hel"), chunk("lo"), chunk("")]),
            true,
        );
        let user = Message::user("hi");
        c.send_message(&user, &[], &rec, None).await;

        let calls = rec.calls();
        let chunk_commits: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::ReplaceTail(m) if !m.is_placeholder() && m.is_visible() => Some(m.text().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_commits, vec!["Hel", "Hello"]);

        // 重置后追加完成消息
        let tail: Vec<_> = calls
            .iter()
            .filter(|c| !matches!(c, Call::Log(_)))
            .rev()
            .take(2)
            .collect();
        assert_eq!(*tail[0], Call::Append(Message::assistant("Hello")));
        assert_eq!(*tail[1], Call::ReplaceTail(Message::streaming(Role::Assistant, "")));
        assert_eq!(duration_logs(&rec), 1);

        let final_messages = rec.replay(vec![user.clone()]);
        let visible: Vec<_> = final_messages.iter().filter(|m| m.is_visible()).collect();
        assert_eq!(visible, vec![&user, &Message::assistant("Hello")]);
    }

    #[tokio::test]
    async fn test_streaming_starts_with_placeholder() {
        let rec = RecordingReconciler::default();
        let c = client(MockTransport::scripted(vec![chunk("x")]), true);
        c.send_message(&Message::user("q"), &[], &rec, None).await;
        assert_eq!(rec.calls()[0], Call::ReplaceTail(Message::placeholder()));
    }

    #[tokio::test]
    async fn test_streaming_role_and_session_state() {
        let rec = RecordingReconciler::default();
        let first = CompletionDelta {
            delta: crate::protocol::wire::MessageDelta {
                role: Some(Role::Assistant),
                content: None,
                context: None,
            },
            session_state: Some(serde_json::json!("token-1")),
            context: None,
        };
        let c = client(MockTransport::scripted(vec![Ok(first), chunk("ok")]), true);
        let state = c.send_message(&Message::user("q"), &[], &rec, None).await;
        assert_eq!(state, Some(serde_json::json!("token-1")));
        // 只有 role 的块不产生提交
        let commits = rec
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::ReplaceTail(m) if m.text() == "ok"))
            .count();
        assert_eq!(commits, 1);
    }

    #[tokio::test]
    async fn test_non_streaming_commit() {
        let rec = RecordingReconciler::default();
        let c = client(MockTransport::scripted(vec![chunk("hello")]), false);
        let user = Message::user("hi");
        c.send_message(&user, &[], &rec, None).await;

        let calls = rec.calls();
        assert_eq!(calls[0], Call::AppendNonStreaming(Message::placeholder()));
        assert!(calls.contains(&Call::AppendNonStreaming(Message::assistant("hello"))));
        assert_eq!(rec.replay(vec![user.clone()]), vec![user, Message::assistant("hello")]);
        assert_eq!(duration_logs(&rec), 1);
        assert!(rec.logs().last().unwrap().message.starts_with("Non streaming chat response took"));
    }

    #[tokio::test]
    async fn test_protocol_error_logged_with_server_message() {
        let rec = RecordingReconciler::default();
        let err = ChatError::Protocol {
            code: "rate_limit".into(),
            message: "rate limited".into(),
        };
        let c = client(MockTransport::failing(err), true);
        let user = Message::user("hi");
        c.send_message(&user, &[], &rec, None).await;

        let last = rec.logs().pop().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.message, "rate limited");
        assert_eq!(rec.replay(vec![user.clone()]), vec![user, Message::placeholder()]);
        assert_eq!(duration_logs(&rec), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_error_stops_turn() {
        let rec = RecordingReconciler::default();
        let err = ChatError::Protocol {
            code: "internal_error".into(),
            message: "boom".into(),
        };
        let c = client(MockTransport::scripted(vec![chunk("par"), Err(err)]), true);
        c.send_message(&Message::user("q"), &[], &rec, None).await;

        assert!(!rec.calls().iter().any(|c| matches!(c, Call::Append(_))));
        let last = rec.logs().pop().unwrap();
        assert!(last.is_error());
        assert_eq!(last.message, "boom");
    }

    #[tokio::test]
    async fn test_unrecognized_failure_is_logged() {
        let rec = RecordingReconciler::default();
        let c = client(MockTransport::failing(ChatError::Network("refused".into())), false);
        c.send_message(&Message::user("q"), &[], &rec, None).await;
        let last = rec.logs().pop().unwrap();
        assert!(last.is_error());
        assert!(last.message.contains("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_logged() {
        let rec = RecordingReconciler::default();
        let c = ProtocolClient::new(Arc::new(MockTransport::hanging()), true, Duration::from_secs(5));
        c.send_message(&Message::user("q"), &[], &rec, None).await;
        let last = rec.logs().pop().unwrap();
        assert!(last.is_error());
        assert_eq!(last.message, "Request timed out after 5s");
    }

    #[tokio::test]
    async fn test_session_state_passed_through_when_absent() {
        let rec = RecordingReconciler::default();
        let c = client(MockTransport::echo(), false);
        let state = c
            .send_message(&Message::user("q"), &[], &rec, Some(serde_json::json!(7)))
            .await;
        assert_eq!(state, Some(serde_json::json!(7)));
    }
}

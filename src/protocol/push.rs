//! 推送通道客户端
//!
//! 发送与接收解耦：`send` 只负责 POST 请求（fire-and-forget），回复经持久连接以推送事件到达，
//! 由 `run_receiver` 消费。内容为 `END` 的事件表示本轮结束。
//!
//! 同一通道同一时刻只允许一轮在途：新的 `send` 会等待上一轮 `END`（最多等一个流超时）。
//! 在途期间若超过流超时没有任何事件，记录错误并复位本轮。

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;

use super::transport::{PushEventStream, PushTransport};
use super::wire::{PushEvent, PushRequest, WireMessage};
use crate::conversation::{LogRecord, Message, Reconciler, Role};
use crate::core::ChatError;

/// 日志条目来源
pub const SOURCE: &str = "PushChatService";

/// 推送发送端默认地址（可经配置 / 环境变量覆盖）
pub const DEFAULT_PUSH_ENDPOINT: &str = "http://localhost:7071/api/chat/signalr";

/// 当前轮次的状态（放在 watch 里，便于等待「在途」变化）
#[derive(Debug, Clone)]
struct PushTurn {
    in_flight: bool,
    /// 最近一次 send 的时间，用于计算耗时
    started: Option<Instant>,
    /// 最近一次活动（send 或收到事件），用于看门狗
    last_activity: Instant,
    content: String,
}

impl PushTurn {
    fn idle() -> Self {
        Self {
            in_flight: false,
            started: None,
            last_activity: Instant::now(),
            content: String::new(),
        }
    }
}

pub struct PushClient {
    transport: Arc<dyn PushTransport>,
    timeout: Duration,
    turn: watch::Sender<PushTurn>,
}

impl PushClient {
    pub fn new(transport: Arc<dyn PushTransport>, timeout: Duration) -> Self {
        let (turn, _) = watch::channel(PushTurn::idle());
        Self {
            transport,
            timeout,
            turn,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.turn.borrow().in_flight
    }

    fn reset(&self) {
        self.turn.send_modify(|t| *t = PushTurn::idle());
    }

    /// 发送一轮对话；失败只写日志，不向调用方抛出
    pub async fn send(&self, user: &Message, prior: &[Message], sink: &dyn Reconciler) {
        let mut rx = self.turn.subscribe();
        let waited = tokio::time::timeout(self.timeout, async {
            let _ = rx.wait_for(|t| !t.in_flight).await;
        })
        .await;
        if waited.is_err() {
            tracing::warn!("Previous push turn still in flight, abandoning it");
            sink.append_log(LogRecord::error(
                SOURCE,
                "Previous push response did not finish in time",
            ));
            self.reset();
        }

        let now = Instant::now();
        self.turn.send_modify(|t| {
            t.in_flight = true;
            t.started = Some(now);
            t.last_activity = now;
            t.content.clear();
        });

        sink.replace_tail_placeholder(Message::placeholder());
        sink.append_log(LogRecord::info(SOURCE, "Sending messages to push service"));

        let request = PushRequest {
            messages: WireMessage::outbound(prior, user),
        };
        if let Err(e) = self.transport.send(&request).await {
            tracing::warn!(error = %e, "Push send failed");
            // 状态码错误先单独记一条，再与其他失败一样记发送失败
            if matches!(e, ChatError::Status { .. }) {
                sink.append_log(LogRecord::error(SOURCE, e.to_string()));
            }
            sink.append_log(LogRecord::error(
                SOURCE,
                format!("Error sending message via push channel: {}", e),
            ));
            self.reset();
        }
    }

    /// 处理一个推送事件；没有在途轮次时（如看门狗已复位）事件被丢弃
    pub fn handle_event(&self, event: PushEvent, sink: &dyn Reconciler) {
        if !self.is_in_flight() {
            tracing::debug!(end = event.is_end(), "Push event with no turn in flight, dropped");
            return;
        }

        if !event.is_end() {
            let mut snapshot = String::new();
            self.turn.send_modify(|t| {
                t.content.push_str(&event.content);
                t.last_activity = Instant::now();
                snapshot = t.content.clone();
            });
            sink.replace_tail_placeholder(Message::streaming(Role::Assistant, snapshot));
            sink.append_log(LogRecord::info(
                SOURCE,
                "Received a chunk from the push service",
            ));
            return;
        }

        let finished = self.turn.send_replace(PushTurn::idle());

        sink.replace_tail_placeholder(Message::streaming(Role::Assistant, ""));
        sink.append_log(LogRecord::info(SOURCE, "End of streaming chat response"));
        sink.append(Message::assistant(finished.content));
        if let Some(started) = finished.started {
            let elapsed = started.elapsed().as_millis();
            tracing::info!(elapsed_ms = elapsed as u64, "Push turn completed");
            sink.append_log(LogRecord::info(
                SOURCE,
                format!("Push chat response took {}ms", elapsed),
            ));
        }
    }

    /// 在途时等到「最近活动 + 超时」；空闲时一直挂起
    async fn watchdog(&self) {
        let mut rx = self.turn.subscribe();
        let _ = rx.wait_for(|t| t.in_flight).await;
        let deadline = self.turn.borrow().last_activity + self.timeout;
        tokio::time::sleep_until(deadline).await;
    }

    /// 消费推送事件直到事件流结束；连接错误只记录，不中断
    pub async fn run_receiver(&self, mut events: PushEventStream, sink: &dyn Reconciler) {
        loop {
            let next = tokio::select! {
                item = events.next() => item,
                _ = self.watchdog() => {
                    tracing::warn!("Push response timed out");
                    sink.append_log(LogRecord::error(
                        SOURCE,
                        ChatError::Timeout(self.timeout).to_string(),
                    ));
                    self.reset();
                    continue;
                }
            };

            match next {
                Some(Ok(event)) => self.handle_event(event, sink),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Push connection error");
                    sink.append_log(LogRecord::error(
                        SOURCE,
                        format!("Push connection error: {}", e),
                    ));
                }
                None => {
                    tracing::info!("Push event stream closed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::reconciler::recording::{Call, RecordingReconciler};
    use crate::protocol::mock::MockPushTransport;

    fn client(transport: MockPushTransport) -> PushClient {
        PushClient::new(Arc::new(transport), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_events_accumulate_until_end() {
        let (transport, _events) = MockPushTransport::echo();
        let c = client(transport);
        let rec = RecordingReconciler::default();
        let user = Message::user("q");

        c.send(&user, &[], &rec).await;
        assert!(c.is_in_flight());
        c.handle_event(PushEvent::new("Hel"), &rec);
        c.handle_event(PushEvent::new("lo"), &rec);
        c.handle_event(PushEvent::end(), &rec);
        assert!(!c.is_in_flight());

        let calls = rec.calls();
        assert_eq!(calls[0], Call::ReplaceTail(Message::placeholder()));
        assert!(calls.contains(&Call::ReplaceTail(Message::streaming(Role::Assistant, "Hello"))));
        assert!(calls.contains(&Call::Append(Message::assistant("Hello"))));
        let durations = rec.logs().iter().filter(|r| r.message.contains("took")).count();
        assert_eq!(durations, 1);

        let visible: Vec<_> = rec
            .replay(vec![user.clone()])
            .into_iter()
            .filter(|m| m.is_visible())
            .collect();
        assert_eq!(visible, vec![user, Message::assistant("Hello")]);
    }

    #[tokio::test]
    async fn test_rejected_send_logs_status() {
        let (transport, _events) = MockPushTransport::echo();
        let c = client(transport.rejecting(503));
        let rec = RecordingReconciler::default();
        c.send(&Message::user("q"), &[], &rec).await;

        let errors: Vec<_> = rec
            .logs()
            .into_iter()
            .filter(|r| r.is_error())
            .map(|r| r.message)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("Failed to send messages: 503"));
        assert!(errors[1].starts_with("Error sending message via push channel: Failed to send messages: 503"));
        assert!(!c.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_logs_connection_error_and_continues() {
        let (transport, events) = MockPushTransport::echo();
        transport.inject(Err(ChatError::Connection("reset by peer".into())));
        let c = client(transport);
        let rec = RecordingReconciler::default();

        // send 把回显分块与 END 推入事件流，排在连接错误之后
        c.send(&Message::user("q"), &[], &rec).await;
        let _ = tokio::time::timeout(Duration::from_millis(200), c.run_receiver(events, &rec)).await;

        let logs = rec.logs();
        assert!(logs.iter().any(|r| r.is_error() && r.message.contains("reset by peer")));
        assert!(rec
            .calls()
            .contains(&Call::Append(Message::assistant("Echo from Mock: q"))));
        assert!(!c.is_in_flight());
    }

    #[tokio::test]
    async fn test_spurious_end_ignored() {
        let (transport, _events) = MockPushTransport::echo();
        let c = client(transport);
        let rec = RecordingReconciler::default();
        c.handle_event(PushEvent::end(), &rec);
        assert!(rec.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_resets_stalled_turn() {
        let (transport, events) = MockPushTransport::echo();
        let c = PushClient::new(Arc::new(transport.rejecting(500)), Duration::from_secs(5));
        let rec = RecordingReconciler::default();

        // 手动置为在途，模拟已发出但迟迟收不到回复
        c.turn.send_modify(|t| {
            t.in_flight = true;
            t.started = Some(Instant::now());
            t.last_activity = Instant::now();
        });
        let _ = tokio::time::timeout(Duration::from_secs(6), c.run_receiver(events, &rec)).await;

        assert!(!c.is_in_flight());
        let last = rec.logs().pop().unwrap();
        assert_eq!(last.message, "Request timed out after 5s");
    }

    #[tokio::test]
    async fn test_late_events_after_reset_dropped() {
        let (transport, _events) = MockPushTransport::echo();
        let c = client(transport);
        let rec = RecordingReconciler::default();

        c.turn.send_modify(|t| {
            t.in_flight = true;
            t.started = Some(Instant::now());
        });
        c.handle_event(PushEvent::new("partial"), &rec);
        let before = rec.calls().len();
        // 看门狗复位后，迟到的块与 END 都不能提交成回复
        c.reset();
        c.handle_event(PushEvent::new(" stray"), &rec);
        c.handle_event(PushEvent::end(), &rec);

        assert_eq!(rec.calls().len(), before);
        assert!(!rec.calls().iter().any(|c| matches!(c, Call::Append(_))));
    }
}

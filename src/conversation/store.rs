//! 会话存储：一个聚合对象持有 N 个互相独立的通道
//!
//! 状态放在 `watch::Sender` 里，每次变更用 `send_modify` 原子完成；
//! 渲染层订阅 `watch::Receiver`，只读快照。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::log::LogRecord;
use super::message::Message;
use super::reconciler::{self, Reconciler};

/// 通道（一种投递方式对应一组会话 + 日志）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    NonStreaming,
    Streaming,
    StreamingFunction,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::NonStreaming,
        ChannelKind::Streaming,
        ChannelKind::StreamingFunction,
    ];

    /// 面板标题
    pub fn title(&self) -> &'static str {
        match self {
            ChannelKind::NonStreaming => "Non-Streaming w/AI Chat Protocol",
            ChannelKind::Streaming => "Streaming w/AI Chat Protocol",
            ChannelKind::StreamingFunction => "Streaming w/Function Host",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::NonStreaming => write!(f, "non_streaming"),
            ChannelKind::Streaming => write!(f, "streaming"),
            ChannelKind::StreamingFunction => write!(f, "streaming_function"),
        }
    }
}

/// 单个通道的会话与诊断日志
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ChannelLog {
    pub messages: Vec<Message>,
    pub log: Vec<LogRecord>,
}

impl ChannelLog {
    /// 渲染可见的消息（隐藏回合结束时的空清空标记）
    pub fn visible_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_visible())
    }
}

/// 整个存储的快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub channels: BTreeMap<ChannelKind, ChannelLog>,
}

impl StoreSnapshot {
    pub fn channel(&self, kind: ChannelKind) -> Option<&ChannelLog> {
        self.channels.get(&kind)
    }
}

/// 会话存储（可廉价 clone，内部共享同一个 watch 通道）
#[derive(Clone, Debug)]
pub struct ConversationStore {
    tx: Arc<watch::Sender<StoreSnapshot>>,
}

impl ConversationStore {
    pub fn new(kinds: &[ChannelKind]) -> Self {
        let snapshot = StoreSnapshot {
            channels: kinds.iter().map(|k| (*k, ChannelLog::default())).collect(),
        };
        let (tx, _) = watch::channel(snapshot);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.tx.borrow().clone()
    }

    pub fn kinds(&self) -> Vec<ChannelKind> {
        self.tx.borrow().channels.keys().copied().collect()
    }

    /// 某通道当前的消息序列（调度时用作历史快照）
    pub fn messages(&self, kind: ChannelKind) -> Vec<Message> {
        self.tx
            .borrow()
            .channels
            .get(&kind)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    fn modify(&self, kind: ChannelKind, f: impl FnOnce(&mut ChannelLog)) {
        self.tx.send_if_modified(|state| match state.channels.get_mut(&kind) {
            Some(channel) => {
                f(channel);
                true
            }
            None => {
                tracing::warn!(channel = %kind, "Mutation for unknown channel ignored");
                false
            }
        });
    }

    pub fn append(&self, kind: ChannelKind, message: Message) {
        self.modify(kind, |c| reconciler::append(&mut c.messages, message));
    }

    pub fn replace_tail_placeholder(&self, kind: ChannelKind, message: Message) {
        self.modify(kind, |c| {
            reconciler::replace_tail_placeholder(&mut c.messages, message)
        });
    }

    pub fn append_non_streaming(&self, kind: ChannelKind, message: Message) {
        self.modify(kind, |c| {
            reconciler::append_non_streaming(&mut c.messages, message)
        });
    }

    pub fn append_log(&self, kind: ChannelKind, record: LogRecord) {
        self.modify(kind, |c| reconciler::append_log(&mut c.log, record));
    }

    /// 绑定到单个通道的 Reconciler
    pub fn sink(&self, kind: ChannelKind) -> ChannelSink {
        ChannelSink {
            store: self.clone(),
            kind,
        }
    }
}

/// 存储 + 通道标识：协议客户端看到的唯一写入口
#[derive(Clone, Debug)]
pub struct ChannelSink {
    store: ConversationStore,
    kind: ChannelKind,
}

impl ChannelSink {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }
}

impl Reconciler for ChannelSink {
    fn append(&self, message: Message) {
        self.store.append(self.kind, message);
    }

    fn replace_tail_placeholder(&self, message: Message) {
        self.store.replace_tail_placeholder(self.kind, message);
    }

    fn append_non_streaming(&self, message: Message) {
        self.store.append_non_streaming(self.kind, message);
    }

    fn append_log(&self, record: LogRecord) {
        self.store.append_log(self.kind, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_are_independent() {
        let store = ConversationStore::new(&ChannelKind::ALL);
        store.append(ChannelKind::Streaming, Message::user("a"));
        store.append_log(ChannelKind::Streaming, LogRecord::info("t", "x"));

        let snap = store.snapshot();
        assert_eq!(snap.channel(ChannelKind::Streaming).unwrap().messages.len(), 1);
        assert_eq!(snap.channel(ChannelKind::Streaming).unwrap().log.len(), 1);
        assert!(snap.channel(ChannelKind::NonStreaming).unwrap().messages.is_empty());
        assert!(snap.channel(ChannelKind::StreamingFunction).unwrap().log.is_empty());
    }

    #[test]
    fn test_unknown_channel_is_ignored() {
        let store = ConversationStore::new(&[ChannelKind::Streaming]);
        store.append(ChannelKind::NonStreaming, Message::user("a"));
        assert!(store.snapshot().channel(ChannelKind::NonStreaming).is_none());
        assert_eq!(store.kinds(), vec![ChannelKind::Streaming]);
    }

    #[test]
    fn test_sink_writes_to_its_channel() {
        let store = ConversationStore::new(&ChannelKind::ALL);
        let sink = store.sink(ChannelKind::NonStreaming);
        sink.append(Message::user("q"));
        sink.append_non_streaming(Message::placeholder());
        sink.append_non_streaming(Message::assistant("r"));

        let messages = store.messages(ChannelKind::NonStreaming);
        assert_eq!(messages, vec![Message::user("q"), Message::assistant("r")]);
    }

    #[tokio::test]
    async fn test_subscriber_sees_changes() {
        let store = ConversationStore::new(&ChannelKind::ALL);
        let mut rx = store.subscribe();
        store.append(ChannelKind::Streaming, Message::user("a"));
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().channel(ChannelKind::Streaming).unwrap().messages.len(),
            1
        );
    }

    #[test]
    fn test_visible_messages_hide_reset_marker() {
        let log = ChannelLog {
            messages: vec![
                Message::user("q"),
                Message::streaming(crate::conversation::Role::Assistant, ""),
                Message::assistant("a"),
            ],
            log: vec![],
        };
        assert_eq!(log.visible_messages().count(), 2);
    }
}

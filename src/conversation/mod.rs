//! 会话层：消息模型、诊断日志、变更规则（Reconciler）与多通道存储

pub mod log;
pub mod message;
pub mod reconciler;
pub mod store;

pub use log::{LogLevel, LogRecord};
pub use message::{Message, MessageContent, Role, Sender, PLACEHOLDER_TEXT};
pub use reconciler::Reconciler;
pub use store::{ChannelKind, ChannelLog, ChannelSink, ConversationStore, StoreSnapshot};

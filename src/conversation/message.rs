//! 会话消息：角色、发送方与带标签的内容状态
//!
//! 内容用 `Pending | Streaming | Final` 三态区分「等待回复」「流式进行中」「已完成」，
//! 不再靠比较 `"..."` 字符串判断占位符。

use serde::{Deserialize, Serialize};

/// 占位符在界面上显示的文本
pub const PLACEHOLDER_TEXT: &str = "...";

/// 消息角色（与 AI Chat Protocol 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// 发送方：仅用于展示，不上线
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// 消息内容状态
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum MessageContent {
    /// 已发出请求、尚未收到任何回复（占位符）
    Pending,
    /// 流式回复进行中（累积到目前为止的文本）
    Streaming(String),
    /// 完整消息
    Final(String),
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub sender: Sender,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            sender: Sender::User,
            content: MessageContent::Final(text.into()),
        }
    }

    /// 「等待回复」占位符
    pub fn placeholder() -> Self {
        Self {
            role: Role::Assistant,
            sender: Sender::Ai,
            content: MessageContent::Pending,
        }
    }

    /// 流式快照；空文本即回合结束时的「清空」标记，渲染时隐藏
    pub fn streaming(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            sender: Sender::Ai,
            content: MessageContent::Streaming(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::completed(Role::Assistant, text)
    }

    pub fn completed(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            sender: Sender::Ai,
            content: MessageContent::Final(text.into()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.content, MessageContent::Pending)
    }

    /// 占位符或流式中间态（可被下一次快照替换）
    pub fn is_transient(&self) -> bool {
        self.role != Role::User && !matches!(self.content, MessageContent::Final(_))
    }

    pub fn is_final(&self) -> bool {
        matches!(self.content, MessageContent::Final(_))
    }

    /// 展示用文本：占位符显示 `...`
    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::Pending => PLACEHOLDER_TEXT,
            MessageContent::Streaming(t) | MessageContent::Final(t) => t,
        }
    }

    /// 渲染层据此隐藏空消息（回合结束的清空标记）
    pub fn is_visible(&self) -> bool {
        !self.text().is_empty()
    }
}

//! AI Chat Protocol 线上格式
//!
//! 请求：`{messages: [{content, role}], sessionState?}`；
//! 非流式响应：`{message: {content, role}, sessionState?, context?}`；
//! 流式响应：按行分隔的 JSON，每行是增量 `{delta: {role?, content?}, sessionState?}`
//! 或错误（`{code, message}` 或 `{error: {code, message}}`）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::{Message, MessageContent, Role};
use crate::core::ChatError;

/// 线上的单条消息（sender 只用于展示，不上线）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub content: String,
    pub role: Role,
}

impl WireMessage {
    /// 会话中的消息投影为线上格式；占位符与流式中间态不会上线
    pub fn project(message: &Message) -> Option<Self> {
        match &message.content {
            MessageContent::Final(text) => Some(Self {
                content: text.clone(),
                role: message.role,
            }),
            MessageContent::Pending | MessageContent::Streaming(_) => None,
        }
    }

    /// prior + user 组成出站列表
    pub fn outbound(prior: &[Message], user: &Message) -> Vec<Self> {
        prior
            .iter()
            .chain(std::iter::once(user))
            .filter_map(Self::project)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    #[serde(rename = "sessionState", skip_serializing_if = "Option::is_none")]
    pub session_state: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    pub message: WireMessage,
    #[serde(rename = "sessionState", default)]
    pub session_state: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

/// 流式响应中的一块
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompletionDelta {
    pub delta: MessageDelta,
    #[serde(rename = "sessionState", default)]
    pub session_state: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
}

impl CompletionDelta {
    pub fn content(text: &str) -> Self {
        Self {
            delta: MessageDelta {
                content: Some(text.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// 服务端结构化错误
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl From<WireError> for ChatError {
    fn from(e: WireError) -> Self {
        ChatError::Protocol {
            code: e.code,
            message: e.message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Wrapped { error: WireError },
    Bare(WireError),
}

impl ErrorBody {
    fn into_wire(self) -> WireError {
        match self {
            ErrorBody::Wrapped { error } => error,
            ErrorBody::Bare(e) => e,
        }
    }
}

/// 尝试把一段 JSON 识别为结构化错误（以 code 字段为判据）
pub fn parse_error(body: &str) -> Option<WireError> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(ErrorBody::into_wire)
}

/// 解析流中的一行；空行（含 SSE 心跳）返回 `None`
pub fn parse_stream_line(line: &str) -> Option<Result<CompletionDelta, ChatError>> {
    let line = line.trim();
    let line = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    if line.is_empty() {
        return None;
    }
    if let Some(err) = parse_error(line) {
        return Some(Err(err.into()));
    }
    Some(serde_json::from_str::<CompletionDelta>(line).map_err(ChatError::from))
}

/// 推送通道请求体
#[derive(Debug, Clone, Serialize)]
pub struct PushRequest {
    pub messages: Vec<WireMessage>,
}

/// 推送事件：`{content}`，内容为 `END` 表示本轮结束
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushEvent {
    pub content: String,
}

pub const END_SENTINEL: &str = "END";

impl PushEvent {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn end() -> Self {
        Self::new(END_SENTINEL)
    }

    pub fn is_end(&self) -> bool {
        self.content == END_SENTINEL
    }
}

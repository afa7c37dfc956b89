//! 通道错误类型
//!
//! 所有错误都在客户端边界转成 error 级日志条目，不会抛给调用方。

use std::time::Duration;

use thiserror::Error;

/// 一次请求（或推送连接）中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    /// 服务端返回的结构化错误（带 code），日志中原样使用服务端的 message
    #[error("{message}")]
    Protocol { code: String, message: String },

    #[error("Failed to send messages: {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Network(format!("timeout: {}", e))
        } else if e.is_decode() {
            ChatError::Decode(e.to_string())
        } else {
            ChatError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Decode(e.to_string())
    }
}

//! 推送连接：SignalR JSON Hub 协议 over WebSocket
//!
//! 直接连接配置的 hub 地址（不做 negotiate），握手后解析以 0x1E 分隔的帧：
//! - `type: 1` 调用帧，目标为 `ReceiveMessage` 时取第一个参数 `{content}`
//! - `type: 6` 心跳，忽略
//! - `type: 7` 关闭，作为连接错误上报
//!
//! 连接断开后按固定间隔重连，每次失败都作为 Err 项交给接收端记录。

use std::time::Duration;

use futures_util::{stream, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::transport::PushEventStream;
use super::wire::PushEvent;
use crate::core::ChatError;

/// SignalR 记录分隔符
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// 服务端推送回复时调用的方法名
pub const RECEIVE_TARGET: &str = "ReceiveMessage";

const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";

#[derive(Debug, Deserialize)]
struct HubFrame {
    #[serde(rename = "type", default)]
    kind: Option<u8>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// 解析单个帧（不含分隔符）。与推送无关的帧返回 `Ok(None)`。
pub fn parse_frame(frame: &str) -> Result<Option<PushEvent>, ChatError> {
    let frame = frame.trim();
    if frame.is_empty() {
        return Ok(None);
    }
    let parsed: HubFrame = serde_json::from_str(frame)?;
    match parsed.kind {
        // 握手响应：`{}` 或 `{"error": "..."}`
        None => match parsed.error {
            Some(err) => Err(ChatError::Connection(format!("hub handshake failed: {}", err))),
            None => Ok(None),
        },
        Some(1) if parsed.target.as_deref() == Some(RECEIVE_TARGET) => {
            let arg = parsed
                .arguments
                .into_iter()
                .next()
                .ok_or_else(|| ChatError::Decode("ReceiveMessage without arguments".into()))?;
            Ok(Some(serde_json::from_value(arg)?))
        }
        Some(1) => {
            tracing::debug!(method = ?parsed.target, "Ignoring hub invocation");
            Ok(None)
        }
        Some(7) => Err(ChatError::Connection(format!(
            "hub closed the connection: {}",
            parsed.error.as_deref().unwrap_or("no reason given")
        ))),
        Some(_) => Ok(None),
    }
}

/// 一条文本消息可能包含多个帧
pub fn parse_frames(text: &str) -> Vec<Result<PushEvent, ChatError>> {
    text.split(RECORD_SEPARATOR)
        .filter_map(|frame| parse_frame(frame).transpose())
        .collect()
}

/// 建立（并维持）到 hub 的连接，返回推送事件流。
/// 事件流被丢弃后后台任务在下一次投递时退出。
pub fn connect(hub_url: &str, reconnect_delay: Duration) -> PushEventStream {
    let (tx, rx) = mpsc::unbounded_channel::<Result<PushEvent, ChatError>>();
    let url = hub_url.to_string();

    tokio::spawn(async move {
        loop {
            if let Err(e) = pump(&url, &tx).await {
                tracing::warn!(hub = %url, error = %e, "Hub connection lost");
                if tx.send(Err(e)).is_err() {
                    break;
                }
            }
            if tx.is_closed() {
                break;
            }
            tokio::time::sleep(reconnect_delay).await;
        }
        tracing::debug!(hub = %url, "Hub reader stopped");
    });

    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// 单次连接：握手、读帧、转发，直到连接结束
async fn pump(
    url: &str,
    tx: &mpsc::UnboundedSender<Result<PushEvent, ChatError>>,
) -> Result<(), ChatError> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ChatError::Connection(format!("connect to {} failed: {}", url, e)))?;
    tracing::info!(hub = %url, "Connected to push hub");

    let (mut write, mut read) = ws.split();
    write
        .send(WsMessage::Text(HANDSHAKE.to_string()))
        .await
        .map_err(|e| ChatError::Connection(e.to_string()))?;

    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| ChatError::Connection(e.to_string()))?;
        match msg {
            WsMessage::Text(text) => {
                for item in parse_frames(&text) {
                    let closed = matches!(item, Err(ChatError::Connection(_)));
                    if tx.send(item).is_err() {
                        return Ok(());
                    }
                    if closed {
                        return Ok(());
                    }
                }
            }
            WsMessage::Close(frame) => {
                return Err(ChatError::Connection(format!(
                    "hub closed: {}",
                    frame.map(|f| f.reason.to_string()).unwrap_or_default()
                )));
            }
            _ => {}
        }
    }
    Err(ChatError::Connection("hub stream ended".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_receive_message() {
        let frame = r#"{"type":1,"target":"ReceiveMessage","arguments":[{"content":"Hel"}]}"#;
        assert_eq!(parse_frame(frame).unwrap(), Some(PushEvent::new("Hel")));
    }

    #[test]
    fn test_handshake_and_ping_ignored() {
        assert_eq!(parse_frame("{}").unwrap(), None);
        assert_eq!(parse_frame(r#"{"type":6}"#).unwrap(), None);
        assert_eq!(parse_frame(r#"{"type":1,"target":"Other","arguments":[]}"#).unwrap(), None);
    }

    #[test]
    fn test_close_and_handshake_error() {
        assert!(matches!(
            parse_frame(r#"{"type":7,"error":"server shutdown"}"#),
            Err(ChatError::Connection(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"error":"unsupported protocol"}"#),
            Err(ChatError::Connection(_))
        ));
    }

    #[test]
    fn test_multiple_frames_in_one_message() {
        let text = "{}\u{1e}{\"type\":1,\"target\":\"ReceiveMessage\",\"arguments\":[{\"content\":\"a\"}]}\u{1e}{\"type\":1,\"target\":\"ReceiveMessage\",\"arguments\":[{\"content\":\"END\"}]}\u{1e}";
        let events: Vec<_> = parse_frames(text).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(events, vec![PushEvent::new("a"), PushEvent::end()]);
    }
}

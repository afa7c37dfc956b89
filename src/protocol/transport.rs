//! 传输层抽象
//!
//! [`ChatTransport`]：整段完成（complete）与分块完成（complete_stream）；
//! [`PushTransport`]：推送通道的发送端（回复经推送连接异步到达，不在 HTTP 响应体里）。

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use super::wire::{self, ChatCompletion, ChatRequest, CompletionDelta, PushEvent, PushRequest};
use crate::core::ChatError;

/// 流式响应：逐块产出增量或错误
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<CompletionDelta, ChatError>> + Send>>;

/// 推送事件流（连接级错误作为 Err 项交给接收端记录）
pub type PushEventStream = Pin<Box<dyn Stream<Item = Result<PushEvent, ChatError>> + Send>>;

/// 单行最大长度（防止异常响应撑爆内存）
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// 传输能力描述：端点 + 是否推送 + 是否分块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportProfile {
    pub endpoint: String,
    pub supports_push: bool,
    pub supports_chunking: bool,
    /// 接受无效证书（本地函数宿主常用自签名证书）
    pub allow_insecure: bool,
}

/// 由能力描述推导出的投递方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Whole,
    Chunked,
    Push,
}

impl TransportProfile {
    pub fn delivery(&self) -> Delivery {
        if self.supports_push {
            Delivery::Push
        } else if self.supports_chunking {
            Delivery::Chunked
        } else {
            Delivery::Whole
        }
    }
}

/// AI Chat Protocol 传输
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// 整段完成
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ChatError>;

    /// 分块完成，返回增量流
    async fn complete_stream(&self, request: &ChatRequest) -> Result<DeltaStream, ChatError>;
}

/// 推送通道发送端（fire-and-forget）
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, request: &PushRequest) -> Result<(), ChatError>;
}

fn build_http_client(allow_insecure: bool) -> Result<reqwest::Client, ChatError> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(allow_insecure)
        .build()
        .map_err(|e| ChatError::Config(format!("HTTP client: {}", e)))
}

/// 非 2xx：响应体能识别为结构化错误则为协议错误，否则为状态错误
async fn status_error(response: reqwest::Response) -> ChatError {
    let status = response.status();
    let reason = status.canonical_reason().unwrap_or("").to_string();
    let body = response.text().await.unwrap_or_default();
    match wire::parse_error(&body) {
        Some(err) => err.into(),
        None => ChatError::Status {
            status: status.as_u16(),
            reason,
        },
    }
}

/// 基于 reqwest 的 AI Chat Protocol 客户端：整段 POST `{base}`，分块 POST `{base}/stream`
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(profile: &TransportProfile) -> Result<Self, ChatError> {
        Ok(Self {
            client: build_http_client(profile.allow_insecure)?,
            base_url: profile.endpoint.clone(),
        })
    }

    pub fn completion_url(&self) -> &str {
        &self.base_url
    }

    pub fn stream_url(&self) -> String {
        format!("{}/stream", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ChatError> {
        let response = self
            .client
            .post(self.completion_url())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body = response.text().await?;
        if let Some(err) = wire::parse_error(&body) {
            return Err(err.into());
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<DeltaStream, ChatError> {
        let response = self
            .client
            .post(self.stream_url())
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let bytes = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let lines = FramedRead::new(
            StreamReader::new(bytes),
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        );

        let deltas = lines.filter_map(|line| async move {
            match line {
                Ok(line) => wire::parse_stream_line(&line),
                Err(e) => Some(Err(ChatError::Network(e.to_string()))),
            }
        });
        Ok(Box::pin(deltas))
    }
}

/// 推送通道发送端：POST `{messages}` 到配置的端点，任何 2xx 即成功
pub struct HttpPushTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushTransport {
    pub fn new(profile: &TransportProfile, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(profile.allow_insecure)
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: profile.endpoint.clone(),
        })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send(&self, request: &PushRequest) -> Result<(), ChatError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(endpoint: &str) -> TransportProfile {
        TransportProfile {
            endpoint: endpoint.to_string(),
            supports_push: false,
            supports_chunking: true,
            allow_insecure: false,
        }
    }

    #[test]
    fn test_delivery_from_profile() {
        let mut p = profile("http://x");
        assert_eq!(p.delivery(), Delivery::Chunked);
        p.supports_chunking = false;
        assert_eq!(p.delivery(), Delivery::Whole);
        p.supports_push = true;
        assert_eq!(p.delivery(), Delivery::Push);
    }

    #[test]
    fn test_stream_url() {
        let t = HttpTransport::new(&profile("http://localhost:3001/api/chat/")).unwrap();
        assert_eq!(t.completion_url(), "http://localhost:3001/api/chat/");
        assert_eq!(t.stream_url(), "http://localhost:3001/api/chat/stream");

        let t = HttpTransport::new(&profile("http://localhost:7071/api/chat")).unwrap();
        assert_eq!(t.stream_url(), "http://localhost:7071/api/chat/stream");
    }
}

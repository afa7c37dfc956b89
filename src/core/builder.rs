//! 会话构建器：按配置为每个启用的通道装配传输与客户端
//!
//! TUI 与集成测试共用同一套装配逻辑；`provider = "mock"` 时全部通道走回显传输。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatch::{DispatchCoordinator, Lane, LaneClient};
use super::error::ChatError;
use crate::config::AppConfig;
use crate::conversation::{ChannelKind, ChannelSink, ConversationStore};
use crate::protocol::{
    ChatTransport, Delivery, HttpPushTransport, HttpTransport, MockPushTransport, MockTransport,
    ProtocolClient, PushClient, PushEventStream, PushTransport, TransportProfile,
};

/// 构建器：持有配置，build 时生成 [`ChatRuntime`]
pub struct ChatBuilder {
    config: AppConfig,
}

impl ChatBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn use_mock(&self) -> bool {
        self.config.app.provider.eq_ignore_ascii_case("mock")
    }

    fn profile(&self, kind: ChannelKind) -> TransportProfile {
        let mut profile = self.config.channels.get(kind).profile();
        if profile.supports_push && profile.endpoint.is_empty() {
            profile.endpoint = self.config.push.send_url.clone();
        }
        profile
    }

    /// 装配所有通道；推送通道的接收循环在此处 spawn，须在 tokio 运行时内调用
    pub fn build(self) -> Result<ChatRuntime, ChatError> {
        let kinds = self.config.channels.enabled();
        let store = ConversationStore::new(&kinds);
        let shutdown = CancellationToken::new();
        let mut receivers = Vec::new();
        let mut lanes = Vec::with_capacity(kinds.len());

        if self.use_mock() {
            tracing::warn!("Using mock transports, replies are echoed locally");
        }

        for kind in kinds {
            let profile = self.profile(kind);
            let delivery = profile.delivery();
            tracing::info!(channel = %kind, ?delivery, endpoint = %profile.endpoint, "Configuring channel");

            let client = match delivery {
                Delivery::Whole | Delivery::Chunked => {
                    let streaming = delivery == Delivery::Chunked;
                    let timeout = if streaming {
                        self.config.timeouts.stream()
                    } else {
                        self.config.timeouts.request()
                    };
                    let transport: Arc<dyn ChatTransport> = if self.use_mock() {
                        Arc::new(MockTransport::echo())
                    } else {
                        Arc::new(HttpTransport::new(&profile)?)
                    };
                    LaneClient::Http(ProtocolClient::new(transport, streaming, timeout))
                }
                Delivery::Push => {
                    let (transport, events): (Arc<dyn PushTransport>, PushEventStream) =
                        if self.use_mock() {
                            let (t, events) = MockPushTransport::echo();
                            (Arc::new(t), events)
                        } else {
                            let t = HttpPushTransport::new(&profile, self.config.timeouts.request())?;
                            (Arc::new(t), self.hub_events())
                        };
                    let client = Arc::new(PushClient::new(transport, self.config.timeouts.stream()));
                    receivers.push(spawn_receiver(
                        client.clone(),
                        events,
                        store.sink(kind),
                        shutdown.clone(),
                    ));
                    LaneClient::Push(client)
                }
            };
            lanes.push(Lane::new(kind, client));
        }

        Ok(ChatRuntime {
            coordinator: Arc::new(DispatchCoordinator::new(store, lanes)),
            receivers,
            shutdown,
        })
    }

    #[cfg(feature = "push")]
    fn hub_events(&self) -> PushEventStream {
        crate::protocol::hub::connect(
            &self.config.push.hub_url,
            Duration::from_secs(self.config.push.reconnect_delay_secs),
        )
    }

    #[cfg(not(feature = "push"))]
    fn hub_events(&self) -> PushEventStream {
        tracing::warn!("Built without the `push` feature, push replies will never arrive");
        Box::pin(futures_util::stream::pending())
    }
}

fn spawn_receiver(
    client: Arc<PushClient>,
    events: PushEventStream,
    sink: ChannelSink,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = client.run_receiver(events, &sink) => {}
            _ = shutdown.cancelled() => {
                tracing::debug!(channel = %sink.kind(), "Push receiver stopped");
            }
        }
    })
}

/// 构建结果：协调器 + 后台接收任务
pub struct ChatRuntime {
    pub coordinator: Arc<DispatchCoordinator>,
    receivers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl ChatRuntime {
    pub fn store(&self) -> &ConversationStore {
        self.coordinator.store()
    }

    /// 停止推送接收任务并等待其退出
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for handle in self.receivers.drain(..) {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}

impl Drop for ChatRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

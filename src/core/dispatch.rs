//! 分发协调器：把一次用户输入扇出到所有启用的通道
//!
//! `prepare` 同步完成本地提交（用户消息 + 「entered」日志 + 清空输入），
//! `dispatch` 再依次调用各通道客户端。两步拆开是为了让界面在任何网络请求之前就看到用户消息。
//!
//! 同一时刻只允许一轮：`prepare` 取得轮次闸门（随 [`Turn`] 一起移交给 `dispatch`，分发结束才释放），
//! 闸门被占用或推送通道仍在等 `END` 时拒绝新输入，输入缓冲保持不变。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;
use uuid::Uuid;

use crate::conversation::{ChannelKind, ConversationStore, LogRecord, Message};
use crate::protocol::{ProtocolClient, PushClient};

/// 「用户输入」日志来源
pub const INPUT_SOURCE: &str = "UserInput";

/// 某个通道背后的客户端
pub enum LaneClient {
    Http(ProtocolClient),
    Push(Arc<PushClient>),
}

/// 一个通道：客户端 + 跨轮保存的续接令牌
pub struct Lane {
    kind: ChannelKind,
    client: LaneClient,
    session_state: Mutex<Option<Value>>,
}

impl Lane {
    pub fn new(kind: ChannelKind, client: LaneClient) -> Self {
        Self {
            kind,
            client,
            session_state: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn run(&self, user: &Message, prior: &[Message], store: &ConversationStore) {
        let sink = store.sink(self.kind);
        match &self.client {
            LaneClient::Http(client) => {
                let mut state = self.session_state.lock().await;
                let next = client.send_message(user, prior, &sink, state.take()).await;
                *state = next;
            }
            LaneClient::Push(client) => client.send(user, prior, &sink).await,
        }
    }

    /// 推送通道在收到 `END` 之前都算在途
    fn is_in_flight(&self) -> bool {
        match &self.client {
            LaneClient::Http(_) => false,
            LaneClient::Push(client) => client.is_in_flight(),
        }
    }
}

/// 已在本地提交、等待发出的一轮；持有轮次闸门，丢弃即释放
#[derive(Debug)]
pub struct Turn {
    pub id: Uuid,
    pub user: Message,
    /// 各通道在追加用户消息之前的历史
    pub histories: Vec<(ChannelKind, Vec<Message>)>,
    _gate: OwnedMutexGuard<()>,
}

pub struct DispatchCoordinator {
    store: ConversationStore,
    lanes: Vec<Lane>,
    gate: Arc<Mutex<()>>,
}

impl DispatchCoordinator {
    pub fn new(store: ConversationStore, lanes: Vec<Lane>) -> Self {
        Self {
            store,
            lanes,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn lanes(&self) -> impl Iterator<Item = ChannelKind> + '_ {
        self.lanes.iter().map(Lane::kind)
    }

    /// 上一轮尚未结束（正在分发，或推送回复未收到 `END`）
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err() || self.lanes.iter().any(Lane::is_in_flight)
    }

    /// 本地提交一轮；空白输入或上一轮未结束时返回 None，且不改动任何状态
    pub fn prepare(&self, input: &mut String) -> Option<Turn> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }
        let Ok(gate) = Arc::clone(&self.gate).try_lock_owned() else {
            tracing::debug!("Previous turn still dispatching, input kept");
            return None;
        };
        if self.lanes.iter().any(Lane::is_in_flight) {
            tracing::debug!("Push reply still in flight, input kept");
            return None;
        }
        let user = Message::user(text);

        let histories: Vec<_> = self
            .lanes
            .iter()
            .map(|lane| (lane.kind, self.store.messages(lane.kind)))
            .collect();

        for (kind, _) in &histories {
            self.store.append(*kind, user.clone());
            self.store
                .append_log(*kind, LogRecord::info(INPUT_SOURCE, "User message entered"));
        }
        input.clear();

        let id = Uuid::new_v4();
        tracing::info!(turn_id = %id, channels = histories.len(), "User message entered");
        Some(Turn {
            id,
            user,
            histories,
            _gate: gate,
        })
    }

    /// 依次调用各通道；闸门随 `turn` 在分发结束时释放
    pub async fn dispatch(&self, turn: Turn) {
        let span = tracing::info_span!("turn", turn_id = %turn.id);
        async {
            for (kind, prior) in &turn.histories {
                let Some(lane) = self.lanes.iter().find(|l| l.kind == *kind) else {
                    continue;
                };
                let channel_span = tracing::debug_span!("channel", channel = %kind);
                lane.run(&turn.user, prior, &self.store)
                    .instrument(channel_span)
                    .await;
            }
            tracing::debug!("Turn dispatched to all channels");
        }
        .instrument(span)
        .await
    }

    /// prepare + dispatch
    pub async fn submit(&self, input: &mut String) {
        if let Some(turn) = self.prepare(input) {
            self.dispatch(turn).await;
        }
    }
}

//! 协议层：线上格式、传输抽象与实现（HTTP / 推送 / Mock）、协议客户端

pub mod client;
#[cfg(feature = "push")]
pub mod hub;
pub mod mock;
pub mod push;
pub mod transport;
pub mod wire;

pub use client::ProtocolClient;
pub use mock::{MockPushTransport, MockTransport};
pub use push::{PushClient, DEFAULT_PUSH_ENDPOINT};
pub use transport::{
    ChatTransport, Delivery, DeltaStream, HttpPushTransport, HttpTransport, PushEventStream,
    PushTransport, TransportProfile,
};
pub use wire::{ChatCompletion, ChatRequest, CompletionDelta, PushEvent, PushRequest, WireMessage};

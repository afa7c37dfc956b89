//! tri-chat - 三通道对话客户端
//!
//! 同一句输入同时发往三种投递方式（整段 / 分块 / 推送），各自维护会话与诊断日志，并排渲染。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 消息模型、诊断日志、变更规则（Reconciler）与多通道存储
//! - **protocol**: 线上格式、传输（HTTP / 推送 / Mock）与协议客户端
//! - **core**: 错误类型、分发协调器、构建器
//! - **observability**: tracing 订阅器
//! - **ui**: Ratatui TUI 界面

pub mod config;
pub mod conversation;
pub mod core;
pub mod observability;
pub mod protocol;
pub mod ui;

//! tri-chat - 三通道对话客户端
//!
//! 入口：加载配置、初始化日志、装配各通道，并运行 TUI 主循环。

use anyhow::Context;
use tri_chat::{config::load_config, core::ChatBuilder, observability, ui::run_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let (config, load_error) = match load_config(config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (Default::default(), Some(e)),
    };

    observability::init(config.app.log_file.as_deref()).context("Failed to open log file")?;
    if let Some(e) = load_error {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }

    let runtime = ChatBuilder::new(config)
        .build()
        .context("Failed to configure channels")?;

    let result = run_app(runtime.coordinator.clone())
        .await
        .context("App run failed");
    runtime.shutdown().await;
    result
}

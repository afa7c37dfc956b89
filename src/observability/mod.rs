//! 可观测性：tracing 订阅器
//!
//! 终端被 TUI 占用，日志要么写入文件，要么丢弃。默认 info，可通过 RUST_LOG 覆盖。

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局订阅器；`log_file` 为 None 时不输出任何日志
pub fn init(log_file: Option<&Path>) -> std::io::Result<()> {
    match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(std::io::sink))
                .init();
        }
    }
    Ok(())
}

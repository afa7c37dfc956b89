//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRICHAT__*` 覆盖（双下划线表示嵌套，
//! 如 `TRICHAT__CHANNELS__STREAMING_FUNCTION__ENDPOINT=http://host/api/chat/signalr`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::conversation::ChannelKind;
use crate::protocol::{TransportProfile, DEFAULT_PUSH_ENDPOINT};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub timeouts: TimeoutsSection,
    pub channels: ChannelsSection,
    pub push: PushSection,
}

/// [app] 段：传输后端与日志文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 传输后端：http / mock；mock 时所有通道回显，无需后端
    pub provider: String,
    /// tracing 输出文件；未设置时丢弃（终端被 TUI 占用）
    pub log_file: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            provider: default_provider(),
            log_file: None,
        }
    }
}

fn default_provider() -> String {
    "http".to_string()
}

/// [timeouts] 段（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    /// 整段请求
    pub request: u64,
    /// 流式 / 推送一轮
    pub stream: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

impl TimeoutsSection {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request)
    }

    pub fn stream(&self) -> Duration {
        Duration::from_secs(self.stream)
    }
}

/// [channels.*] 单个通道：是否启用 + 传输能力描述
#[derive(Debug, Clone)]
pub struct ChannelSection {
    pub enabled: bool,
    pub endpoint: String,
    pub supports_chunking: bool,
    pub supports_push: bool,
    pub allow_insecure: bool,
}

/// 文件 / 环境变量里出现的键；未出现的键沿用该通道自己的默认值
#[derive(Debug, Clone, Default, Deserialize)]
struct ChannelOverrides {
    enabled: Option<bool>,
    endpoint: Option<String>,
    supports_chunking: Option<bool>,
    supports_push: Option<bool>,
    allow_insecure: Option<bool>,
}

impl ChannelOverrides {
    fn apply(self, base: ChannelSection) -> ChannelSection {
        let supports_push = self.supports_push.unwrap_or(base.supports_push);
        // 切到推送却没给 endpoint：留空，由 [push].send_url 补上
        let endpoint = match self.endpoint {
            Some(endpoint) => endpoint,
            None if supports_push && !base.supports_push => String::new(),
            None => base.endpoint,
        };
        ChannelSection {
            enabled: self.enabled.unwrap_or(base.enabled),
            endpoint,
            supports_chunking: self.supports_chunking.unwrap_or(base.supports_chunking),
            supports_push,
            allow_insecure: self.allow_insecure.unwrap_or(base.allow_insecure),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawChannels {
    non_streaming: ChannelOverrides,
    streaming: ChannelOverrides,
    streaming_function: ChannelOverrides,
}

impl From<RawChannels> for ChannelsSection {
    fn from(raw: RawChannels) -> Self {
        let defaults = ChannelsSection::default();
        Self {
            non_streaming: raw.non_streaming.apply(defaults.non_streaming),
            streaming: raw.streaming.apply(defaults.streaming),
            streaming_function: raw.streaming_function.apply(defaults.streaming_function),
        }
    }
}

impl ChannelSection {
    pub fn profile(&self) -> TransportProfile {
        TransportProfile {
            endpoint: self.endpoint.clone(),
            supports_push: self.supports_push,
            supports_chunking: self.supports_chunking,
            allow_insecure: self.allow_insecure,
        }
    }
}

/// [channels] 段：三个通道，部分配置时按通道补齐默认值
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawChannels")]
pub struct ChannelsSection {
    pub non_streaming: ChannelSection,
    pub streaming: ChannelSection,
    pub streaming_function: ChannelSection,
}

impl Default for ChannelsSection {
    fn default() -> Self {
        Self {
            non_streaming: ChannelSection {
                enabled: true,
                endpoint: "http://localhost:3001/api/chat/".to_string(),
                supports_chunking: false,
                supports_push: false,
                allow_insecure: false,
            },
            streaming: ChannelSection {
                enabled: true,
                endpoint: "http://localhost:3001/api/chat/".to_string(),
                supports_chunking: true,
                supports_push: false,
                allow_insecure: false,
            },
            streaming_function: ChannelSection {
                enabled: true,
                endpoint: "http://localhost:7071/api/chat/".to_string(),
                supports_chunking: true,
                supports_push: false,
                allow_insecure: true,
            },
        }
    }
}

impl ChannelsSection {
    pub fn get(&self, kind: ChannelKind) -> &ChannelSection {
        match kind {
            ChannelKind::NonStreaming => &self.non_streaming,
            ChannelKind::Streaming => &self.streaming,
            ChannelKind::StreamingFunction => &self.streaming_function,
        }
    }

    /// 启用的通道（按固定顺序）
    pub fn enabled(&self) -> Vec<ChannelKind> {
        ChannelKind::ALL
            .into_iter()
            .filter(|k| self.get(*k).enabled)
            .collect()
    }
}

/// [push] 段：推送连接
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushSection {
    /// SignalR hub 的 WebSocket 地址
    pub hub_url: String,
    /// 推送通道 endpoint 未配置时使用的发送地址
    pub send_url: String,
    /// 断线重连间隔（秒）
    pub reconnect_delay_secs: u64,
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:7071/api/hub".to_string(),
            send_url: DEFAULT_PUSH_ENDPOINT.to_string(),
            reconnect_delay_secs: 5,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TRICHAT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRICHAT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRICHAT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

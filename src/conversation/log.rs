//! 诊断日志条目（每个通道一份，只追加）

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 单条日志：ISO-8601 时间戳、级别、来源、内容
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, source: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            source: source.to_string(),
            message: message.into(),
        }
    }

    pub fn info(source: &str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, source, message)
    }

    pub fn error(source: &str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, source, message)
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_rfc3339() {
        let record = LogRecord::info("UserInput", "User message entered");
        assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
        assert!(record.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_error_record() {
        let record = LogRecord::error("AIChatProtocol", "rate limited");
        assert!(record.is_error());
        assert_eq!(record.level.to_string(), "error");
    }
}

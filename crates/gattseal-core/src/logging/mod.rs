//! 日志模块
//!
//! 核心库只通过 `log` 门面输出，不安装任何 logger。
//! 安全相关事件统一由 `SecurityEvent` 描述，密钥材料与明文永远不会出现在日志中。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ble::link::ConnectionState;
use crate::error::FormatError;

/// 日志级别
///
/// 实现了 `PartialOrd` 以便过滤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// 获取显示名称
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    pub fn to_level_filter(self) -> log::LevelFilter {
        log::Level::from(self).to_level_filter()
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            _ => Err(FormatError::OutOfRange("log level")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 安全层事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    KeyAgreementStarted,
    SessionEstablished { direction: u8 },
    KeyAgreementFailed,
    AuthenticationFailed,
    ReplayRejected { counter: u64 },
    ReflectedMessage,
    NonceExhausted,
    SessionClosed,
    TransportState(ConnectionState),
    FrameRejected { len: usize },
}

impl SecurityEvent {
    pub fn level(&self) -> LogLevel {
        match self {
            SecurityEvent::KeyAgreementStarted | SecurityEvent::TransportState(_) => LogLevel::Debug,
            SecurityEvent::SessionEstablished { .. } | SecurityEvent::SessionClosed => LogLevel::Info,
            SecurityEvent::AuthenticationFailed
            | SecurityEvent::ReplayRejected { .. }
            | SecurityEvent::ReflectedMessage
            | SecurityEvent::KeyAgreementFailed
            | SecurityEvent::FrameRejected { .. } => LogLevel::Warn,
            SecurityEvent::NonceExhausted => LogLevel::Error,
        }
    }

    pub fn emit(&self) {
        log::log!(target: "gattseal::security", log::Level::from(self.level()), "{self}");
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityEvent::KeyAgreementStarted => write!(f, "key agreement started"),
            SecurityEvent::SessionEstablished { direction } => {
                write!(f, "session established (direction {direction})")
            }
            SecurityEvent::KeyAgreementFailed => write!(f, "key agreement failed"),
            SecurityEvent::AuthenticationFailed => write!(f, "incoming message failed authentication"),
            SecurityEvent::ReplayRejected { counter } => {
                write!(f, "rejected replayed message counter {counter}")
            }
            SecurityEvent::ReflectedMessage => write!(f, "rejected message carrying our own direction"),
            SecurityEvent::NonceExhausted => write!(f, "nonce counter exhausted"),
            SecurityEvent::SessionClosed => write!(f, "session closed"),
            SecurityEvent::TransportState(state) => write!(f, "transport state: {state:?}"),
            SecurityEvent::FrameRejected { len } => write!(f, "rejected frame of {len} bytes"),
        }
    }
}

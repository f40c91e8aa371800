//! 安全链路配置和持久化
//!
//! 文本形式的设置存储在 `<config_dir>/gattseal/security.toml`，
//! 使用前经 `validate()` 转换为强类型的 `LinkConfig`。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::ble::gatt::{self, parse_uuid};
use crate::crypto::ccm::TagLength;
use crate::crypto::seq_window::MAX_WINDOW_SIZE;
use crate::error::{Error, FormatError};
use crate::logging::LogLevel;

/// 247 字节 ATT MTU 减去 3 字节 ATT 头
pub const DEFAULT_MAX_FRAME_LEN: usize = 244;

/// 安全设置（文本形式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// 认证标签长度（字节）
    pub tag_len: usize,
    /// 防重放窗口大小
    pub replay_window: u64,
    /// 单帧最大长度
    pub max_frame_len: usize,
    pub service_uuid: String,
    /// 通知特征（对端 → 本端）
    pub notify_char_uuid: String,
    /// 写特征（本端 → 对端）
    pub write_char_uuid: String,
    /// 宿主程序安装 logger 时使用的最大级别，见 `max_log_level`
    ///
    /// 核心库本身只通过 `log` 门面输出，不读取该字段。
    pub log_level: LogLevel,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            tag_len: TagLength::default().get(),
            replay_window: 64,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            service_uuid: gatt::SERVICE_UUID.to_string(),
            notify_char_uuid: gatt::NOTIFY_CHAR_UUID.to_string(),
            write_char_uuid: gatt::WRITE_CHAR_UUID.to_string(),
            log_level: LogLevel::default(),
        }
    }
}

/// 校验后的链路配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub tag_len: TagLength,
    pub replay_window: u64,
    pub max_frame_len: usize,
    pub service_uuid: Uuid,
    pub notify_char_uuid: Uuid,
    pub write_char_uuid: Uuid,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            tag_len: TagLength::default(),
            replay_window: 64,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            service_uuid: gatt::SERVICE_UUID,
            notify_char_uuid: gatt::NOTIFY_CHAR_UUID,
            write_char_uuid: gatt::WRITE_CHAR_UUID,
        }
    }
}

impl SecuritySettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gattseal")
            .join("security.toml")
    }

    /// 加载设置（如果文件不存在或无法解析则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded security settings from {}", path.display());
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse security settings: {e}, using defaults");
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read security settings file: {e}, using defaults");
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved security settings to {}", path.display());
        Ok(())
    }

    /// 转换为强类型配置，任何非法字段都返回错误
    pub fn validate(&self) -> Result<LinkConfig, Error> {
        let tag_len = TagLength::new(self.tag_len)?;
        if !(1..=MAX_WINDOW_SIZE).contains(&self.replay_window) {
            return Err(FormatError::OutOfRange("replay_window must be within 1..=128").into());
        }
        if self.max_frame_len < gatt::HANDSHAKE_FRAME_LEN {
            return Err(FormatError::OutOfRange("max_frame_len too small for a handshake frame").into());
        }
        Ok(LinkConfig {
            tag_len,
            replay_window: self.replay_window,
            max_frame_len: self.max_frame_len,
            service_uuid: parse_uuid(&self.service_uuid)?,
            notify_char_uuid: parse_uuid(&self.notify_char_uuid)?,
            write_char_uuid: parse_uuid(&self.write_char_uuid)?,
        })
    }

    /// 宿主程序的 logger 过滤级别，例如 `log::set_max_level(settings.max_log_level())`
    pub fn max_log_level(&self) -> log::LevelFilter {
        self.log_level.to_level_filter()
    }
}

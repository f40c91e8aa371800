//! 错误类型
//!
//! 核心库使用 `thiserror` 定义的强类型错误；外层（配置读写、传输适配）使用 `anyhow`。

use thiserror::Error;

/// 定长格式输入解析失败（十六进制常量、UUID、SEC1 点编码、线路帧）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid hex string: {0}")]
    Hex(String),

    #[error("invalid UUID `{input}`: {reason}")]
    Uuid { input: String, reason: String },

    #[error("unsupported point encoding tag 0x{0:02x}")]
    PointTag(u8),

    #[error("value out of range: {0}")]
    OutOfRange(&'static str),

    #[error("unknown frame type 0x{0:02x}")]
    FrameType(u8),

    #[error("empty frame")]
    EmptyFrame,

    #[error("invalid base64: {0}")]
    Base64(String),
}

/// Montgomery 参数建立失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ModulusError {
    #[error("Montgomery modulus must be odd")]
    Even,

    #[error("Montgomery modulus must be greater than one")]
    TooSmall,
}

/// 密钥协商流程错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyAgreementError {
    #[error("key agreement has not been started")]
    NotStarted,

    #[error("no session key established")]
    NoSession,

    #[error("peer public point is the point at infinity")]
    PointAtInfinity,

    #[error("peer public point is not on the curve")]
    NotOnCurve,

    #[error("peer echoed our own public point")]
    ReflectedPublicKey,

    #[error("shared secret is the point at infinity")]
    DegenerateSharedSecret,

    #[error("session key derivation failed")]
    Kdf,
}

/// CCM 模式错误
///
/// `Authentication` 的文案固定，不携带任何失败原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CcmError {
    #[error("unsupported tag length {0} (expected 4, 6, 8, 10, 12, 14 or 16)")]
    InvalidTagLength(usize),

    #[error("unsupported nonce length {0} (expected 7..=13)")]
    InvalidNonceLength(usize),

    #[error("message of {len} bytes exceeds the {max} byte limit for this nonce length")]
    MessageTooLong { len: usize, max: u64 },

    #[error("authentication failed")]
    Authentication,
}

/// 核心库统一错误
#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("modulus error: {0}")]
    Modulus(#[from] ModulusError),

    #[error("key agreement error: {0}")]
    KeyAgreement(#[from] KeyAgreementError),

    #[error("{0}")]
    Ccm(#[from] CcmError),

    #[error("nonce counter exhausted, a new key agreement is required")]
    NonceExhausted,

    #[error("replayed or stale message counter {0}")]
    Replay(u64),

    #[error("message carries our own direction flag")]
    Reflected,

    #[error("frame of {len} bytes exceeds the {max} byte transport limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// 是否为认证失败（标签不匹配）
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Error::Ccm(CcmError::Authentication))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! GATT 标识符与帧格式
//!
//! 安全层只使用一对特征：对端通过 notify 特征推送帧，本端写入 write 特征。
//! 每次写入/通知承载一个完整帧，不做分片：
//!
//! - `0x01 || SEC1 公钥`：发起握手
//! - `0x02 || nonce || ciphertext || tag`：数据帧
//! - `0x03 || SEC1 公钥`：握手应答，收到后不再回送

use uuid::Uuid;

use crate::crypto::ble_security::NONCE_LEN;
use crate::crypto::ccm::TagLength;
use crate::crypto::point::SEC1_UNCOMPRESSED_LEN;
use crate::error::FormatError;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef1);
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef2);

pub const FRAME_HANDSHAKE: u8 = 0x01;
pub const FRAME_DATA: u8 = 0x02;
pub const FRAME_HANDSHAKE_REPLY: u8 = 0x03;

/// 握手帧（发起或应答）长度：类型字节 + SEC1 未压缩公钥
pub const HANDSHAKE_FRAME_LEN: usize = 1 + SEC1_UNCOMPRESSED_LEN;

const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// 解析 36 字符带连字符的 UUID 文本
///
/// 其它形式（无连字符、带花括号、urn 前缀）一律拒绝。
pub fn parse_uuid(input: &str) -> Result<Uuid, FormatError> {
    let invalid = |reason: &str| FormatError::Uuid {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if input.len() != 36 {
        return Err(invalid("expected 36 characters"));
    }
    for (i, c) in input.char_indices() {
        let hyphen_expected = HYPHEN_POSITIONS.contains(&i);
        if hyphen_expected && c != '-' {
            return Err(invalid("misplaced hyphen"));
        }
        if !hyphen_expected && !c.is_ascii_hexdigit() {
            return Err(invalid("non-hex character"));
        }
    }
    Uuid::try_parse(input).map_err(|e| invalid(&e.to_string()))
}

/// 一帧数据帧的固定开销
pub fn frame_overhead(tag_len: TagLength) -> usize {
    1 + NONCE_LEN + tag_len.get()
}

/// 在不超过 `max_frame_len` 的前提下单帧可携带的最大明文长度
pub fn max_plaintext_len(max_frame_len: usize, tag_len: TagLength) -> usize {
    max_frame_len.saturating_sub(frame_overhead(tag_len))
}

/// 线路帧（借用接收缓冲区）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// SEC1 编码的公钥（可能是单字节的无穷远点，由安全层拒绝）
    Handshake(&'a [u8]),
    /// 密封后的消息
    Data(&'a [u8]),
    /// 对 `Handshake` 的应答，携带应答方的 SEC1 公钥
    HandshakeReply(&'a [u8]),
}

impl<'a> Frame<'a> {
    pub fn decode(bytes: &'a [u8]) -> Result<Self, FormatError> {
        let (&kind, body) = bytes.split_first().ok_or(FormatError::EmptyFrame)?;
        match kind {
            FRAME_HANDSHAKE => Ok(Frame::Handshake(body)),
            FRAME_DATA => Ok(Frame::Data(body)),
            FRAME_HANDSHAKE_REPLY => Ok(Frame::HandshakeReply(body)),
            other => Err(FormatError::FrameType(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (kind, body) = match self {
            Frame::Handshake(body) => (FRAME_HANDSHAKE, body),
            Frame::Data(body) => (FRAME_DATA, body),
            Frame::HandshakeReply(body) => (FRAME_HANDSHAKE_REPLY, body),
        };
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(kind);
        out.extend_from_slice(body);
        out
    }
}

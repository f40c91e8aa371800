//! AES-128-CCM 认证加密（RFC 3610 / NIST SP 800-38C）
//!
//! - 认证：B0 || 编码后的关联数据 || 明文，以 CBC-MAC 串联，截断为标签长度
//! - 加密：计数器块 A_i = flags || nonce || i，i 从 1 开始生成密钥流
//! - 标签用 S_0 = E(A_0) 掩蔽
//!
//! `Aes128Ccm` 本身不保存状态，同一密钥下复用 nonce 会得到相同的密钥流
//! （C1 ⊕ C2 = P1 ⊕ P2）。nonce 唯一性由调用方保证，会话层使用原子计数器。

#![allow(clippy::cast_possible_truncation)]

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::aes::{Aes128, BLOCK_SIZE, Block, KEY_SIZE};
use crate::error::{CcmError, FormatError};

pub const MIN_NONCE_LEN: usize = 7;
pub const MAX_NONCE_LEN: usize = 13;

/// 关联数据长度小于该值时使用 2 字节长度编码
const SHORT_AAD_LIMIT: usize = 0xFF00;

/// 认证标签长度（字节）：4..=16 之间的偶数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagLength(usize);

impl TagLength {
    pub const SUPPORTED: [usize; 7] = [4, 6, 8, 10, 12, 14, 16];

    pub fn new(len: usize) -> Result<Self, CcmError> {
        if Self::SUPPORTED.contains(&len) {
            Ok(Self(len))
        } else {
            Err(CcmError::InvalidTagLength(len))
        }
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for TagLength {
    fn default() -> Self {
        Self(8)
    }
}

impl TryFrom<usize> for TagLength {
    type Error = CcmError;

    fn try_from(len: usize) -> Result<Self, Self::Error> {
        Self::new(len)
    }
}

/// 一条密封后的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeadMessage {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

impl AeadMessage {
    /// 线路格式：nonce || ciphertext || tag
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.nonce.len() + self.ciphertext.len() + self.tag.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    pub fn from_wire(bytes: &[u8], nonce_len: usize, tag_len: TagLength) -> Result<Self, FormatError> {
        let overhead = nonce_len + tag_len.get();
        if bytes.len() < overhead {
            return Err(FormatError::Length {
                expected: overhead,
                actual: bytes.len(),
            });
        }
        let (nonce, rest) = bytes.split_at(nonce_len);
        let (ciphertext, tag) = rest.split_at(rest.len() - tag_len.get());
        Ok(Self {
            nonce: nonce.to_vec(),
            ciphertext: ciphertext.to_vec(),
            tag: tag.to_vec(),
        })
    }
}

pub struct Aes128Ccm {
    cipher: Aes128,
    tag_len: TagLength,
}

impl Aes128Ccm {
    pub fn new(key: &[u8; KEY_SIZE], tag_len: TagLength) -> Self {
        Self {
            cipher: Aes128::new(key),
            tag_len,
        }
    }

    pub fn tag_len(&self) -> TagLength {
        self.tag_len
    }

    pub fn seal(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<AeadMessage, CcmError> {
        let length_field = check_lengths(nonce, plaintext.len())?;

        let mac = self.cbc_mac(nonce, length_field, aad, plaintext);
        let mut ciphertext = plaintext.to_vec();
        self.apply_keystream(nonce, length_field, &mut ciphertext);
        let tag = self.mask_tag(nonce, length_field, &mac);

        Ok(AeadMessage {
            nonce: nonce.to_vec(),
            ciphertext,
            tag,
        })
    }

    /// 标签校验通过前不返回任何明文字节
    pub fn open(
        &self,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, CcmError> {
        let length_field = check_lengths(nonce, ciphertext.len())?;
        if tag.len() != self.tag_len.get() {
            return Err(CcmError::Authentication);
        }

        let mut plaintext = ciphertext.to_vec();
        self.apply_keystream(nonce, length_field, &mut plaintext);
        let mac = self.cbc_mac(nonce, length_field, aad, &plaintext);
        let mut expected = self.mask_tag(nonce, length_field, &mac);

        let matches: bool = expected.as_slice().ct_eq(tag).into();
        expected.zeroize();
        if matches {
            Ok(plaintext)
        } else {
            plaintext.zeroize();
            Err(CcmError::Authentication)
        }
    }

    pub fn open_message(&self, aad: &[u8], message: &AeadMessage) -> Result<Vec<u8>, CcmError> {
        self.open(&message.nonce, aad, &message.ciphertext, &message.tag)
    }

    fn cbc_mac(&self, nonce: &[u8], length_field: usize, aad: &[u8], plaintext: &[u8]) -> Block {
        let mut flags = encode_length_field(length_field);
        flags |= u8::try_from((self.tag_len.get() - 2) / 2).unwrap_or(0) << 3;
        if !aad.is_empty() {
            flags |= 0x40;
        }

        let mut x = [0u8; BLOCK_SIZE];
        x[0] = flags;
        x[1..=nonce.len()].copy_from_slice(nonce);
        write_counter(&mut x, length_field, plaintext.len() as u64);
        self.cipher.encrypt_block(&mut x);

        if !aad.is_empty() {
            let mut encoded = encode_aad_length(aad.len());
            encoded.extend_from_slice(aad);
            self.mac_update(&mut x, &encoded);
        }
        self.mac_update(&mut x, plaintext);
        x
    }

    /// 按块串联，最后一块补零
    fn mac_update(&self, x: &mut Block, data: &[u8]) {
        for chunk in data.chunks(BLOCK_SIZE) {
            for (xi, di) in x.iter_mut().zip(chunk) {
                *xi ^= di;
            }
            self.cipher.encrypt_block(x);
        }
    }

    fn counter_block(nonce: &[u8], length_field: usize, counter: u64) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = encode_length_field(length_field);
        block[1..=nonce.len()].copy_from_slice(nonce);
        write_counter(&mut block, length_field, counter);
        block
    }

    fn apply_keystream(&self, nonce: &[u8], length_field: usize, data: &mut [u8]) {
        for (i, chunk) in data.chunks_mut(BLOCK_SIZE).enumerate() {
            let mut keystream = Self::counter_block(nonce, length_field, i as u64 + 1);
            self.cipher.encrypt_block(&mut keystream);
            for (d, k) in chunk.iter_mut().zip(keystream.iter()) {
                *d ^= k;
            }
            keystream.zeroize();
        }
    }

    fn mask_tag(&self, nonce: &[u8], length_field: usize, mac: &Block) -> Vec<u8> {
        let mut s0 = Self::counter_block(nonce, length_field, 0);
        self.cipher.encrypt_block(&mut s0);
        let tag = mac
            .iter()
            .zip(s0.iter())
            .take(self.tag_len.get())
            .map(|(m, s)| m ^ s)
            .collect();
        s0.zeroize();
        tag
    }
}

/// 校验 nonce 与消息长度，返回长度字段宽度 L = 15 - nonce_len
fn check_lengths(nonce: &[u8], message_len: usize) -> Result<usize, CcmError> {
    if !(MIN_NONCE_LEN..=MAX_NONCE_LEN).contains(&nonce.len()) {
        return Err(CcmError::InvalidNonceLength(nonce.len()));
    }
    let length_field = 15 - nonce.len();
    let max = if length_field >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * length_field)) - 1
    };
    if message_len as u64 > max {
        return Err(CcmError::MessageTooLong {
            len: message_len,
            max,
        });
    }
    Ok(length_field)
}

/// flags 低 3 位为 L - 1
fn encode_length_field(length_field: usize) -> u8 {
    u8::try_from(length_field - 1).unwrap_or(0) & 0x07
}

/// 把 value 以大端写入块的最后 L 字节
fn write_counter(block: &mut Block, length_field: usize, value: u64) {
    let bytes = value.to_be_bytes();
    block[BLOCK_SIZE - length_field..].copy_from_slice(&bytes[8 - length_field..]);
}

fn encode_aad_length(len: usize) -> Vec<u8> {
    if len < SHORT_AAD_LIMIT {
        (len as u16).to_be_bytes().to_vec()
    } else if let Ok(len32) = u32::try_from(len) {
        let mut out = vec![0xFF, 0xFE];
        out.extend_from_slice(&len32.to_be_bytes());
        out
    } else {
        let mut out = vec![0xFF, 0xFF];
        out.extend_from_slice(&(len as u64).to_be_bytes());
        out
    }
}

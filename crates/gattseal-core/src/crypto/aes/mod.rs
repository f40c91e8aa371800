//! AES-128 分组密码
//!
//! 状态为 16 字节缓冲区，按列优先排列（state[r][c] = buf[r + 4c]），
//! 以可变引用依次经过各轮变换。`Aes128` 持有扩展后的 11 轮轮密钥以及 S 盒，
//! 不存在进程级的全局表。

pub mod gf;
pub mod sbox;

use zeroize::{Zeroize, ZeroizeOnDrop};

use self::gf::{gf_mul, xtime};
use self::sbox::SBoxes;
use crate::error::FormatError;

pub const BLOCK_SIZE: usize = 16;
pub const KEY_SIZE: usize = 16;

/// 10 轮（128 位密钥）
const ROUNDS: usize = 10;
const KEY_WORDS: usize = 4;
const SCHEDULE_WORDS: usize = 4 * (ROUNDS + 1);

const RCON: [u8; ROUNDS] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x1B, 0x36];

pub type Block = [u8; BLOCK_SIZE];

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Aes128 {
    round_keys: [Block; ROUNDS + 1],
    sboxes: SBoxes,
}

impl Aes128 {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        let sboxes = SBoxes::generate();
        let round_keys = expand_key(key, &sboxes);
        Self { round_keys, sboxes }
    }

    pub fn from_slice(key: &[u8]) -> Result<Self, FormatError> {
        let key: &[u8; KEY_SIZE] = key.try_into().map_err(|_| FormatError::Length {
            expected: KEY_SIZE,
            actual: key.len(),
        })?;
        Ok(Self::new(key))
    }

    pub fn encrypt_block(&self, state: &mut Block) {
        add_round_key(state, &self.round_keys[0]);
        for round in 1..ROUNDS {
            self.sub_bytes(state);
            shift_rows(state);
            mix_columns(state);
            add_round_key(state, &self.round_keys[round]);
        }
        self.sub_bytes(state);
        shift_rows(state);
        add_round_key(state, &self.round_keys[ROUNDS]);
    }

    pub fn decrypt_block(&self, state: &mut Block) {
        add_round_key(state, &self.round_keys[ROUNDS]);
        for round in (1..ROUNDS).rev() {
            inv_shift_rows(state);
            self.inv_sub_bytes(state);
            add_round_key(state, &self.round_keys[round]);
            inv_mix_columns(state);
        }
        inv_shift_rows(state);
        self.inv_sub_bytes(state);
        add_round_key(state, &self.round_keys[0]);
    }

    fn sub_bytes(&self, state: &mut Block) {
        for b in state.iter_mut() {
            *b = self.sboxes.sub(*b);
        }
    }

    fn inv_sub_bytes(&self, state: &mut Block) {
        for b in state.iter_mut() {
            *b = self.sboxes.inv_sub(*b);
        }
    }
}

fn sub_word(word: u32, sboxes: &SBoxes) -> u32 {
    u32::from_be_bytes(word.to_be_bytes().map(|b| sboxes.sub(b)))
}

fn rot_word(word: u32) -> u32 {
    word.rotate_left(8)
}

/// 128 位密钥扩展为 44 个字，每 4 个字组成一轮轮密钥
fn expand_key(key: &[u8; KEY_SIZE], sboxes: &SBoxes) -> [Block; ROUNDS + 1] {
    let mut words = [0u32; SCHEDULE_WORDS];
    for (i, chunk) in key.chunks_exact(4).enumerate() {
        words[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    for i in KEY_WORDS..SCHEDULE_WORDS {
        let mut temp = words[i - 1];
        if i % KEY_WORDS == 0 {
            temp = sub_word(rot_word(temp), sboxes) ^ (u32::from(RCON[i / KEY_WORDS - 1]) << 24);
        }
        words[i] = words[i - KEY_WORDS] ^ temp;
    }

    let mut round_keys = [[0u8; BLOCK_SIZE]; ROUNDS + 1];
    for (round, rk) in round_keys.iter_mut().enumerate() {
        for col in 0..4 {
            rk[4 * col..4 * col + 4].copy_from_slice(&words[4 * round + col].to_be_bytes());
        }
    }
    words.zeroize();
    round_keys
}

fn add_round_key(state: &mut Block, round_key: &Block) {
    for (s, k) in state.iter_mut().zip(round_key.iter()) {
        *s ^= k;
    }
}

/// 第 r 行循环左移 r 位
fn shift_rows(state: &mut Block) {
    let old = *state;
    for r in 1..4 {
        for c in 0..4 {
            state[r + 4 * c] = old[r + 4 * ((c + r) % 4)];
        }
    }
}

fn inv_shift_rows(state: &mut Block) {
    let old = *state;
    for r in 1..4 {
        for c in 0..4 {
            state[r + 4 * c] = old[r + 4 * ((c + 4 - r) % 4)];
        }
    }
}

/// 每列乘以 MDS 矩阵 [02 03 01 01]
fn mix_columns(state: &mut Block) {
    for column in state.chunks_exact_mut(4) {
        let [s0, s1, s2, s3] = [column[0], column[1], column[2], column[3]];
        column[0] = xtime(s0) ^ (xtime(s1) ^ s1) ^ s2 ^ s3;
        column[1] = s0 ^ xtime(s1) ^ (xtime(s2) ^ s2) ^ s3;
        column[2] = s0 ^ s1 ^ xtime(s2) ^ (xtime(s3) ^ s3);
        column[3] = (xtime(s0) ^ s0) ^ s1 ^ s2 ^ xtime(s3);
    }
}

/// 每列乘以逆矩阵 [0e 0b 0d 09]
fn inv_mix_columns(state: &mut Block) {
    for column in state.chunks_exact_mut(4) {
        let [s0, s1, s2, s3] = [column[0], column[1], column[2], column[3]];
        column[0] = gf_mul(0x0e, s0) ^ gf_mul(0x0b, s1) ^ gf_mul(0x0d, s2) ^ gf_mul(0x09, s3);
        column[1] = gf_mul(0x09, s0) ^ gf_mul(0x0e, s1) ^ gf_mul(0x0b, s2) ^ gf_mul(0x0d, s3);
        column[2] = gf_mul(0x0d, s0) ^ gf_mul(0x09, s1) ^ gf_mul(0x0e, s2) ^ gf_mul(0x0b, s3);
        column[3] = gf_mul(0x0b, s0) ^ gf_mul(0x0d, s1) ^ gf_mul(0x09, s2) ^ gf_mul(0x0e, s3);
    }
}

//! 定宽无符号大整数
//!
//! `FixedUint<L>` 由 L 个 64 位 limb 组成（低位在前），宽度在编译期固定。
//!
//! - 溢出按 2^(64L) 回绕，不视为错误；需要检测时读取返回的 carry/borrow
//! - 模运算要求操作数已经小于模数，由调用方保证
//! - 比较与选择返回/接收全 1 或全 0 的掩码，不在秘密数据上分支
//!
//! 只有带 `_vartime` 后缀的方法允许依赖数据的执行路径，仅用于公开数据。

#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;
use std::fmt;

use zeroize::Zeroize;

use crate::error::FormatError;

/// 256 位整数（4 个 limb），椭圆曲线与标量使用的宽度
pub type U256 = FixedUint<4>;

/// 把 0/1 扩展为全 0/全 1 掩码
#[inline]
pub(crate) fn mask_from_bit(bit: u64) -> u64 {
    0u64.wrapping_sub(bit & 1)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedUint<const L: usize> {
    limbs: [u64; L],
}

impl<const L: usize> Zeroize for FixedUint<L> {
    fn zeroize(&mut self) {
        self.limbs.zeroize();
    }
}

impl<const L: usize> Default for FixedUint<L> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<const L: usize> From<u64> for FixedUint<L> {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl<const L: usize> FixedUint<L> {
    pub const BITS: usize = 64 * L;
    pub const BYTES: usize = 8 * L;

    pub const ZERO: Self = Self { limbs: [0; L] };
    pub const ONE: Self = Self::from_u64(1);

    pub const fn from_limbs(limbs: [u64; L]) -> Self {
        Self { limbs }
    }

    pub const fn from_u64(value: u64) -> Self {
        let mut limbs = [0u64; L];
        limbs[0] = value;
        Self { limbs }
    }

    pub fn limbs(&self) -> &[u64; L] {
        &self.limbs
    }

    /// 从大端字节解析，长度必须恰好为 8L
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() != Self::BYTES {
            return Err(FormatError::Length {
                expected: Self::BYTES,
                actual: bytes.len(),
            });
        }
        let mut limbs = [0u64; L];
        for (i, chunk) in bytes.rchunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            limbs[i] = u64::from_be_bytes(word);
        }
        Ok(Self { limbs })
    }

    /// 写出大端字节，`out` 长度必须恰好为 8L
    pub fn write_be_bytes(&self, out: &mut [u8]) -> Result<(), FormatError> {
        if out.len() != Self::BYTES {
            return Err(FormatError::Length {
                expected: Self::BYTES,
                actual: out.len(),
            });
        }
        for (i, chunk) in out.rchunks_exact_mut(8).enumerate() {
            chunk.copy_from_slice(&self.limbs[i].to_be_bytes());
        }
        Ok(())
    }

    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::BYTES];
        for (i, chunk) in out.rchunks_exact_mut(8).enumerate() {
            chunk.copy_from_slice(&self.limbs[i].to_be_bytes());
        }
        out
    }

    /// 解析大端十六进制字符串（可带 `0x` 前缀，位数不足时左侧补零）
    pub fn from_be_hex(input: &str) -> Result<Self, FormatError> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        if digits.is_empty() || digits.len() > 2 * Self::BYTES {
            return Err(FormatError::Hex(format!(
                "expected 1..={} hex digits, got {}",
                2 * Self::BYTES,
                digits.len()
            )));
        }
        let padded = format!("{digits:0>width$}", width = 2 * Self::BYTES);
        let mut bytes = vec![0u8; Self::BYTES];
        hex::decode_to_slice(&padded, &mut bytes).map_err(|e| FormatError::Hex(e.to_string()))?;
        Self::from_be_bytes(&bytes)
    }

    /// 逐 limb 带进位加法，返回 (结果 mod 2^(64L), 进位)
    pub fn overflowing_add(&self, rhs: &Self) -> (Self, u64) {
        let mut limbs = [0u64; L];
        let mut carry = 0u64;
        for (i, out) in limbs.iter_mut().enumerate() {
            let t = u128::from(self.limbs[i]) + u128::from(rhs.limbs[i]) + u128::from(carry);
            *out = t as u64;
            carry = (t >> 64) as u64;
        }
        (Self { limbs }, carry)
    }

    /// 逐 limb 带借位减法，返回 (结果 mod 2^(64L), 借位)
    pub fn overflowing_sub(&self, rhs: &Self) -> (Self, u64) {
        let mut limbs = [0u64; L];
        let mut borrow = 0u64;
        for (i, out) in limbs.iter_mut().enumerate() {
            let t = u128::from(self.limbs[i])
                .wrapping_sub(u128::from(rhs.limbs[i]))
                .wrapping_sub(u128::from(borrow));
            *out = t as u64;
            borrow = (t >> 127) as u64;
        }
        (Self { limbs }, borrow)
    }

    /// 教科书乘法，返回完整的 2L limb 乘积 (低半, 高半)
    pub fn widening_mul(&self, rhs: &Self) -> (Self, Self) {
        let mut lo = [0u64; L];
        let mut hi = [0u64; L];
        for i in 0..L {
            let mut carry = 0u64;
            for j in 0..L {
                let k = i + j;
                let current = if k < L { lo[k] } else { hi[k - L] };
                let t = u128::from(self.limbs[i]) * u128::from(rhs.limbs[j])
                    + u128::from(current)
                    + u128::from(carry);
                if k < L {
                    lo[k] = t as u64;
                } else {
                    hi[k - L] = t as u64;
                }
                carry = (t >> 64) as u64;
            }
            // 位置 i + L 在本轮之前尚未写入
            hi[i] = carry;
        }
        (Self { limbs: lo }, Self { limbs: hi })
    }

    /// 截断到 L limb 的乘法（丢弃高半部分）
    pub fn wrapping_mul(&self, rhs: &Self) -> Self {
        self.widening_mul(rhs).0
    }

    /// (self + rhs) mod n，要求 self, rhs < n
    pub fn add_mod(&self, rhs: &Self, n: &Self) -> Self {
        let (sum, carry) = self.overflowing_add(rhs);
        let (reduced, borrow) = sum.overflowing_sub(n);
        // 溢出了 2^(64L) 或 sum >= n 时取减去 n 的结果
        let mut out = sum;
        out.conditional_move(&reduced, mask_from_bit(carry | (borrow ^ 1)));
        out
    }

    /// (self - rhs) mod n，要求 self, rhs < n
    pub fn sub_mod(&self, rhs: &Self, n: &Self) -> Self {
        let (diff, borrow) = self.overflowing_sub(rhs);
        let correction = n.and_mask(mask_from_bit(borrow));
        diff.overflowing_add(&correction).0
    }

    /// (-self) mod n，要求 self < n
    pub fn neg_mod(&self, n: &Self) -> Self {
        Self::ZERO.sub_mod(self, n)
    }

    fn and_mask(&self, mask: u64) -> Self {
        let mut limbs = self.limbs;
        for limb in &mut limbs {
            *limb &= mask;
        }
        Self { limbs }
    }

    /// 掩码置位处用 `src` 覆盖 `self`
    pub fn conditional_move(&mut self, src: &Self, mask: u64) {
        for (dst, s) in self.limbs.iter_mut().zip(src.limbs.iter()) {
            *dst = (*dst & !mask) | (s & mask);
        }
    }

    /// 掩码置位时返回 `b`，否则返回 `a`
    pub fn select(a: &Self, b: &Self, mask: u64) -> Self {
        let mut out = *a;
        out.conditional_move(b, mask);
        out
    }

    /// self == 0 时返回全 1 掩码
    pub fn ct_is_zero(&self) -> u64 {
        let acc = self.limbs.iter().fold(0u64, |acc, &limb| acc | limb);
        // (acc | -acc) 的最高位在 acc != 0 时为 1
        mask_from_bit(((acc | acc.wrapping_neg()) >> 63) ^ 1)
    }

    pub fn ct_eq(&self, rhs: &Self) -> u64 {
        let mut diff = *self;
        for (d, r) in diff.limbs.iter_mut().zip(rhs.limbs.iter()) {
            *d ^= r;
        }
        diff.ct_is_zero()
    }

    /// self < rhs 时返回全 1 掩码
    pub fn ct_lt(&self, rhs: &Self) -> u64 {
        mask_from_bit(self.overflowing_sub(rhs).1)
    }

    /// self > rhs 时返回全 1 掩码
    pub fn ct_gt(&self, rhs: &Self) -> u64 {
        rhs.ct_lt(self)
    }

    pub fn cmp_vartime(&self, rhs: &Self) -> Ordering {
        self.limbs.iter().rev().cmp(rhs.limbs.iter().rev())
    }

    pub fn is_zero_vartime(&self) -> bool {
        self.limbs.iter().all(|&limb| limb == 0)
    }

    pub fn is_odd(&self) -> bool {
        L > 0 && self.limbs[0] & 1 == 1
    }

    /// 取第 `index` 位（0 或 1），超出宽度时为 0
    pub fn bit(&self, index: usize) -> u64 {
        if index >= Self::BITS {
            return 0;
        }
        (self.limbs[index / 64] >> (index % 64)) & 1
    }

    /// 左移 `bits` 位，移出宽度的位被丢弃
    #[must_use]
    pub fn shl(&self, bits: usize) -> Self {
        let limb_shift = bits / 64;
        let bit_shift = bits % 64;
        if limb_shift >= L {
            return Self::ZERO;
        }
        let mut limbs = [0u64; L];
        for i in limb_shift..L {
            let src = i - limb_shift;
            let mut value = self.limbs[src] << bit_shift;
            if bit_shift != 0 && src > 0 {
                value |= self.limbs[src - 1] >> (64 - bit_shift);
            }
            limbs[i] = value;
        }
        Self { limbs }
    }

    /// 逻辑右移 `bits` 位
    #[must_use]
    pub fn shr(&self, bits: usize) -> Self {
        let limb_shift = bits / 64;
        let bit_shift = bits % 64;
        if limb_shift >= L {
            return Self::ZERO;
        }
        let mut limbs = [0u64; L];
        for (i, out) in limbs.iter_mut().enumerate().take(L - limb_shift) {
            let src = i + limb_shift;
            let mut value = self.limbs[src] >> bit_shift;
            if bit_shift != 0 && src + 1 < L {
                value |= self.limbs[src + 1] << (64 - bit_shift);
            }
            *out = value;
        }
        Self { limbs }
    }
}

impl<const L: usize> fmt::LowerHex for FixedUint<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for limb in self.limbs.iter().rev() {
            write!(f, "{limb:016x}")?;
        }
        Ok(())
    }
}

impl<const L: usize> fmt::Debug for FixedUint<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedUint(0x{self:x})")
    }
}

//! S 盒生成
//!
//! S(b) = A · b⁻¹ ⊕ 0x63，其中 b⁻¹ 为 GF(2⁸) 中的逆元，A 为固定的循环仿射变换。
//! 表在 `Aes128` 构造时生成一次，由该实例持有。

use zeroize::Zeroize;

use super::gf::gf_inv;

/// 仿射变换的常数项
pub const AFFINE_CONSTANT: u8 = 0x63;

fn affine_transform(b: u8) -> u8 {
    b ^ b.rotate_left(1) ^ b.rotate_left(2) ^ b.rotate_left(3) ^ b.rotate_left(4) ^ AFFINE_CONSTANT
}

/// 查表时扫描整张表，访问模式与下标无关
#[inline]
fn ct_lookup(table: &[u8; 256], index: u8) -> u8 {
    let mut out = 0u8;
    for (i, &value) in (0u8..=255).zip(table.iter()) {
        // diff == 0 时 (diff - 1) >> 8 为 0xFF
        let diff = u16::from(i ^ index);
        let mask = (diff.wrapping_sub(1) >> 8) as u8;
        out |= value & mask;
    }
    out
}

#[derive(Clone, Zeroize)]
pub struct SBoxes {
    forward: [u8; 256],
    inverse: [u8; 256],
}

impl SBoxes {
    pub fn generate() -> Self {
        let mut forward = [0u8; 256];
        let mut inverse = [0u8; 256];
        for b in 0..=255u8 {
            let s = affine_transform(gf_inv(b));
            forward[usize::from(b)] = s;
            inverse[usize::from(s)] = b;
        }
        Self { forward, inverse }
    }

    pub fn sub(&self, b: u8) -> u8 {
        ct_lookup(&self.forward, b)
    }

    pub fn inv_sub(&self, b: u8) -> u8 {
        ct_lookup(&self.inverse, b)
    }
}

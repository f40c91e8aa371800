//! 曲线点表示
//!
//! - `ProjectivePoint`：射影坐标 (X, Y, Z)，坐标为 Montgomery 形式，Z = 0 当且仅当为无穷远点
//! - `AffinePoint`：普通形式的仿射坐标 (x, y)，用于编码与跨边界传递

use base64::{Engine as _, engine::general_purpose};

use crate::crypto::bigint::U256;
use crate::error::FormatError;

/// SEC1 未压缩编码长度：0x04 || X || Y
pub const SEC1_UNCOMPRESSED_LEN: usize = 1 + 2 * U256::BYTES;

const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

/// SEC1 中无穷远点的单字节编码
pub const SEC1_INFINITY: u8 = 0x00;

#[derive(Clone, Copy, Debug)]
pub struct ProjectivePoint {
    pub(crate) x: U256,
    pub(crate) y: U256,
    pub(crate) z: U256,
}

impl ProjectivePoint {
    /// 群单位元（Z = 0）
    pub const fn infinity() -> Self {
        Self {
            x: U256::ZERO,
            y: U256::ZERO,
            z: U256::ZERO,
        }
    }

    /// Z == 0 时返回全 1 掩码
    pub fn ct_is_infinity(&self) -> u64 {
        self.z.ct_is_zero()
    }

    pub fn is_infinity(&self) -> bool {
        self.ct_is_infinity() != 0
    }

    pub fn conditional_move(&mut self, src: &Self, mask: u64) {
        self.x.conditional_move(&src.x, mask);
        self.y.conditional_move(&src.y, mask);
        self.z.conditional_move(&src.z, mask);
    }

    /// Z 为 0 时统一成规范的无穷远点表示
    pub(crate) fn normalize_infinity(mut self) -> Self {
        let mask = self.ct_is_infinity();
        self.conditional_move(&Self::infinity(), mask);
        self
    }
}

/// 普通形式的仿射坐标
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AffinePoint {
    pub x: U256,
    pub y: U256,
}

impl AffinePoint {
    pub fn to_sec1_bytes(&self) -> [u8; SEC1_UNCOMPRESSED_LEN] {
        let mut out = [0u8; SEC1_UNCOMPRESSED_LEN];
        out[0] = SEC1_UNCOMPRESSED_TAG;
        for (i, limb) in self.x.limbs().iter().rev().enumerate() {
            out[1 + 8 * i..9 + 8 * i].copy_from_slice(&limb.to_be_bytes());
        }
        for (i, limb) in self.y.limbs().iter().rev().enumerate() {
            out[33 + 8 * i..41 + 8 * i].copy_from_slice(&limb.to_be_bytes());
        }
        out
    }

    /// 解析 SEC1 未压缩编码（只检查格式，曲线成员关系由 `CurveParams` 校验）
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let Some(&tag) = bytes.first() else {
            return Err(FormatError::Length {
                expected: SEC1_UNCOMPRESSED_LEN,
                actual: 0,
            });
        };
        if tag != SEC1_UNCOMPRESSED_TAG {
            return Err(FormatError::PointTag(tag));
        }
        if bytes.len() != SEC1_UNCOMPRESSED_LEN {
            return Err(FormatError::Length {
                expected: SEC1_UNCOMPRESSED_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            x: U256::from_be_bytes(&bytes[1..33])?,
            y: U256::from_be_bytes(&bytes[33..])?,
        })
    }

    /// Base64 编码的 SEC1 公钥，用于文本形式的交换
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.to_sec1_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, FormatError> {
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| FormatError::Base64(e.to_string()))?;
        Self::from_sec1_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AffinePoint {
        AffinePoint {
            x: U256::from_limbs([1, 2, 3, 4]),
            y: U256::from_limbs([5, 6, 7, 8]),
        }
    }

    #[test]
    fn test_sec1_layout() {
        let bytes = sample().to_sec1_bytes();
        assert_eq!(bytes[0], 0x04);
        // X 的最高 limb 在最前面
        assert_eq!(&bytes[1..9], &4u64.to_be_bytes());
        assert_eq!(&bytes[25..33], &1u64.to_be_bytes());
        assert_eq!(&bytes[33..41], &8u64.to_be_bytes());
        assert_eq!(AffinePoint::from_sec1_bytes(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_sec1_rejects_malformed() {
        assert!(matches!(
            AffinePoint::from_sec1_bytes(&[]),
            Err(FormatError::Length { actual: 0, .. })
        ));
        assert_eq!(
            AffinePoint::from_sec1_bytes(&[0x02; 33]).unwrap_err(),
            FormatError::PointTag(0x02)
        );
        let bytes = sample().to_sec1_bytes();
        assert!(matches!(
            AffinePoint::from_sec1_bytes(&bytes[..64]),
            Err(FormatError::Length { expected: 65, actual: 64 })
        ));
    }

    #[test]
    fn test_base64_round_trip() {
        let encoded = sample().to_base64();
        assert_eq!(AffinePoint::from_base64(&encoded).unwrap(), sample());
        assert!(matches!(
            AffinePoint::from_base64("not base64!"),
            Err(FormatError::Base64(_))
        ));
    }

    #[test]
    fn test_infinity_marker() {
        let inf = ProjectivePoint::infinity();
        assert!(inf.is_infinity());
        let p = ProjectivePoint {
            x: U256::ONE,
            y: U256::ONE,
            z: U256::ONE,
        };
        assert!(!p.is_infinity());
        let q = ProjectivePoint {
            x: U256::ONE,
            y: U256::from(9),
            z: U256::ZERO,
        }
        .normalize_infinity();
        assert_eq!(q.y, U256::ZERO);
    }
}

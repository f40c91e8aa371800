//! Montgomery 模乘
//!
//! 基数 R = 2^(64L)。Montgomery 形式下 a 表示为 aR mod n，
//! 乘法 `montgomery_mul(aR, bR) = abR mod n` 不需要除法。
//! Montgomery 形式的值与普通形式的值不能混用，需显式转换。

use crate::crypto::bigint::{FixedUint, mask_from_bit};
use crate::error::ModulusError;

/// REDC：计算 a·b·R⁻¹ mod n
///
/// `a`, `b` 必须小于 `n`，`n` 必须为奇数，`n_prime = -n⁻¹ mod R`。
/// 执行步数与输入无关。
pub fn montgomery_mul<const L: usize>(
    a: &FixedUint<L>,
    b: &FixedUint<L>,
    n: &FixedUint<L>,
    n_prime: &FixedUint<L>,
) -> FixedUint<L> {
    let (t_lo, t_hi) = a.widening_mul(b);
    // m·n ≡ -t (mod R)，因此 t + m·n 的低半部分为 0
    let m = t_lo.wrapping_mul(n_prime);
    let (mn_lo, mn_hi) = m.widening_mul(n);

    let (_, low_carry) = t_lo.overflowing_add(&mn_lo);
    let (upper, c1) = t_hi.overflowing_add(&mn_hi);
    let (upper, c2) = upper.overflowing_add(&FixedUint::from_u64(low_carry));
    let carry = c1 | c2;

    // (t + m·n) / R < 2n，最多减一次 n
    let (reduced, borrow) = upper.overflowing_sub(n);
    FixedUint::select(&upper, &reduced, mask_from_bit(carry | (borrow ^ 1)))
}

/// 针对一个奇模数预计算的 Montgomery 参数
#[derive(Clone, Debug)]
pub struct MontgomeryContext<const L: usize> {
    modulus: FixedUint<L>,
    n_prime: FixedUint<L>,
    /// R mod n，即 Montgomery 形式的 1
    one: FixedUint<L>,
    /// R² mod n，用于转换到 Montgomery 形式
    r2: FixedUint<L>,
}

impl<const L: usize> MontgomeryContext<L> {
    pub fn new(modulus: FixedUint<L>) -> Result<Self, ModulusError> {
        if !modulus.is_odd() {
            return Err(ModulusError::Even);
        }
        if modulus == FixedUint::ONE {
            return Err(ModulusError::TooSmall);
        }
        Ok(Self::from_odd_modulus(modulus))
    }

    /// 调用方保证 `modulus` 为大于 1 的奇数
    pub(crate) fn from_odd_modulus(modulus: FixedUint<L>) -> Self {
        // Newton 迭代求 n⁻¹ mod R：奇数 n 满足 n·n ≡ 1 (mod 8)，每轮精度翻倍
        let two = FixedUint::from_u64(2);
        let mut inv = modulus;
        let mut precision = 3;
        while precision < FixedUint::<L>::BITS {
            let correction = two.overflowing_sub(&modulus.wrapping_mul(&inv)).0;
            inv = inv.wrapping_mul(&correction);
            precision *= 2;
        }
        let n_prime = FixedUint::ZERO.overflowing_sub(&inv).0;

        // 1 经过 64L 次模倍加得到 R mod n，再 64L 次得到 R² mod n
        let mut acc = FixedUint::ONE;
        for _ in 0..FixedUint::<L>::BITS {
            acc = acc.add_mod(&acc, &modulus);
        }
        let one = acc;
        for _ in 0..FixedUint::<L>::BITS {
            acc = acc.add_mod(&acc, &modulus);
        }

        Self {
            modulus,
            n_prime,
            one,
            r2: acc,
        }
    }

    pub fn modulus(&self) -> &FixedUint<L> {
        &self.modulus
    }

    pub fn n_prime(&self) -> &FixedUint<L> {
        &self.n_prime
    }

    /// Montgomery 形式的 1（R mod n）
    pub fn one(&self) -> &FixedUint<L> {
        &self.one
    }

    /// a → aR mod n，要求 a < n
    pub fn to_montgomery(&self, a: &FixedUint<L>) -> FixedUint<L> {
        self.mul(a, &self.r2)
    }

    /// aR → a
    pub fn from_montgomery(&self, a: &FixedUint<L>) -> FixedUint<L> {
        self.mul(a, &FixedUint::ONE)
    }

    pub fn mul(&self, a: &FixedUint<L>, b: &FixedUint<L>) -> FixedUint<L> {
        montgomery_mul(a, b, &self.modulus, &self.n_prime)
    }

    pub fn square(&self, a: &FixedUint<L>) -> FixedUint<L> {
        self.mul(a, a)
    }

    pub fn add(&self, a: &FixedUint<L>, b: &FixedUint<L>) -> FixedUint<L> {
        a.add_mod(b, &self.modulus)
    }

    pub fn sub(&self, a: &FixedUint<L>, b: &FixedUint<L>) -> FixedUint<L> {
        a.sub_mod(b, &self.modulus)
    }

    pub fn neg(&self, a: &FixedUint<L>) -> FixedUint<L> {
        a.neg_mod(&self.modulus)
    }

    /// 模幂 base^exp（base 为 Montgomery 形式，结果同样）
    ///
    /// 从最高位开始遍历 exp 的全部 64L 位，每位都做一次平方与一次乘法，
    /// 用条件移动决定是否采用乘积。
    pub fn pow(&self, base: &FixedUint<L>, exp: &FixedUint<L>) -> FixedUint<L> {
        let mut acc = self.one;
        for i in (0..FixedUint::<L>::BITS).rev() {
            acc = self.square(&acc);
            let product = self.mul(&acc, base);
            acc.conditional_move(&product, mask_from_bit(exp.bit(i)));
        }
        acc
    }

    /// 费马小定理求逆：a^(n-2)，要求模数为素数；0 映射为 0
    pub fn invert(&self, a: &FixedUint<L>) -> FixedUint<L> {
        let exp = self.modulus.overflowing_sub(&FixedUint::from_u64(2)).0;
        self.pow(a, &exp)
    }
}

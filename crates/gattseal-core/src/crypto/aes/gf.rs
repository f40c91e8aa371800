//! GF(2⁸) 运算，约化多项式 x⁸ + x⁴ + x³ + x + 1 (0x11B)

/// 约化多项式去掉 x⁸ 后的低 8 位
pub const REDUCTION: u8 = 0x1B;

/// 乘以 x（左移一位后按需约化），无分支
#[inline]
pub fn xtime(a: u8) -> u8 {
    let high = 0u8.wrapping_sub(a >> 7);
    (a << 1) ^ (REDUCTION & high)
}

/// 无进位乘法：逐位移位并约化，固定 8 轮
pub fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    for _ in 0..8 {
        product ^= a & 0u8.wrapping_sub(b & 1);
        a = xtime(a);
        b >>= 1;
    }
    product
}

/// 平方-乘法求幂，固定遍历 8 位
pub fn gf_pow(base: u8, exp: u8) -> u8 {
    let mut result = 1u8;
    for i in (0..8).rev() {
        result = gf_mul(result, result);
        let product = gf_mul(result, base);
        let mask = 0u8.wrapping_sub((exp >> i) & 1);
        result = (result & !mask) | (product & mask);
    }
    result
}

/// 乘法逆元 b^254；0 映射为 0
pub fn gf_inv(b: u8) -> u8 {
    gf_pow(b, 254)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fips197_multiplication_examples() {
        // FIPS-197 4.2: {57} • {83} = {c1}, {57} • {13} = {fe}
        assert_eq!(gf_mul(0x57, 0x83), 0xc1);
        assert_eq!(gf_mul(0x57, 0x13), 0xfe);
        assert_eq!(xtime(0x57), 0xae);
        assert_eq!(xtime(0xae), 0x47);
    }

    #[test]
    fn test_every_nonzero_element_has_inverse() {
        assert_eq!(gf_inv(0), 0);
        for b in 1..=255u8 {
            assert_eq!(gf_mul(b, gf_inv(b)), 1, "b = {b:#04x}");
        }
    }

    #[test]
    fn test_pow_small_exponents() {
        assert_eq!(gf_pow(0x57, 0), 1);
        assert_eq!(gf_pow(0x57, 1), 0x57);
        assert_eq!(gf_pow(0x57, 2), gf_mul(0x57, 0x57));
        assert_eq!(gf_pow(0x02, 8), 0x1b);
    }
}

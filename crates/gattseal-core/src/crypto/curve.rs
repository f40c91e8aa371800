//! 短 Weierstrass 曲线 y² = x³ + ax + b (mod p) 上的点运算
//!
//! 坐标在内部以 Montgomery 形式保存。加法、倍点与标量乘法不在秘密数据上分支：
//! 特殊情况（无穷远点、P = Q、P = -Q）都先算出候选结果，再用条件移动选择。

use crate::crypto::bigint::{U256, mask_from_bit};
use crate::crypto::montgomery::MontgomeryContext;
use crate::crypto::point::{AffinePoint, ProjectivePoint};
use crate::error::KeyAgreementError;

/// NIST P-256 (secp256r1)，大端十六进制
pub mod p256 {
    pub const P: &str = "ffffffff00000001000000000000000000000000ffffffffffffffffffffffff";
    pub const A: &str = "ffffffff00000001000000000000000000000000fffffffffffffffffffffffc";
    pub const B: &str = "5ac635d8aa3a93e7b3ebbd55769886bc651d06b0cc53b0f63bce3c3e27d2604b";
    pub const GX: &str = "6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296";
    pub const GY: &str = "4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5";
    pub const N: &str = "ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551";
}

const P256_P: U256 = U256::from_limbs([
    0xffff_ffff_ffff_ffff,
    0x0000_0000_ffff_ffff,
    0x0000_0000_0000_0000,
    0xffff_ffff_0000_0001,
]);
const P256_A: U256 = U256::from_limbs([
    0xffff_ffff_ffff_fffc,
    0x0000_0000_ffff_ffff,
    0x0000_0000_0000_0000,
    0xffff_ffff_0000_0001,
]);
const P256_B: U256 = U256::from_limbs([
    0x3bce_3c3e_27d2_604b,
    0x651d_06b0_cc53_b0f6,
    0xb3eb_bd55_7698_86bc,
    0x5ac6_35d8_aa3a_93e7,
]);
const P256_GX: U256 = U256::from_limbs([
    0xf4a1_3945_d898_c296,
    0x7703_7d81_2deb_33a0,
    0xf8bc_e6e5_63a4_40f2,
    0x6b17_d1f2_e12c_4247,
]);
const P256_GY: U256 = U256::from_limbs([
    0xcbb6_4068_37bf_51f5,
    0x2bce_3357_6b31_5ece,
    0x8ee7_eb4a_7c0f_9e16,
    0x4fe3_42e2_fe1a_7f9b,
]);
const P256_N: U256 = U256::from_limbs([
    0xf3b9_cac2_fc63_2551,
    0xbce6_faad_a717_9e84,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_0000_0000,
]);

/// 曲线参数：p, a, b 以及生成元与群阶
///
/// 构造后不可变。
#[derive(Clone, Debug)]
pub struct CurveParams {
    p: U256,
    a: U256,
    b: U256,
    order: U256,
    field: MontgomeryContext<4>,
    a_m: U256,
    b_m: U256,
    generator: ProjectivePoint,
}

impl CurveParams {
    /// 双方约定的固定曲线 NIST P-256
    pub fn p256() -> Self {
        let field = MontgomeryContext::from_odd_modulus(P256_P);
        Self::with_field(field, P256_A, P256_B, &AffinePoint { x: P256_GX, y: P256_GY }, P256_N)
    }

    /// 自定义曲线；`p` 必须为奇素数，`a`, `b` 及生成元坐标必须小于 `p`
    pub fn new(
        p: U256,
        a: U256,
        b: U256,
        generator: &AffinePoint,
        order: U256,
    ) -> Result<Self, crate::Error> {
        let field = MontgomeryContext::new(p)?;
        for value in [&a, &b, &generator.x, &generator.y] {
            if value.cmp_vartime(&p).is_ge() {
                return Err(crate::error::FormatError::OutOfRange("curve constant >= p").into());
            }
        }
        let curve = Self::with_field(field, a, b, generator, order);
        if !curve.is_on_curve(generator) {
            return Err(KeyAgreementError::NotOnCurve.into());
        }
        Ok(curve)
    }

    fn with_field(
        field: MontgomeryContext<4>,
        a: U256,
        b: U256,
        generator: &AffinePoint,
        order: U256,
    ) -> Self {
        let generator = ProjectivePoint {
            x: field.to_montgomery(&generator.x),
            y: field.to_montgomery(&generator.y),
            z: *field.one(),
        };
        Self {
            p: *field.modulus(),
            a_m: field.to_montgomery(&a),
            b_m: field.to_montgomery(&b),
            a,
            b,
            order,
            field,
            generator,
        }
    }

    pub fn p(&self) -> &U256 {
        &self.p
    }

    pub fn a(&self) -> &U256 {
        &self.a
    }

    pub fn b(&self) -> &U256 {
        &self.b
    }

    /// 生成元的阶
    pub fn order(&self) -> &U256 {
        &self.order
    }

    pub fn generator(&self) -> &ProjectivePoint {
        &self.generator
    }

    pub fn infinity(&self) -> ProjectivePoint {
        ProjectivePoint::infinity()
    }

    /// 2P（dbl-1998-cmo-2）
    pub fn double(&self, p: &ProjectivePoint) -> ProjectivePoint {
        let f = &self.field;

        let xx = f.square(&p.x);
        let zz = f.square(&p.z);
        // w = a·Z² + 3·X²
        let w = f.add(&f.mul(&self.a_m, &zz), &f.add(&xx, &f.add(&xx, &xx)));
        let s = f.mul(&p.y, &p.z);
        let ss = f.square(&s);
        let sss = f.mul(&s, &ss);
        let r = f.mul(&p.y, &s);
        let rr = f.square(&r);
        // B = X·Y·s
        let b = f.mul(&p.x, &r);
        let b2 = f.add(&b, &b);
        let b4 = f.add(&b2, &b2);
        let b8 = f.add(&b4, &b4);
        let h = f.sub(&f.square(&w), &b8);

        let hs = f.mul(&h, &s);
        let x3 = f.add(&hs, &hs);
        let rr2 = f.add(&rr, &rr);
        let rr4 = f.add(&rr2, &rr2);
        let rr8 = f.add(&rr4, &rr4);
        let y3 = f.sub(&f.mul(&w, &f.sub(&b4, &h)), &rr8);
        let sss2 = f.add(&sss, &sss);
        let sss4 = f.add(&sss2, &sss2);
        let z3 = f.add(&sss4, &sss4);

        // 输入为无穷远点或 Y = 0 时 s = 0，结果 Z3 = 0
        ProjectivePoint { x: x3, y: y3, z: z3 }.normalize_infinity()
    }

    /// P + Q（add-1998-cmo-2），特殊情况用掩码选择
    pub fn add(&self, p: &ProjectivePoint, q: &ProjectivePoint) -> ProjectivePoint {
        let f = &self.field;

        let y1z2 = f.mul(&p.y, &q.z);
        let x1z2 = f.mul(&p.x, &q.z);
        let z1z2 = f.mul(&p.z, &q.z);
        let u = f.sub(&f.mul(&q.y, &p.z), &y1z2);
        let uu = f.square(&u);
        let v = f.sub(&f.mul(&q.x, &p.z), &x1z2);
        let vv = f.square(&v);
        let vvv = f.mul(&v, &vv);
        let r = f.mul(&vv, &x1z2);
        let r2 = f.add(&r, &r);
        let a = f.sub(&f.sub(&f.mul(&uu, &z1z2), &vvv), &r2);

        // v = 0, u ≠ 0 (P = -Q) 时 Z3 = 0，由 normalize_infinity 规范化
        let mut sum = ProjectivePoint {
            x: f.mul(&v, &a),
            y: f.sub(&f.mul(&u, &f.sub(&r, &a)), &f.mul(&vvv, &y1z2)),
            z: f.mul(&vvv, &z1z2),
        }
        .normalize_infinity();

        let p_inf = p.ct_is_infinity();
        let q_inf = q.ct_is_infinity();
        let same_point = u.ct_is_zero() & v.ct_is_zero() & !p_inf & !q_inf;

        let doubled = self.double(p);
        sum.conditional_move(&doubled, same_point);
        sum.conditional_move(q, p_inf);
        sum.conditional_move(p, q_inf & !p_inf);
        sum
    }

    /// -P
    pub fn negate(&self, p: &ProjectivePoint) -> ProjectivePoint {
        ProjectivePoint {
            x: p.x,
            y: self.field.neg(&p.y),
            z: p.z,
        }
    }

    /// kP：从最高位开始倍加，固定遍历全部 256 位
    pub fn scalar_mul(&self, k: &U256, p: &ProjectivePoint) -> ProjectivePoint {
        let mut acc = ProjectivePoint::infinity();
        for i in (0..U256::BITS).rev() {
            acc = self.double(&acc);
            let sum = self.add(&acc, p);
            acc.conditional_move(&sum, mask_from_bit(k.bit(i)));
        }
        acc
    }

    /// kG
    pub fn mul_generator(&self, k: &U256) -> ProjectivePoint {
        self.scalar_mul(k, &self.generator)
    }

    /// 射影坐标 → 普通形式仿射坐标；无穷远点返回 `None`
    pub fn to_affine(&self, p: &ProjectivePoint) -> Option<AffinePoint> {
        if p.is_infinity() {
            return None;
        }
        let f = &self.field;
        let z_inv = f.invert(&p.z);
        Some(AffinePoint {
            x: f.from_montgomery(&f.mul(&p.x, &z_inv)),
            y: f.from_montgomery(&f.mul(&p.y, &z_inv)),
        })
    }

    /// 校验公开点并转换到射影坐标
    pub fn from_affine(&self, point: &AffinePoint) -> Result<ProjectivePoint, KeyAgreementError> {
        if !self.is_on_curve(point) {
            return Err(KeyAgreementError::NotOnCurve);
        }
        Ok(ProjectivePoint {
            x: self.field.to_montgomery(&point.x),
            y: self.field.to_montgomery(&point.y),
            z: *self.field.one(),
        })
    }

    /// 坐标在 [0, p) 内且满足曲线方程
    pub fn is_on_curve(&self, point: &AffinePoint) -> bool {
        if point.x.cmp_vartime(&self.p).is_ge() || point.y.cmp_vartime(&self.p).is_ge() {
            return false;
        }
        let f = &self.field;
        let x = f.to_montgomery(&point.x);
        let y = f.to_montgomery(&point.y);
        let lhs = f.square(&y);
        let x3 = f.mul(&f.square(&x), &x);
        let rhs = f.add(&f.add(&x3, &f.mul(&self.a_m, &x)), &self.b_m);
        lhs == rhs
    }

    /// 射影等价比较：X1·Z2 = X2·Z1 且 Y1·Z2 = Y2·Z1
    pub fn points_equal(&self, p: &ProjectivePoint, q: &ProjectivePoint) -> bool {
        match (p.is_infinity(), q.is_infinity()) {
            (true, true) => true,
            (false, false) => {
                let f = &self.field;
                f.mul(&p.x, &q.z) == f.mul(&q.x, &p.z) && f.mul(&p.y, &q.z) == f.mul(&q.y, &p.z)
            }
            _ => false,
        }
    }
}

//! 加密模块
//!
//! - `bigint` / `montgomery`：定宽整数与 Montgomery 模运算
//! - `point` / `curve`：P-256 射影坐标点运算与 ECDH
//! - `aes` / `ccm`：AES-128 分组密码与 CCM 认证加密
//! - `ble_security`：会话密钥协商与逐条消息加解密

pub mod aes;
pub mod bigint;
pub mod ble_security;
pub mod ccm;
pub mod curve;
pub mod montgomery;
pub mod point;
pub mod seq_window;

pub use self::aes::Aes128;
pub use self::bigint::{FixedUint, U256};
pub use self::ble_security::{NONCE_LEN, SecurityManager, SessionKey, session_nonce};
pub use self::ccm::{AeadMessage, Aes128Ccm, TagLength};
pub use self::curve::CurveParams;
pub use self::montgomery::{MontgomeryContext, montgomery_mul};
pub use self::point::{AffinePoint, ProjectivePoint};
pub use self::seq_window::SequenceWindow;

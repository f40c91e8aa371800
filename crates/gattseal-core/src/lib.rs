//! Gattseal Core Library
//!
//! 低带宽 BLE 链路上短消息的端到端加密引擎
//!
//! # 模块
//!
//! - **crypto**: 定宽整数与 Montgomery 运算、P-256 ECDH、AES-128、CCM、会话管理
//! - **ble**: GATT 标识符、帧格式以及连接外部传输层的 `SecureLink`
//! - **config**: 安全设置的加载、保存与校验
//! - **logging**: 日志级别与安全事件
//!
//! # 使用示例
//!
//! ```
//! use gattseal_core::SecurityManager;
//!
//! let mut alice = SecurityManager::default();
//! let mut bob = SecurityManager::default();
//!
//! // 1. 双方生成密钥对并交换公钥
//! let alice_pub = alice.begin_key_agreement()?;
//! let bob_pub = bob.begin_key_agreement()?;
//!
//! // 2. 使用对方公钥建立会话
//! alice.complete_key_agreement(&bob_pub)?;
//! bob.complete_key_agreement(&alice_pub)?;
//!
//! // 3. 加密发送，对端解密
//! let wire = alice.encrypt_outgoing(b"hello")?;
//! assert_eq!(bob.decrypt_incoming(&wire)?, b"hello");
//! # Ok::<(), gattseal_core::Error>(())
//! ```

#![forbid(unsafe_code)]

pub mod ble;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;

// BLE re-exports
pub use ble::{ConnectionState, Frame, FrameTransport, SecureLink};

// Crypto re-exports
pub use crypto::{
    AeadMessage, Aes128, Aes128Ccm, AffinePoint, CurveParams, SecurityManager, TagLength, U256,
};

pub use config::{LinkConfig, SecuritySettings};
pub use error::{CcmError, Error, FormatError, KeyAgreementError, ModulusError, Result};
pub use logging::{LogLevel, SecurityEvent};

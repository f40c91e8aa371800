//! 会话安全管理
//!
//! 实现两端之间的会话密钥协商与逐条消息的认证加密：
//! - ECDH (P-256) 密钥交换，私钥在 [1, n-1] 内均匀采样
//! - 会话密钥 = HKDF-SHA256(共享点 X 坐标) 的前 16 字节
//! - AES-128-CCM 加密，13 字节 nonce = 方向(1) || 0x00 × 4 || 计数器(u64 BE)
//!
//! 关键约定：
//! 1. 双方在同一个会话密钥下各自从 0 开始计数。方向字节区分两端：
//!    SEC1 公钥编码较小的一方为 0，另一方为 1，因此 nonce 不会在两端之间重复
//! 2. 出站计数器的"读取并递增"是一次原子操作，计数器耗尽后拒绝继续加密
//! 3. 入站消息先认证，再检查方向字节并进入防重放窗口

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::aes::KEY_SIZE;
use super::bigint::U256;
use super::ccm::{AeadMessage, Aes128Ccm, TagLength};
use super::curve::CurveParams;
use super::point::{AffinePoint, SEC1_INFINITY};
use super::seq_window::SequenceWindow;
use crate::config::LinkConfig;
use crate::error::{CcmError, Error, KeyAgreementError, Result};
use crate::logging::SecurityEvent;

/// 会话 nonce 长度
pub const NONCE_LEN: usize = 13;

const KDF_SALT: &[u8] = b"gattseal/v1/salt";
const KDF_INFO: &[u8] = b"gattseal/v1/aes-128-ccm session key";

/// 私钥标量，drop 时清零
#[derive(Zeroize, ZeroizeOnDrop)]
struct PrivateScalar(U256);

impl std::fmt::Debug for PrivateScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateScalar(<redacted>)")
    }
}

/// 128 位会话密钥，drop 时清零，Debug 不输出内容
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// 由共享点的 X 坐标派生
    pub fn derive(shared_x: &U256) -> Result<Self> {
        let mut ikm = [0u8; U256::BYTES];
        shared_x.write_be_bytes(&mut ikm)?;

        let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), &ikm);
        let mut okm = [0u8; KEY_SIZE];
        let expanded = hk.expand(KDF_INFO, &mut okm);
        ikm.zeroize();
        expanded.map_err(|_| KeyAgreementError::Kdf)?;
        Ok(Self(okm))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// 构造会话 nonce
pub fn session_nonce(direction: u8, counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = direction;
    nonce[5..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// 解析会话 nonce，返回 (方向, 计数器)
fn parse_nonce(nonce: &[u8]) -> Option<(u8, u64)> {
    let nonce: &[u8; NONCE_LEN] = nonce.try_into().ok()?;
    let mut counter = [0u8; 8];
    counter.copy_from_slice(&nonce[5..]);
    Some((nonce[0], u64::from_be_bytes(counter)))
}

struct Session {
    cipher: Aes128Ccm,
    direction: u8,
    /// 建立本会话所用的对端公钥
    peer: AffinePoint,
    tx_counter: AtomicU64,
    rx_window: Mutex<SequenceWindow>,
}

impl Session {
    fn peer_direction(&self) -> u8 {
        self.direction ^ 1
    }

    /// 原子地取出当前计数器并加一，溢出时返回 `NonceExhausted`
    fn next_counter(&self) -> Result<u64> {
        self.tx_counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_add(1))
            .map_err(|_| Error::NonceExhausted)
    }
}

/// 会话安全管理器
///
/// 流程：`begin_key_agreement` → 交换公钥 → `complete_key_agreement` →
/// `encrypt_outgoing` / `decrypt_incoming`。加解密只需要 `&self`，
/// 同一实例可以被多个回调并发驱动。
pub struct SecurityManager {
    curve: CurveParams,
    tag_len: TagLength,
    replay_window: u64,
    private: Option<PrivateScalar>,
    public: Option<AffinePoint>,
    session: Option<Session>,
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self::new(TagLength::default(), SequenceWindow::default().size())
    }
}

impl SecurityManager {
    pub fn new(tag_len: TagLength, replay_window: u64) -> Self {
        Self {
            curve: CurveParams::p256(),
            tag_len,
            replay_window,
            private: None,
            public: None,
            session: None,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.tag_len, config.replay_window)
    }

    pub fn tag_len(&self) -> TagLength {
        self.tag_len
    }

    /// 生成本地密钥对，返回需要发送给对端的公钥
    ///
    /// 会丢弃之前的会话。
    pub fn begin_key_agreement(&mut self) -> Result<AffinePoint> {
        self.begin_key_agreement_with_rng(&mut OsRng)
    }

    pub fn begin_key_agreement_with_rng<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<AffinePoint> {
        self.end_session();

        let private = self.sample_scalar(rng)?;
        let public = self
            .curve
            .to_affine(&self.curve.mul_generator(&private.0))
            .ok_or(KeyAgreementError::PointAtInfinity)?;

        self.private = Some(private);
        self.public = Some(public);
        SecurityEvent::KeyAgreementStarted.emit();
        Ok(public)
    }

    /// 拒绝采样：32 字节随机数落在 [1, n-1] 内才接受
    fn sample_scalar<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<PrivateScalar> {
        let mut bytes = [0u8; U256::BYTES];
        loop {
            rng.fill_bytes(&mut bytes);
            let candidate = PrivateScalar(U256::from_be_bytes(&bytes)?);
            let in_range = !candidate.0.ct_is_zero() & candidate.0.ct_lt(self.curve.order());
            if in_range != 0 {
                bytes.zeroize();
                return Ok(candidate);
            }
        }
    }

    /// 使用对端公钥完成协商并建立会话
    pub fn complete_key_agreement(&mut self, peer: &AffinePoint) -> Result<()> {
        let result = self.establish(peer);
        if result.is_err() {
            SecurityEvent::KeyAgreementFailed.emit();
        }
        result
    }

    fn establish(&mut self, peer: &AffinePoint) -> Result<()> {
        let private = self.private.as_ref().ok_or(KeyAgreementError::NotStarted)?;
        let public = self.public.ok_or(KeyAgreementError::NotStarted)?;
        if *peer == public {
            return Err(KeyAgreementError::ReflectedPublicKey.into());
        }

        let peer_point = self.curve.from_affine(peer)?;
        let shared = self.curve.scalar_mul(&private.0, &peer_point);
        let mut shared = self
            .curve
            .to_affine(&shared)
            .ok_or(KeyAgreementError::DegenerateSharedSecret)?;
        let key = SessionKey::derive(&shared.x);
        shared.x.zeroize();
        shared.y.zeroize();
        let key = key?;

        let direction = u8::from(public.to_sec1_bytes() > peer.to_sec1_bytes());
        self.session = Some(Session {
            cipher: Aes128Ccm::new(key.as_bytes(), self.tag_len),
            direction,
            peer: *peer,
            tx_counter: AtomicU64::new(0),
            rx_window: Mutex::new(SequenceWindow::with_size(self.replay_window)),
        });
        // 私钥只在协商期间保留
        self.private = None;

        SecurityEvent::SessionEstablished { direction }.emit();
        Ok(())
    }

    /// 解析并校验 SEC1 编码的对端公钥，不改变任何状态
    ///
    /// 单字节 0x00 表示无穷远点。
    pub fn parse_peer_sec1(&self, peer: &[u8]) -> Result<AffinePoint> {
        let parsed = if peer == &[SEC1_INFINITY] {
            Err(KeyAgreementError::PointAtInfinity.into())
        } else {
            AffinePoint::from_sec1_bytes(peer)
                .map_err(Error::from)
                .and_then(|point| {
                    if self.curve.is_on_curve(&point) {
                        Ok(point)
                    } else {
                        Err(KeyAgreementError::NotOnCurve.into())
                    }
                })
        };
        if parsed.is_err() {
            SecurityEvent::KeyAgreementFailed.emit();
        }
        parsed
    }

    pub fn complete_key_agreement_sec1(&mut self, peer: &[u8]) -> Result<()> {
        let peer = self.parse_peer_sec1(peer)?;
        self.complete_key_agreement(&peer)
    }

    pub fn complete_key_agreement_b64(&mut self, peer: &str) -> Result<()> {
        let peer = AffinePoint::from_base64(peer)?;
        self.complete_key_agreement(&peer)
    }

    pub fn encrypt_outgoing(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_outgoing_with_aad(plaintext, &[])
    }

    /// 返回线路格式 nonce || ciphertext || tag
    pub fn encrypt_outgoing_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let session = self.session.as_ref().ok_or(KeyAgreementError::NoSession)?;
        let counter = session.next_counter().inspect_err(|_| {
            SecurityEvent::NonceExhausted.emit();
        })?;
        let nonce = session_nonce(session.direction, counter);
        let sealed = session.cipher.seal(&nonce, aad, plaintext)?;
        Ok(sealed.to_wire())
    }

    pub fn decrypt_incoming(&self, wire: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_incoming_with_aad(wire, &[])
    }

    pub fn decrypt_incoming_with_aad(&self, wire: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let session = self.session.as_ref().ok_or(KeyAgreementError::NoSession)?;
        let message = AeadMessage::from_wire(wire, NONCE_LEN, self.tag_len)?;
        let (direction, counter) =
            parse_nonce(&message.nonce).ok_or(CcmError::InvalidNonceLength(message.nonce.len()))?;

        let mut plaintext = session.cipher.open_message(aad, &message).inspect_err(|_| {
            SecurityEvent::AuthenticationFailed.emit();
        })?;

        // 双方共用一个密钥，被回送的本端消息同样能通过认证
        if direction == session.direction {
            plaintext.zeroize();
            SecurityEvent::ReflectedMessage.emit();
            return Err(Error::Reflected);
        }

        let fresh = session
            .rx_window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_and_update(counter);
        if !fresh {
            plaintext.zeroize();
            SecurityEvent::ReplayRejected { counter }.emit();
            return Err(Error::Replay(counter));
        }
        Ok(plaintext)
    }

    /// 清除会话密钥、私钥与计数器
    pub fn end_session(&mut self) {
        let had_session = self.session.is_some();
        self.session = None;
        self.private = None;
        self.public = None;
        if had_session {
            SecurityEvent::SessionClosed.emit();
        }
    }

    pub fn is_established(&self) -> bool {
        self.session.is_some()
    }

    /// 已发出公钥、正在等待对端公钥
    pub fn is_awaiting_peer(&self) -> bool {
        self.private.is_some()
    }

    /// 当前会话的对端公钥
    pub fn peer_public_key(&self) -> Option<&AffinePoint> {
        self.session.as_ref().map(|s| &s.peer)
    }

    pub fn public_key(&self) -> Option<&AffinePoint> {
        self.public.as_ref()
    }

    /// Base64 编码的 SEC1 公钥
    pub fn public_key_b64(&self) -> Option<String> {
        self.public.as_ref().map(AffinePoint::to_base64)
    }

    /// 本端方向字节（会话建立后）
    pub fn direction(&self) -> Option<u8> {
        self.session.as_ref().map(|s| s.direction)
    }

    /// 下一条出站消息将使用的计数器
    pub fn next_tx_counter(&self) -> Option<u64> {
        self.session
            .as_ref()
            .map(|s| s.tx_counter.load(Ordering::SeqCst))
    }

    #[cfg(test)]
    fn set_tx_counter(&self, value: u64) {
        if let Some(session) = &self.session {
            session.tx_counter.store(value, Ordering::SeqCst);
        }
    }

    /// 会话建立的对端方向，入站 nonce 必须携带该值
    pub fn peer_direction(&self) -> Option<u8> {
        self.session.as_ref().map(Session::peer_direction)
    }
}

impl std::fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityManager")
            .field("tag_len", &self.tag_len)
            .field("started", &self.public.is_some())
            .field("established", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    fn pair(seed: u64) -> (SecurityManager, SecurityManager) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut alice = SecurityManager::default();
        let mut bob = SecurityManager::default();
        let a_pub = alice.begin_key_agreement_with_rng(&mut rng).unwrap();
        let b_pub = bob.begin_key_agreement_with_rng(&mut rng).unwrap();
        alice.complete_key_agreement(&b_pub).unwrap();
        bob.complete_key_agreement(&a_pub).unwrap();
        (alice, bob)
    }

    #[test]
    fn test_session_nonce_layout() {
        let nonce = session_nonce(1, 0x0102_0304_0506_0708);
        assert_eq!(nonce, [1, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(parse_nonce(&nonce), Some((1, 0x0102_0304_0506_0708)));
        assert_eq!(parse_nonce(&nonce[..12]), None);
    }

    #[test]
    fn test_handshake_and_round_trip() {
        let (alice, bob) = pair(1);
        assert!(alice.is_established() && bob.is_established());
        assert!(!alice.is_awaiting_peer());
        assert_eq!(alice.peer_public_key(), bob.public_key());
        assert_ne!(alice.direction(), bob.direction());
        assert_eq!(alice.peer_direction(), bob.direction());

        let wire = alice.encrypt_outgoing(b"hello bob").unwrap();
        assert_eq!(wire.len(), NONCE_LEN + 9 + 8);
        assert_eq!(bob.decrypt_incoming(&wire).unwrap(), b"hello bob");

        let wire = bob.encrypt_outgoing_with_aad(b"hi alice", b"hdr").unwrap();
        assert_eq!(alice.decrypt_incoming_with_aad(&wire, b"hdr").unwrap(), b"hi alice");
        assert!(
            alice
                .decrypt_incoming_with_aad(&wire, b"other")
                .unwrap_err()
                .is_authentication_failure()
        );
    }

    #[test]
    fn test_counters_advance_per_message() {
        let (alice, bob) = pair(2);
        assert_eq!(alice.next_tx_counter(), Some(0));
        let w0 = alice.encrypt_outgoing(b"same").unwrap();
        let w1 = alice.encrypt_outgoing(b"same").unwrap();
        assert_eq!(alice.next_tx_counter(), Some(2));
        // 相同明文的两条消息 nonce 与密文都不同
        assert_ne!(w0[..NONCE_LEN], w1[..NONCE_LEN]);
        assert_ne!(w0[NONCE_LEN..], w1[NONCE_LEN..]);
        // 乱序到达也可以接受
        assert_eq!(bob.decrypt_incoming(&w1).unwrap(), b"same");
        assert_eq!(bob.decrypt_incoming(&w0).unwrap(), b"same");
    }

    #[test]
    fn test_out_of_order_calls_fail() {
        let mut manager = SecurityManager::default();
        assert!(matches!(
            manager.encrypt_outgoing(b"x"),
            Err(Error::KeyAgreement(KeyAgreementError::NoSession))
        ));
        assert!(matches!(
            manager.decrypt_incoming(&[0u8; 32]),
            Err(Error::KeyAgreement(KeyAgreementError::NoSession))
        ));
        let g = manager.curve.to_affine(manager.curve.generator()).unwrap();
        assert!(matches!(
            manager.complete_key_agreement(&g),
            Err(Error::KeyAgreement(KeyAgreementError::NotStarted))
        ));
        assert_eq!(manager.public_key_b64(), None);
    }

    #[test]
    fn test_invalid_peer_points_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut manager = SecurityManager::default();
        let own = manager.begin_key_agreement_with_rng(&mut rng).unwrap();

        assert!(matches!(
            manager.complete_key_agreement_sec1(&[SEC1_INFINITY]),
            Err(Error::KeyAgreement(KeyAgreementError::PointAtInfinity))
        ));
        let off_curve = AffinePoint {
            x: own.x,
            y: own.y.add_mod(&U256::ONE, manager.curve.p()),
        };
        assert!(matches!(
            manager.complete_key_agreement(&off_curve),
            Err(Error::KeyAgreement(KeyAgreementError::NotOnCurve))
        ));
        assert!(matches!(
            manager.complete_key_agreement(&own),
            Err(Error::KeyAgreement(KeyAgreementError::ReflectedPublicKey))
        ));
        assert!(matches!(
            manager.complete_key_agreement_sec1(&[0x04; 10]),
            Err(Error::Format(_))
        ));
        let mut off_curve_sec1 = own.to_sec1_bytes();
        off_curve_sec1[64] ^= 1;
        assert!(matches!(
            manager.parse_peer_sec1(&off_curve_sec1),
            Err(Error::KeyAgreement(KeyAgreementError::NotOnCurve))
        ));
        assert_eq!(manager.parse_peer_sec1(&own.to_sec1_bytes()).unwrap(), own);
        assert!(manager.is_awaiting_peer());
        // 失败不影响后续正常协商
        assert!(!manager.is_established());
    }

    #[test]
    fn test_tampering_and_reflection() {
        let (alice, bob) = pair(4);
        let wire = alice.encrypt_outgoing(b"payload").unwrap();

        for i in NONCE_LEN..wire.len() {
            let mut tampered = wire.clone();
            tampered[i] ^= 0x80;
            assert!(bob.decrypt_incoming(&tampered).unwrap_err().is_authentication_failure());
        }
        // 篡改计数器同样无法通过认证
        let mut tampered = wire.clone();
        tampered[NONCE_LEN - 1] ^= 1;
        assert!(bob.decrypt_incoming(&tampered).unwrap_err().is_authentication_failure());

        // 方向字节被改成接收方自己的方向，仍按认证失败处理
        let mut tampered = wire.clone();
        tampered[0] ^= 1;
        assert_eq!(tampered[0], bob.direction().unwrap());
        assert!(bob.decrypt_incoming(&tampered).unwrap_err().is_authentication_failure());

        // 自己发出的消息被回送
        assert!(matches!(alice.decrypt_incoming(&wire), Err(Error::Reflected)));
        // 太短
        assert!(matches!(
            bob.decrypt_incoming(&wire[..NONCE_LEN + 4]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_replay_rejected_after_authentication() {
        let (alice, bob) = pair(5);
        let wire = alice.encrypt_outgoing(b"once").unwrap();
        assert_eq!(bob.decrypt_incoming(&wire).unwrap(), b"once");
        assert!(matches!(bob.decrypt_incoming(&wire), Err(Error::Replay(0))));
    }

    #[test]
    fn test_nonce_exhaustion() {
        let (alice, bob) = pair(6);
        alice.set_tx_counter(u64::MAX - 1);
        let last = alice.encrypt_outgoing(b"last").unwrap();
        assert_eq!(bob.decrypt_incoming(&last).unwrap(), b"last");
        assert!(matches!(alice.encrypt_outgoing(b"more"), Err(Error::NonceExhausted)));
        assert!(matches!(alice.encrypt_outgoing(b"more"), Err(Error::NonceExhausted)));
    }

    #[test]
    fn test_concurrent_senders_never_share_a_nonce() {
        let (alice, bob) = pair(7);
        let alice = Arc::new(alice);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alice = Arc::clone(&alice);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| alice.encrypt_outgoing(b"x").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut wires: Vec<Vec<u8>> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        let nonces: std::collections::HashSet<_> =
            wires.iter().map(|w| w[..NONCE_LEN].to_vec()).collect();
        assert_eq!(nonces.len(), 200);

        // 按计数器顺序投递，避免超出防重放窗口
        wires.sort_by(|a, b| a[..NONCE_LEN].cmp(&b[..NONCE_LEN]));
        for wire in &wires {
            assert_eq!(bob.decrypt_incoming(wire).unwrap(), b"x");
        }
        assert_eq!(alice.next_tx_counter(), Some(200));
    }

    #[test]
    fn test_end_session_clears_state() {
        let (mut alice, bob) = pair(8);
        let wire = bob.encrypt_outgoing(b"late").unwrap();
        alice.end_session();
        assert!(!alice.is_established());
        assert_eq!(alice.public_key(), None);
        assert!(matches!(
            alice.decrypt_incoming(&wire),
            Err(Error::KeyAgreement(KeyAgreementError::NoSession))
        ));
    }

    #[test]
    fn test_new_handshake_yields_new_key() {
        let mut rng = StdRng::seed_from_u64(99);
        let (mut alice, mut bob) = pair(9);
        let old = alice.encrypt_outgoing(b"old").unwrap();

        let a_pub = alice.begin_key_agreement_with_rng(&mut rng).unwrap();
        let b_pub = bob.begin_key_agreement_with_rng(&mut rng).unwrap();
        alice.complete_key_agreement_b64(&b_pub.to_base64()).unwrap();
        bob.complete_key_agreement_sec1(&a_pub.to_sec1_bytes()).unwrap();

        assert!(bob.decrypt_incoming(&old).is_err());
        let wire = alice.encrypt_outgoing(b"new").unwrap();
        assert_eq!(bob.decrypt_incoming(&wire).unwrap(), b"new");
    }

    #[test]
    fn test_secrets_are_redacted() {
        let key = SessionKey::derive(&U256::from(7)).unwrap();
        assert_eq!(format!("{key:?}"), "SessionKey(<redacted>)");
        let (alice, _) = pair(10);
        assert!(format!("{alice:?}").contains("established: true"));
    }

    #[test]
    fn test_session_key_is_hkdf_of_x() {
        let x = U256::from_be_hex("7cf27b188d034f7e8a52380304b51ac3c08969e277f21b35a60b48fc47669978")
            .unwrap();
        let key = SessionKey::derive(&x).unwrap();

        let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), &x.to_be_bytes());
        let mut expected = [0u8; KEY_SIZE];
        hk.expand(KDF_INFO, &mut expected).unwrap();
        assert_eq!(key.as_bytes(), &expected);
        // 原始坐标字节不会直接作为密钥
        assert_ne!(&key.as_bytes()[..], &x.to_be_bytes()[16..]);
    }
}

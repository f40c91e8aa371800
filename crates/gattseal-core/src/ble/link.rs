//! 安全链路：把 `SecurityManager` 接到外部传输层上
//!
//! 传输层（扫描、连接、GATT 读写）由调用方实现 `FrameTransport`，
//! 收到的帧与连接状态变化通过 `on_frame_received` /
//! `on_connection_state_changed` 交给 `SecureLink`。
//!
//! 握手规则：
//! - 收到 `Handshake` 时，若本端没有在等待对端公钥，先回送 `HandshakeReply`
//! - `HandshakeReply` 只在等待对端公钥时接受，否则丢弃
//! - 与当前会话对端公钥相同的 `Handshake` 视为重复帧，直接丢弃
//! - 携带本端公钥的 `Handshake` 是回送的帧，按错误处理

use async_trait::async_trait;
use log::{debug, warn};

use crate::ble::gatt::{Frame, max_plaintext_len};
use crate::config::LinkConfig;
use crate::crypto::SecurityManager;
use crate::error::{Error, KeyAgreementError, Result};
use crate::logging::SecurityEvent;

/// 外部传输层：一次写入/通知发送一个完整帧
#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn send_frame(&self, frame: &[u8]) -> anyhow::Result<()>;
}

/// 传输层上报的连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    WriteFailed,
}

pub struct SecureLink<T> {
    transport: T,
    manager: SecurityManager,
    config: LinkConfig,
}

impl<T: FrameTransport> SecureLink<T> {
    pub fn new(transport: T, config: LinkConfig) -> Self {
        Self {
            transport,
            manager: SecurityManager::from_config(&config),
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn manager(&self) -> &SecurityManager {
        &self.manager
    }

    pub fn is_established(&self) -> bool {
        self.manager.is_established()
    }

    /// 单帧可携带的最大明文长度
    pub fn max_message_len(&self) -> usize {
        max_plaintext_len(self.config.max_frame_len, self.config.tag_len)
    }

    /// 主动发起握手：生成新的密钥对并发送公钥
    pub async fn start_handshake(&mut self) -> Result<()> {
        let public = self.manager.begin_key_agreement()?;
        let sec1 = public.to_sec1_bytes();
        self.send_raw(&Frame::Handshake(&sec1).encode()).await
    }

    /// 加密并发送一条消息
    pub async fn send(&self, plaintext: &[u8]) -> Result<()> {
        let max = self.max_message_len();
        if plaintext.len() > max {
            return Err(Error::FrameTooLarge {
                len: plaintext.len(),
                max,
            });
        }
        let wire = self.manager.encrypt_outgoing(plaintext)?;
        self.send_raw(&Frame::Data(&wire).encode()).await
    }

    /// 处理收到的一帧
    ///
    /// 握手帧返回 `Ok(None)`，数据帧返回解密后的明文。
    pub async fn on_frame_received(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        if bytes.len() > self.config.max_frame_len {
            SecurityEvent::FrameRejected { len: bytes.len() }.emit();
            return Err(Error::FrameTooLarge {
                len: bytes.len(),
                max: self.config.max_frame_len,
            });
        }

        match Frame::decode(bytes)? {
            Frame::Handshake(peer) => {
                let peer = self.manager.parse_peer_sec1(peer)?;
                if self.manager.public_key() == Some(&peer) {
                    SecurityEvent::KeyAgreementFailed.emit();
                    return Err(KeyAgreementError::ReflectedPublicKey.into());
                }
                if self.manager.peer_public_key() == Some(&peer) {
                    debug!("Duplicate handshake frame ignored");
                    return Ok(None);
                }
                if !self.manager.is_awaiting_peer() {
                    debug!("Peer initiated key agreement, replying with our public key");
                    let public = self.manager.begin_key_agreement()?;
                    let sec1 = public.to_sec1_bytes();
                    self.send_raw(&Frame::HandshakeReply(&sec1).encode()).await?;
                }
                self.manager.complete_key_agreement(&peer)?;
                Ok(None)
            }
            Frame::HandshakeReply(peer) => {
                let peer = self.manager.parse_peer_sec1(peer)?;
                if !self.manager.is_awaiting_peer() {
                    debug!("Unsolicited handshake reply ignored");
                    return Ok(None);
                }
                self.manager.complete_key_agreement(&peer)?;
                Ok(None)
            }
            Frame::Data(wire) => self.manager.decrypt_incoming(wire).map(Some),
        }
    }

    pub fn on_connection_state_changed(&mut self, state: ConnectionState) {
        SecurityEvent::TransportState(state).emit();
        match state {
            ConnectionState::Disconnected => self.manager.end_session(),
            ConnectionState::WriteFailed => {
                warn!("Transport reported a failed write, session kept");
            }
            ConnectionState::Connected => {}
        }
    }

    async fn send_raw(&self, frame: &[u8]) -> Result<()> {
        if frame.len() > self.config.max_frame_len {
            return Err(Error::FrameTooLarge {
                len: frame.len(),
                max: self.config.max_frame_len,
            });
        }
        self.transport
            .send_frame(frame)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{FRAME_DATA, FRAME_HANDSHAKE, FRAME_HANDSHAKE_REPLY, HANDSHAKE_FRAME_LEN};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        frames: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn take(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut *self.frames.lock().unwrap())
        }
    }

    #[async_trait]
    impl FrameTransport for RecordingTransport {
        async fn send_frame(&self, frame: &[u8]) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("characteristic write rejected");
            }
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    fn link() -> SecureLink<RecordingTransport> {
        SecureLink::new(RecordingTransport::default(), LinkConfig::default())
    }

    /// 在两端之间转发帧直到双方都不再发送，返回转发轮数
    async fn exchange_until_quiet(
        a: &mut SecureLink<RecordingTransport>,
        b: &mut SecureLink<RecordingTransport>,
    ) -> usize {
        let mut rounds = 0;
        loop {
            let from_a = a.transport().take();
            let from_b = b.transport().take();
            if from_a.is_empty() && from_b.is_empty() {
                return rounds;
            }
            rounds += 1;
            assert!(rounds <= 10, "handshake frames kept flowing");
            for frame in from_a {
                let _ = b.on_frame_received(&frame).await;
            }
            for frame in from_b {
                let _ = a.on_frame_received(&frame).await;
            }
        }
    }

    async fn connected_pair() -> (SecureLink<RecordingTransport>, SecureLink<RecordingTransport>) {
        let mut a = link();
        let mut b = link();
        a.start_handshake().await.unwrap();
        for frame in a.transport().take() {
            assert!(b.on_frame_received(&frame).await.unwrap().is_none());
        }
        for frame in b.transport().take() {
            assert!(a.on_frame_received(&frame).await.unwrap().is_none());
        }
        (a, b)
    }

    #[tokio::test]
    async fn test_handshake_over_frames() {
        let mut a = link();
        a.start_handshake().await.unwrap();
        let sent = a.transport().take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), HANDSHAKE_FRAME_LEN);
        assert_eq!(sent[0][0], FRAME_HANDSHAKE);

        let mut b = link();
        b.on_frame_received(&sent[0]).await.unwrap();
        assert!(b.is_established());
        let reply = b.transport().take();
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].len(), HANDSHAKE_FRAME_LEN);
        assert_eq!(reply[0][0], FRAME_HANDSHAKE_REPLY);

        a.on_frame_received(&reply[0]).await.unwrap();
        assert!(a.is_established());
        // A 只完成协商，不再回送
        assert!(a.transport().take().is_empty());
    }

    #[tokio::test]
    async fn test_redelivered_handshake_frames_are_ignored() {
        let mut a = link();
        let mut b = link();
        a.start_handshake().await.unwrap();
        let init = a.transport().take().remove(0);
        b.on_frame_received(&init).await.unwrap();
        let reply = b.transport().take().remove(0);
        a.on_frame_received(&reply).await.unwrap();

        // 传输层重复投递两种握手帧
        assert!(b.on_frame_received(&init).await.unwrap().is_none());
        assert!(a.on_frame_received(&reply).await.unwrap().is_none());
        // 本端自己的发起帧被回送
        assert!(matches!(
            a.on_frame_received(&init).await,
            Err(Error::KeyAgreement(KeyAgreementError::ReflectedPublicKey))
        ));
        assert!(a.is_established());
        assert_eq!(exchange_until_quiet(&mut a, &mut b).await, 0);

        a.send(b"still here").await.unwrap();
        let frame = a.transport().take().remove(0);
        assert_eq!(b.on_frame_received(&frame).await.unwrap().unwrap(), b"still here");
    }

    #[tokio::test]
    async fn test_stale_handshake_does_not_start_a_loop() {
        let (mut a, mut b) = connected_pair().await;

        // A 重新协商，旧的发起帧在之后又被投递给 B
        a.start_handshake().await.unwrap();
        let first_rekey = a.transport().take();
        a.start_handshake().await.unwrap();
        for frame in &first_rekey {
            b.on_frame_received(frame).await.unwrap();
        }
        assert!(exchange_until_quiet(&mut a, &mut b).await <= 2);
        assert!(a.transport().take().is_empty());
        assert!(b.transport().take().is_empty());
    }

    #[tokio::test]
    async fn test_rekey_and_simultaneous_start() {
        let (mut a, mut b) = connected_pair().await;
        a.start_handshake().await.unwrap();
        assert_eq!(exchange_until_quiet(&mut a, &mut b).await, 2);
        assert!(a.is_established() && b.is_established());
        assert_eq!(a.manager().peer_public_key(), b.manager().public_key());

        // 双方同时发起：各自用对端的发起帧完成协商，不再回送
        let mut a = link();
        let mut b = link();
        a.start_handshake().await.unwrap();
        b.start_handshake().await.unwrap();
        assert_eq!(exchange_until_quiet(&mut a, &mut b).await, 1);
        b.send(b"both").await.unwrap();
        let frame = b.transport().take().remove(0);
        assert_eq!(a.on_frame_received(&frame).await.unwrap().unwrap(), b"both");
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (mut a, mut b) = connected_pair().await;

        a.send(b"ping").await.unwrap();
        let frame = a.transport().take().remove(0);
        assert_eq!(frame[0], FRAME_DATA);
        assert_eq!(b.on_frame_received(&frame).await.unwrap().unwrap(), b"ping");

        b.send(b"pong").await.unwrap();
        let frame = b.transport().take().remove(0);
        assert_eq!(a.on_frame_received(&frame).await.unwrap().unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_frame_size_enforced() {
        let (a, mut b) = connected_pair().await;
        assert_eq!(a.max_message_len(), 244 - 22);

        a.send(&vec![0u8; a.max_message_len()]).await.unwrap();
        let frame = a.transport().take().remove(0);
        assert_eq!(frame.len(), 244);
        assert!(b.on_frame_received(&frame).await.unwrap().is_some());

        assert!(matches!(
            a.send(&vec![0u8; a.max_message_len() + 1]).await,
            Err(Error::FrameTooLarge { .. })
        ));
        assert!(matches!(
            b.on_frame_received(&vec![FRAME_DATA; 245]).await,
            Err(Error::FrameTooLarge { len: 245, max: 244 })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_tears_down_session() {
        let (mut a, _b) = connected_pair().await;
        a.on_connection_state_changed(ConnectionState::WriteFailed);
        assert!(a.is_established());
        a.on_connection_state_changed(ConnectionState::Disconnected);
        assert!(!a.is_established());
        assert!(matches!(
            a.send(b"late").await,
            Err(Error::KeyAgreement(KeyAgreementError::NoSession))
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let transport = RecordingTransport {
            fail: true,
            ..Default::default()
        };
        let mut link = SecureLink::new(transport, LinkConfig::default());
        assert!(matches!(link.start_handshake().await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_malformed_frames_rejected() {
        let mut a = link();
        assert!(matches!(
            a.on_frame_received(&[]).await,
            Err(Error::Format(_))
        ));
        assert!(matches!(
            a.on_frame_received(&[0x09, 1, 2]).await,
            Err(Error::Format(_))
        ));
        // 没有会话时收到数据帧
        assert!(matches!(
            a.on_frame_received(&[FRAME_DATA; 40]).await,
            Err(Error::KeyAgreement(KeyAgreementError::NoSession))
        ));
        // 对端发来无穷远点或格式错误的公钥：先校验，不回送本端公钥
        assert!(matches!(
            a.on_frame_received(&[FRAME_HANDSHAKE, 0x00]).await,
            Err(Error::KeyAgreement(KeyAgreementError::PointAtInfinity))
        ));
        assert!(matches!(
            a.on_frame_received(&[FRAME_HANDSHAKE, 0x04, 1, 2]).await,
            Err(Error::Format(_))
        ));
        assert!(a.transport().take().is_empty());
        assert!(a.manager().public_key().is_none());
    }
}

//! BLE 传输适配
//!
//! - **gatt**: 服务/特征 UUID 与帧格式
//! - **link**: 驱动安全层的 `SecureLink` 与外部传输接口

pub mod gatt;
pub mod link;

pub use gatt::{
    FRAME_DATA, FRAME_HANDSHAKE, FRAME_HANDSHAKE_REPLY, Frame, NOTIFY_CHAR_UUID, SERVICE_UUID,
    WRITE_CHAR_UUID, parse_uuid,
};
pub use link::{ConnectionState, FrameTransport, SecureLink};

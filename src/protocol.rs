//! Wire framing for the single duplex device connection
//!
//! Every message is one frame: a one-byte type tag followed by a
//! type-specific payload.
//!
//! ```text
//! ┌────────┬──────────────────────────────────────────────┐
//! │ Byte 0 │ Byte 1..N                                    │
//! │ Type   │ Payload                                      │
//! ├────────┼──────────────────────────────────────────────┤
//! │ 0x01   │ UTF-8 text / log line                        │
//! │ 0x02   │ audio (codec-specific)                       │
//! │ 0x03   │ RFID event: empty (removed) or UID (present) │
//! │ 0x04   │ ASCII control command, e.g. OTA=<url>        │
//! │ 0x05   │ ping (empty)                                 │
//! │ 0x06   │ pong (empty)                                 │
//! └────────┴──────────────────────────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Largest RFID UID the device forwards.
pub const MAX_UID_LEN: usize = 10;

/// Prefix of the firmware-update control command.
const OTA_PREFIX: &str = "OTA=";

/// Frame type tag (byte 0 of every frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Text = 0x01,
    Audio = 0x02,
    Rfid = 0x03,
    Control = 0x04,
    Ping = 0x05,
    Pong = 0x06,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Text),
            0x02 => Ok(Self::Audio),
            0x03 => Ok(Self::Rfid),
            0x04 => Ok(Self::Control),
            0x05 => Ok(Self::Ping),
            0x06 => Ok(Self::Pong),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// One frame of the wire protocol.
///
/// Frames are ephemeral: built per receive or send event and dropped
/// once dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Split a raw inbound message into type and payload.
    ///
    /// The payload is copied once so the caller's receive buffer can be
    /// reused immediately.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, rest) = raw.split_first().ok_or(ProtocolError::Empty)?;
        let frame_type = FrameType::try_from(tag)?;
        Ok(Self {
            frame_type,
            payload: Bytes::copy_from_slice(rest),
        })
    }

    /// Serialize to the wire layout `[type, payload...]`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.payload.len());
        buf.put_u8(self.frame_type.as_u8());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn pong() -> Self {
        Self::new(FrameType::Pong, Bytes::new())
    }

    pub fn ping() -> Self {
        Self::new(FrameType::Ping, Bytes::new())
    }

    pub fn text(text: &str) -> Self {
        Self::new(FrameType::Text, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn audio(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Audio, payload)
    }

    pub fn control(command: &str) -> Self {
        Self::new(FrameType::Control, Bytes::copy_from_slice(command.as_bytes()))
    }

    /// RFID tag event. `None` means the tag was removed.
    pub fn rfid(uid: Option<&[u8]>) -> Result<Self, ProtocolError> {
        match uid {
            None => Ok(Self::new(FrameType::Rfid, Bytes::new())),
            Some(uid) if uid.len() > MAX_UID_LEN => Err(ProtocolError::UidTooLong(uid.len())),
            Some(uid) => Ok(Self::new(FrameType::Rfid, Bytes::copy_from_slice(uid))),
        }
    }

    /// Device version announcement sent after each fresh connection.
    pub fn version(hardware: &str, software: &str) -> Self {
        Self::control(&format!("{},{}", hardware, software))
    }
}

/// Control command carried by a `0x04` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Firmware update available at the given URL
    Ota { url: String },
    /// Anything this core does not act on
    Unrecognized(String),
}

impl ControlCommand {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidText)?;
        let text = text.trim_end_matches(['\0', '\r', '\n']);
        match text.strip_prefix(OTA_PREFIX) {
            Some(url) if !url.is_empty() => Ok(Self::Ota { url: url.to_string() }),
            _ => Ok(Self::Unrecognized(text.to_string())),
        }
    }
}

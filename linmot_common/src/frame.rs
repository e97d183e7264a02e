//! Frame codec shared by the cyclic and the register channel.
//!
//! Wire format (all integers little-endian):
//! ```text
//! ┌─────────┬──────────┬────────────┬────────────┬─────────────┬───────────┐
//! │ Version │ Type     │ Sequence   │ Length     │ Payload     │ CRC-16    │
//! │ (1B)    │ (1B)     │ (2B LE)    │ (2B LE)    │ (Length B)  │ (2B LE)   │
//! │ = 2     │ bit7=CRC │            │            │             │ optional  │
//! └─────────┴──────────┴────────────┴────────────┴─────────────┴───────────┘
//! ```
//! The CRC (CRC-16/MODBUS over header and payload) is present only when bit 7
//! of the type byte is set.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::const_assert;
use thiserror::Error;

use crate::linudp::{ControlRequest, StatusResponse};
use crate::rstalk::{RegisterRead, RegisterReply, RegisterWrite};
use crate::wire::{WireRead, WireWrite};

pub const PROTOCOL_VERSION: u8 = 2;
pub const HEADER_LEN: usize = 6;
pub const CHECKSUM_LEN: usize = 2;
pub const MAX_PAYLOAD: usize = 256;
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD + CHECKSUM_LEN;

/// Type-byte bit announcing a CRC trailer.
pub const CHECKSUM_FLAG: u8 = 0x80;

const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

const_assert!(MAX_PAYLOAD <= u16::MAX as usize);
// A full status response must fit in one frame.
const_assert!(8 + 2 + 2 + 4 + 4 + 2 + 2 + 2 + 16 + 8 <= MAX_PAYLOAD);

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Header, length or payload structure check failed.
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: &'static str },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch (expected {expected:#06x}, got {actual:#06x})")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

// ─── Messages ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ControlRequest = 0x01,
    StatusResponse = 0x02,
    RegisterRead = 0x10,
    RegisterWrite = 0x11,
    RegisterReply = 0x12,
}

impl MessageType {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ControlRequest),
            0x02 => Some(Self::StatusResponse),
            0x10 => Some(Self::RegisterRead),
            0x11 => Some(Self::RegisterWrite),
            0x12 => Some(Self::RegisterReply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Control(ControlRequest),
    Status(StatusResponse),
    RegisterRead(RegisterRead),
    RegisterWrite(RegisterWrite),
    RegisterReply(RegisterReply),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Control(_) => MessageType::ControlRequest,
            Self::Status(_) => MessageType::StatusResponse,
            Self::RegisterRead(_) => MessageType::RegisterRead,
            Self::RegisterWrite(_) => MessageType::RegisterWrite,
            Self::RegisterReply(_) => MessageType::RegisterReply,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            Self::Control(m) => m.wire_len(),
            Self::Status(m) => m.wire_len(),
            Self::RegisterRead(m) => m.wire_len(),
            Self::RegisterWrite(m) => m.wire_len(),
            Self::RegisterReply(m) => m.wire_len(),
        }
    }

    fn write_payload<B: BufMut>(&self, dst: &mut B) {
        match self {
            Self::Control(m) => m.write_to(dst),
            Self::Status(m) => m.write_to(dst),
            Self::RegisterRead(m) => m.write_to(dst),
            Self::RegisterWrite(m) => m.write_to(dst),
            Self::RegisterReply(m) => m.write_to(dst),
        }
    }

    fn read_payload(message_type: MessageType, src: &mut &[u8]) -> Result<Self, FrameError> {
        Ok(match message_type {
            MessageType::ControlRequest => Self::Control(ControlRequest::read_from(src)?),
            MessageType::StatusResponse => Self::Status(StatusResponse::read_from(src)?),
            MessageType::RegisterRead => Self::RegisterRead(RegisterRead::read_from(src)?),
            MessageType::RegisterWrite => Self::RegisterWrite(RegisterWrite::read_from(src)?),
            MessageType::RegisterReply => Self::RegisterReply(RegisterReply::read_from(src)?),
        })
    }
}

/// One datagram: channel sequence number plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u16,
    pub message: Message,
}

impl Frame {
    pub fn new(sequence: u16, message: Message) -> Self {
        Self { sequence, message }
    }
}

// ─── Codec ──────────────────────────────────────────────────────────

/// Stateless encoder/decoder.
///
/// `checksum` selects whether encoded frames carry the CRC trailer. Decoding
/// follows the flag in each received frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    checksum: bool,
}

impl FrameCodec {
    pub const fn new(checksum: bool) -> Self {
        Self { checksum }
    }

    pub const fn checksum(&self) -> bool {
        self.checksum
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, FrameError> {
        let mut dst = BytesMut::with_capacity(MAX_FRAME_LEN);
        self.encode_into(frame, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Append the encoded frame to `dst`, returning the number of bytes written.
    /// Nothing is written if the payload is too large.
    pub fn encode_into(&self, frame: &Frame, dst: &mut BytesMut) -> Result<usize, FrameError> {
        let payload_len = frame.message.payload_len();
        if payload_len > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD,
            });
        }

        let mut type_byte = frame.message.message_type() as u8;
        if self.checksum {
            type_byte |= CHECKSUM_FLAG;
        }

        let start = dst.len();
        let total = HEADER_LEN + payload_len + if self.checksum { CHECKSUM_LEN } else { 0 };
        dst.reserve(total);
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(type_byte);
        dst.put_u16_le(frame.sequence);
        dst.put_u16_le(payload_len as u16);
        frame.message.write_payload(dst);

        if self.checksum {
            let crc = CRC16.checksum(&dst[start..]);
            dst.put_u16_le(crc);
        }

        debug_assert_eq!(dst.len() - start, total);
        Ok(total)
    }

    /// Decode one datagram. The datagram must contain exactly one frame.
    pub fn decode(&self, src: &[u8]) -> Result<Frame, FrameError> {
        if src.len() < HEADER_LEN {
            return Err(FrameError::MalformedFrame {
                reason: "shorter than header",
            });
        }

        let version = src[0];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let type_byte = src[1];
        let message_type =
            MessageType::from_u8(type_byte & !CHECKSUM_FLAG).ok_or(FrameError::MalformedFrame {
                reason: "unknown message type",
            })?;
        let has_checksum = type_byte & CHECKSUM_FLAG != 0;

        let sequence = u16::from_le_bytes([src[2], src[3]]);
        let payload_len = usize::from(u16::from_le_bytes([src[4], src[5]]));
        if payload_len > MAX_PAYLOAD {
            return Err(FrameError::MalformedFrame {
                reason: "declared length exceeds maximum payload",
            });
        }

        let trailer = if has_checksum { CHECKSUM_LEN } else { 0 };
        if src.len() != HEADER_LEN + payload_len + trailer {
            return Err(FrameError::MalformedFrame {
                reason: "declared length does not match datagram",
            });
        }

        let body_end = HEADER_LEN + payload_len;
        if has_checksum {
            let expected = u16::from_le_bytes([src[body_end], src[body_end + 1]]);
            let actual = CRC16.checksum(&src[..body_end]);
            if expected != actual {
                return Err(FrameError::ChecksumMismatch { expected, actual });
            }
        }

        let mut payload = &src[HEADER_LEN..body_end];
        let message = Message::read_payload(message_type, &mut payload)?;
        if !payload.is_empty() {
            return Err(FrameError::MalformedFrame {
                reason: "trailing bytes after payload",
            });
        }

        Ok(Frame { sequence, message })
    }
}

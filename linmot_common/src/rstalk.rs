//! Register (configuration) channel payloads.
//!
//! Registers are addressed by a 16-bit index and an 8-bit subindex. Values
//! travel tagged with their [`DataType`] so either side can detect a type
//! mismatch. A reply carries a [`RegisterStatus`]; on success it also carries
//! the register value (the value read, or the value now stored after a write).

use core::fmt;
use core::str::FromStr;

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::FrameError;
use crate::wire::{WireRead, WireWrite, ensure_remaining};

/// Longest string value a register can hold.
pub const MAX_STR_LEN: usize = 64;

// ─── Addressing ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegisterAddress {
    pub index: u16,
    pub subindex: u8,
}

impl RegisterAddress {
    pub const fn new(index: u16, subindex: u8) -> Self {
        Self { index, subindex }
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}/{}", self.index, self.subindex)
    }
}

impl WireRead for RegisterAddress {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        ensure_remaining(src, 3, "register address")?;
        Ok(Self {
            index: u16::read_from(src)?,
            subindex: u8::read_from(src)?,
        })
    }
}

impl WireWrite for RegisterAddress {
    fn wire_len(&self) -> usize {
        3
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.index.write_to(dst);
        self.subindex.write_to(dst);
    }
}

// ─── Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    I8 = 0,
    U8 = 1,
    I16 = 2,
    U16 = 3,
    I32 = 4,
    U32 = 5,
    F32 = 6,
    Str = 7,
}

impl DataType {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::I8),
            1 => Some(Self::U8),
            2 => Some(Self::I16),
            3 => Some(Self::U16),
            4 => Some(Self::I32),
            5 => Some(Self::U32),
            6 => Some(Self::F32),
            7 => Some(Self::Str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccessMode {
    ReadOnly = 0,
    ReadWrite = 1,
}

/// A typed register value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegisterValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    Str(String),
}

impl RegisterValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::I8(_) => DataType::I8,
            Self::U8(_) => DataType::U8,
            Self::I16(_) => DataType::I16,
            Self::U16(_) => DataType::U16,
            Self::I32(_) => DataType::I32,
            Self::U32(_) => DataType::U32,
            Self::F32(_) => DataType::F32,
            Self::Str(_) => DataType::Str,
        }
    }

    /// Integer view of the value, if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::U8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::F32(_) | Self::Str(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|v| u32::try_from(v).ok())
    }

    /// Convert an integer into a value of `data_type`, if it fits.
    pub fn from_i64(data_type: DataType, v: i64) -> Option<Self> {
        Some(match data_type {
            DataType::I8 => Self::I8(i8::try_from(v).ok()?),
            DataType::U8 => Self::U8(u8::try_from(v).ok()?),
            DataType::I16 => Self::I16(i16::try_from(v).ok()?),
            DataType::U16 => Self::U16(u16::try_from(v).ok()?),
            DataType::I32 => Self::I32(i32::try_from(v).ok()?),
            DataType::U32 => Self::U32(u32::try_from(v).ok()?),
            DataType::F32 => Self::F32(v as f32),
            DataType::Str => return None,
        })
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I8(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl WireRead for RegisterValue {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        let tag = u8::read_from(src)?;
        let data_type = DataType::from_u8(tag).ok_or(FrameError::MalformedFrame {
            reason: "unknown register data type",
        })?;
        Ok(match data_type {
            DataType::I8 => Self::I8(i8::read_from(src)?),
            DataType::U8 => Self::U8(u8::read_from(src)?),
            DataType::I16 => Self::I16(i16::read_from(src)?),
            DataType::U16 => Self::U16(u16::read_from(src)?),
            DataType::I32 => Self::I32(i32::read_from(src)?),
            DataType::U32 => Self::U32(u32::read_from(src)?),
            DataType::F32 => Self::F32(f32::read_from(src)?),
            DataType::Str => {
                let len = usize::from(u8::read_from(src)?);
                ensure_remaining(src, len, "string value")?;
                let (text, rest) = src.split_at(len);
                let text = core::str::from_utf8(text).map_err(|_| FrameError::MalformedFrame {
                    reason: "string value is not UTF-8",
                })?;
                *src = rest;
                Self::Str(text.to_owned())
            }
        })
    }
}

impl WireWrite for RegisterValue {
    fn wire_len(&self) -> usize {
        1 + match self {
            Self::I8(_) | Self::U8(_) => 1,
            Self::I16(_) | Self::U16(_) => 2,
            Self::I32(_) | Self::U32(_) | Self::F32(_) => 4,
            Self::Str(s) => 1 + s.len(),
        }
    }

    /// Strings longer than 255 bytes cannot be framed; the codec rejects
    /// them with `PayloadTooLarge` before this is called.
    fn write_to<B: BufMut>(&self, dst: &mut B) {
        (self.data_type() as u8).write_to(dst);
        match self {
            Self::I8(v) => v.write_to(dst),
            Self::U8(v) => v.write_to(dst),
            Self::I16(v) => v.write_to(dst),
            Self::U16(v) => v.write_to(dst),
            Self::I32(v) => v.write_to(dst),
            Self::U32(v) => v.write_to(dst),
            Self::F32(v) => v.write_to(dst),
            Self::Str(s) => {
                let len = s.len().min(usize::from(u8::MAX));
                dst.put_u8(len as u8);
                dst.put_slice(&s.as_bytes()[..len]);
            }
        }
    }
}

// ─── Status ─────────────────────────────────────────────────────────

/// Status code in a register reply. Unknown codes are kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterStatus(pub u8);

impl RegisterStatus {
    pub const OK: Self = Self(0);
    pub const UNKNOWN_REGISTER: Self = Self(1);
    pub const READ_ONLY: Self = Self(2);
    pub const TYPE_MISMATCH: Self = Self(3);
    pub const OUT_OF_RANGE: Self = Self(4);
    pub const BUSY: Self = Self(5);

    pub const fn is_ok(&self) -> bool {
        self.0 == Self::OK.0
    }

    pub const fn name(&self) -> &'static str {
        match self.0 {
            0 => "ok",
            1 => "unknown register",
            2 => "read only",
            3 => "type mismatch",
            4 => "out of range",
            5 => "busy",
            _ => "unknown status",
        }
    }
}

impl fmt::Display for RegisterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

// ─── Payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRead {
    pub address: RegisterAddress,
}

impl WireRead for RegisterRead {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            address: RegisterAddress::read_from(src)?,
        })
    }
}

impl WireWrite for RegisterRead {
    fn wire_len(&self) -> usize {
        self.address.wire_len()
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.address.write_to(dst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterWrite {
    pub address: RegisterAddress,
    pub value: RegisterValue,
}

impl WireRead for RegisterWrite {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            address: RegisterAddress::read_from(src)?,
            value: RegisterValue::read_from(src)?,
        })
    }
}

impl WireWrite for RegisterWrite {
    fn wire_len(&self) -> usize {
        self.address.wire_len() + self.value.wire_len()
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.address.write_to(dst);
        self.value.write_to(dst);
    }
}

/// Drive answer to a read or write. `value` is present exactly when the
/// status is OK.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterReply {
    pub address: RegisterAddress,
    pub status: RegisterStatus,
    pub value: Option<RegisterValue>,
}

impl RegisterReply {
    pub fn ok(address: RegisterAddress, value: RegisterValue) -> Self {
        Self {
            address,
            status: RegisterStatus::OK,
            value: Some(value),
        }
    }

    pub fn error(address: RegisterAddress, status: RegisterStatus) -> Self {
        Self {
            address,
            status,
            value: None,
        }
    }
}

impl WireRead for RegisterReply {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        let address = RegisterAddress::read_from(src)?;
        let status = RegisterStatus(u8::read_from(src)?);
        let value = if status.is_ok() {
            Some(RegisterValue::read_from(src)?)
        } else {
            None
        };
        Ok(Self {
            address,
            status,
            value,
        })
    }
}

impl WireWrite for RegisterReply {
    fn wire_len(&self) -> usize {
        let value_len = match (&self.value, self.status.is_ok()) {
            (Some(v), true) => v.wire_len(),
            _ => 0,
        };
        self.address.wire_len() + 1 + value_len
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.address.write_to(dst);
        self.status.0.write_to(dst);
        if self.status.is_ok()
            && let Some(value) = &self.value
        {
            value.write_to(dst);
        }
    }
}

// ─── Firmware version ───────────────────────────────────────────────

/// Firmware version, packed on the wire as `major << 16 | minor << 8 | patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub const fn from_packed(packed: u32) -> Self {
        Self {
            major: (packed >> 16) as u8,
            minor: (packed >> 8) as u8,
            patch: packed as u8,
        }
    }

    pub const fn to_packed(&self) -> u32 {
        (self.major as u32) << 16 | (self.minor as u32) << 8 | self.patch as u32
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid firmware version {0:?} (expected major.minor.patch)")]
pub struct ParseFirmwareVersionError(pub String);

impl FromStr for FirmwareVersion {
    type Err = ParseFirmwareVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseFirmwareVersionError(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u8, ParseFirmwareVersionError> {
            parts.next().ok_or_else(err)?.parse().map_err(|_| err())
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(version)
    }
}

// ─── Well-known registers ───────────────────────────────────────────

/// Catalog entry for a register with a fixed meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub address: RegisterAddress,
    pub name: &'static str,
    pub data_type: DataType,
    pub access: AccessMode,
}

pub mod registers {
    use super::{AccessMode, DataType, RegisterAddress, RegisterDescriptor};

    /// Packed firmware version (`major << 16 | minor << 8 | patch`).
    pub const FIRMWARE_VERSION: RegisterAddress = RegisterAddress::new(0x0001, 0);
    /// Device identity string.
    pub const DEVICE_ID: RegisterAddress = RegisterAddress::new(0x0002, 0);
    /// Active cyclic period [µs].
    pub const CYCLE_TIME_US: RegisterAddress = RegisterAddress::new(0x0010, 0);
    /// Shortest supported cyclic period [µs].
    pub const CYCLE_TIME_MIN_US: RegisterAddress = RegisterAddress::new(0x0011, 0);
    /// Longest supported cyclic period [µs].
    pub const CYCLE_TIME_MAX_US: RegisterAddress = RegisterAddress::new(0x0012, 0);

    pub const CATALOG: &[RegisterDescriptor] = &[
        RegisterDescriptor {
            address: FIRMWARE_VERSION,
            name: "firmware_version",
            data_type: DataType::U32,
            access: AccessMode::ReadOnly,
        },
        RegisterDescriptor {
            address: DEVICE_ID,
            name: "device_id",
            data_type: DataType::Str,
            access: AccessMode::ReadOnly,
        },
        RegisterDescriptor {
            address: CYCLE_TIME_US,
            name: "cycle_time_us",
            data_type: DataType::U32,
            access: AccessMode::ReadWrite,
        },
        RegisterDescriptor {
            address: CYCLE_TIME_MIN_US,
            name: "cycle_time_min_us",
            data_type: DataType::U32,
            access: AccessMode::ReadOnly,
        },
        RegisterDescriptor {
            address: CYCLE_TIME_MAX_US,
            name: "cycle_time_max_us",
            data_type: DataType::U32,
            access: AccessMode::ReadOnly,
        },
    ];

    pub fn lookup(address: RegisterAddress) -> Option<&'static RegisterDescriptor> {
        CATALOG.iter().find(|d| d.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_reply(reply: &RegisterReply) -> RegisterReply {
        let mut buf = Vec::new();
        reply.write_to(&mut buf);
        assert_eq!(buf.len(), reply.wire_len());
        let mut src = &buf[..];
        let decoded = RegisterReply::read_from(&mut src).unwrap();
        assert!(src.is_empty());
        decoded
    }

    #[test]
    fn reply_carries_value_only_when_ok() {
        let addr = RegisterAddress::new(0x1234, 0);
        let ok = RegisterReply::ok(addr, RegisterValue::U16(500));
        assert_eq!(roundtrip_reply(&ok), ok);

        let err = RegisterReply::error(addr, RegisterStatus::READ_ONLY);
        assert_eq!(roundtrip_reply(&err), err);
        assert_eq!(err.wire_len(), 4);
    }

    #[test]
    fn string_values_are_length_prefixed() {
        let value = RegisterValue::Str("C1250-LU".to_string());
        let mut buf = Vec::new();
        value.write_to(&mut buf);
        assert_eq!(buf[0], DataType::Str as u8);
        assert_eq!(buf[1], 8);
        assert_eq!(&buf[2..], b"C1250-LU");
    }

    #[test]
    fn string_value_rejects_invalid_utf8() {
        let data = [DataType::Str as u8, 2, 0xFF, 0xFE];
        assert!(matches!(
            RegisterValue::read_from(&mut &data[..]),
            Err(FrameError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn unknown_data_type_is_malformed() {
        let data = [0x42, 0x00];
        assert!(RegisterValue::read_from(&mut &data[..]).is_err());
    }

    #[test]
    fn value_integer_conversions() {
        assert_eq!(RegisterValue::from_i64(DataType::U16, 500), Some(RegisterValue::U16(500)));
        assert_eq!(RegisterValue::from_i64(DataType::U8, 500), None);
        assert_eq!(RegisterValue::from_i64(DataType::Str, 1), None);
        assert_eq!(RegisterValue::I16(-3).as_i64(), Some(-3));
        assert_eq!(RegisterValue::I16(-3).as_u32(), None);
        assert_eq!(RegisterValue::U32(2000).as_u32(), Some(2000));
    }

    #[test]
    fn firmware_version_packing_and_parsing() {
        let v = FirmwareVersion::from_packed(0x0006_0102);
        assert_eq!(v, FirmwareVersion::new(6, 1, 2));
        assert_eq!(v.to_packed(), 0x0006_0102);
        assert_eq!(v.to_string(), "6.1.2");
        assert_eq!("6.1.2".parse::<FirmwareVersion>().unwrap(), v);
        assert!("6.1".parse::<FirmwareVersion>().is_err());
        assert!("6.1.2.3".parse::<FirmwareVersion>().is_err());
        assert!("6.x.2".parse::<FirmwareVersion>().is_err());
        assert!(FirmwareVersion::new(5, 9, 9) < FirmwareVersion::new(6, 0, 0));
    }

    #[test]
    fn catalog_lookup() {
        let fw = registers::lookup(registers::FIRMWARE_VERSION).unwrap();
        assert_eq!(fw.access, AccessMode::ReadOnly);
        assert_eq!(fw.data_type, DataType::U32);
        assert!(registers::lookup(RegisterAddress::new(0x1234, 0)).is_none());
        assert_eq!(
            registers::lookup(registers::CYCLE_TIME_US).unwrap().access,
            AccessMode::ReadWrite
        );
    }
}

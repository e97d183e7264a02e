//! Link and motion state enums.
//!
//! All enums use `#[repr(u8)]` so snapshots can be published as plain
//! integers (e.g. through an atomic) and decoded with `from_u8`.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::linudp::ErrorCode;

// ─── Session ────────────────────────────────────────────────────────

/// Connection state of a drive session.
///
/// `Faulted` is left only through an explicit reset, which re-runs the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Handshaking = 1,
    Connected = 2,
    Faulted = 3,
}

impl ConnectionState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Disconnected),
            1 => Some(Self::Handshaking),
            2 => Some(Self::Connected),
            3 => Some(Self::Faulted),
            _ => None,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Handshaking => "HANDSHAKING",
            Self::Connected => "CONNECTED",
            Self::Faulted => "FAULTED",
        };
        f.write_str(name)
    }
}

// ─── Motion ─────────────────────────────────────────────────────────

/// Operator-facing motion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MotionState {
    /// Power stage off.
    Disabled = 0,
    /// Switch-on sequence running, waiting for Operation Enabled.
    Enabling = 1,
    /// Homing run in progress.
    Homing = 2,
    /// Enabled and idle, accepts motion commands.
    Ready = 3,
    /// Motion command in progress.
    Moving = 4,
    /// Drive or link fault. Needs acknowledge.
    Faulted = 5,
    /// Error acknowledge asserted, waiting for the drive to clear the fault.
    FaultAcknowledge = 6,
}

impl MotionState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Enabling),
            2 => Some(Self::Homing),
            3 => Some(Self::Ready),
            4 => Some(Self::Moving),
            5 => Some(Self::Faulted),
            6 => Some(Self::FaultAcknowledge),
            _ => None,
        }
    }

    /// Power stage is (or is becoming) enabled.
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabling | Self::Homing | Self::Ready | Self::Moving)
    }

    pub const fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted | Self::FaultAcknowledge)
    }
}

impl Default for MotionState {
    fn default() -> Self {
        Self::Disabled
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "DISABLED",
            Self::Enabling => "ENABLING",
            Self::Homing => "HOMING",
            Self::Ready => "READY",
            Self::Moving => "MOVING",
            Self::Faulted => "FAULTED",
            Self::FaultAcknowledge => "FAULT_ACKNOWLEDGE",
        };
        f.write_str(name)
    }
}

/// Why the motion state machine entered `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultReason {
    /// Drive reported the error bit; code from the error word if available.
    Drive(ErrorCode),
    /// Drive reported a fatal error; acknowledge will not clear it.
    DriveFatal(ErrorCode),
    /// Cyclic link lost (consecutive missed cycles).
    LinkLost,
    /// Operation Enabled not reached in time.
    EnableTimeout,
    /// Homing did not finish in time.
    HomingTimeout,
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drive(code) => write!(f, "drive error {code:?}"),
            Self::DriveFatal(code) => write!(f, "fatal drive error {code:?}"),
            Self::LinkLost => f.write_str("cyclic link lost"),
            Self::EnableTimeout => f.write_str("enable timeout"),
            Self::HomingTimeout => f.write_str("homing timeout"),
        }
    }
}

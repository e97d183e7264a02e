//! Drive link error kinds.
//!
//! Every failure a caller can see is a [`DriveError`]. Codec and transport
//! errors are local to one call; `LinkFaulted` and `IncompatibleFirmware`
//! force a session transition. [`DriveError::recovery`] tells a front end
//! whether to retry, reconnect or ask the operator for an acknowledge.

use linmot_common::config::ConfigError;
use linmot_common::frame::FrameError;
use linmot_common::rstalk::{FirmwareVersion, RegisterAddress, RegisterStatus};
use thiserror::Error;

use crate::cycle::CycleError;

/// Socket-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing arrived before the receive deadline.
    #[error("receive timed out")]
    Timeout,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Top-level drive link error.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration request unanswered after every transmission.
    #[error("request timed out after {attempts} attempts")]
    RequestTimeout { attempts: u32 },

    /// Drive refused a register access.
    #[error("register {address} rejected: {code}")]
    RegisterError {
        address: RegisterAddress,
        code: RegisterStatus,
    },

    #[error("no status frame within the cycle")]
    CycleMissed,

    #[error("cyclic link faulted")]
    LinkFaulted,

    #[error("firmware {found} below required {required}")]
    IncompatibleFirmware {
        found: FirmwareVersion,
        required: FirmwareVersion,
    },

    /// Unexpected register content during the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("session not connected")]
    NotConnected,

    #[error("session faulted, reset required")]
    SessionFaulted,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("RT setup error: {0}")]
    RtSetup(#[from] CycleError),
}

/// What a caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Transient; issuing the same call again may succeed.
    Retry,
    /// Link is gone; `reset()` and reconnect.
    Reconnect,
    /// Drive-side condition; operator acknowledge or a different request.
    Acknowledge,
    /// Not recoverable at runtime.
    Fatal,
}

impl DriveError {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Frame(_) | Self::RequestTimeout { .. } | Self::CycleMissed | Self::Cancelled => {
                Recovery::Retry
            }
            Self::Transport(TransportError::Timeout) => Recovery::Retry,
            Self::Transport(TransportError::Io(_))
            | Self::LinkFaulted
            | Self::NotConnected
            | Self::SessionFaulted => Recovery::Reconnect,
            Self::RegisterError { .. } | Self::Handshake(_) => Recovery::Acknowledge,
            Self::IncompatibleFirmware { .. } | Self::Config(_) | Self::RtSetup(_) => {
                Recovery::Fatal
            }
        }
    }

    /// Drive-reported register status, if this is a register error.
    pub fn register_status(&self) -> Option<RegisterStatus> {
        match self {
            Self::RegisterError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

//! Prelude module for common re-exports.
//!
//! ```rust
//! use linmot_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, DriveConfig, LogLevel, SharedConfig};

// ─── Wire ───────────────────────────────────────────────────────────
pub use crate::frame::{Frame, FrameCodec, FrameError, MAX_FRAME_LEN, Message, MessageType};
pub use crate::linudp::{
    Command, ControlFlags, ControlRequest, DriveState, ErrorCode, MotionCommand, RequestFlags,
    ResponseFlags, StatusFlags, StatusResponse, WarningFlags,
};
pub use crate::rstalk::{
    DataType, FirmwareVersion, RegisterAddress, RegisterRead, RegisterReply, RegisterStatus,
    RegisterValue, RegisterWrite, registers,
};
pub use crate::units::{Acceleration, Current, Position, Velocity};

// ─── State & Diagnostics ────────────────────────────────────────────
pub use crate::events::DriveEvent;
pub use crate::state::{ConnectionState, FaultReason, MotionState};

/// Default cyclic period as Duration.
pub const DEFAULT_CYCLE_TIME: Duration =
    Duration::from_micros(crate::consts::CYCLE_TIME_US as u64);

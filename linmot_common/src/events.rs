//! Diagnostic events published by the drive link.

use serde::Serialize;

use crate::rstalk::FirmwareVersion;
use crate::state::{ConnectionState, FaultReason, MotionState};

/// Structured diagnostic event. Delivered to every subscriber in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DriveEvent {
    /// No valid status frame arrived within the cycle.
    CycleMissed { cycle: u64, consecutive: u32 },
    /// Cycle wake-up latency exceeded the jitter tolerance.
    JitterExceeded {
        cycle: u64,
        latency_us: u64,
        tolerance_us: u64,
    },
    /// Miss threshold reached; raised once per link loss.
    LinkFaulted { consecutive: u32 },
    FaultEntered { reason: FaultReason },
    FaultCleared,
    MotionStateChanged { from: MotionState, to: MotionState },
    SessionStateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    HandshakeSucceeded {
        firmware: FirmwareVersion,
        device_id: String,
        cycle_time_us: u32,
    },
    HandshakeFailed { attempt: u32, reason: String },
    /// Operator command not applicable in the current motion state.
    CommandRejected {
        command: &'static str,
        state: MotionState,
    },
}

impl DriveEvent {
    /// Events that indicate a fault condition (as opposed to informational).
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::LinkFaulted { .. } | Self::FaultEntered { .. } | Self::HandshakeFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_classification() {
        assert!(DriveEvent::LinkFaulted { consecutive: 3 }.is_fault());
        assert!(!DriveEvent::FaultCleared.is_fault());
        assert!(
            !DriveEvent::CycleMissed {
                cycle: 1,
                consecutive: 1
            }
            .is_fault()
        );
    }
}

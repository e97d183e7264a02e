//! System-wide constants for the drive link.
//!
//! Single source of truth for ports, cycle bounds and channel defaults.

// ─── Network ────────────────────────────────────────────────────────

/// UDP port the drive listens on for cyclic control frames.
pub const CYCLIC_DRIVE_PORT: u16 = 0xC0D0;

/// Local UDP port the master binds for cyclic status frames.
pub const CYCLIC_LOCAL_PORT: u16 = 0xA0B0;

/// UDP port of the drive's configuration (register) service.
pub const CONFIG_PORT: u16 = 20_000;

/// Default drive address.
pub const DEFAULT_DRIVE_ADDRESS: &str = "192.168.1.100";

// ─── Cycle ──────────────────────────────────────────────────────────

/// Default cyclic period in microseconds (2 ms).
pub const CYCLE_TIME_US: u32 = 2_000;

/// Lower bound accepted in configuration.
pub const CYCLE_TIME_US_MIN: u32 = 250;

/// Upper bound accepted in configuration.
pub const CYCLE_TIME_US_MAX: u32 = 100_000;

/// Consecutive missed cycles before the link is declared faulted.
pub const MISS_THRESHOLD_DEFAULT: u32 = 3;
pub const MISS_THRESHOLD_MAX: u32 = 1_000;

/// Allowed wake-up jitter as a percentage of the period.
pub const JITTER_TOLERANCE_PERCENT_DEFAULT: u8 = 20;

// ─── Configuration channel ──────────────────────────────────────────

/// Transmissions per register request (first send included).
pub const CONFIG_ATTEMPTS_DEFAULT: u32 = 3;
pub const CONFIG_ATTEMPTS_MAX: u32 = 10;

/// Seed for the round-trip estimate [ms].
pub const INITIAL_RTT_MS_DEFAULT: u64 = 20;

/// Floor for the round-trip estimate [ms].
pub const MIN_RTT_MS_DEFAULT: u64 = 2;

/// Ceiling for a single retransmission wait [ms].
pub const MAX_BACKOFF_MS_DEFAULT: u64 = 1_000;

// ─── Handshake ──────────────────────────────────────────────────────

/// Handshake attempts before the session gives up.
pub const HANDSHAKE_ATTEMPTS_DEFAULT: u32 = 2;
pub const HANDSHAKE_ATTEMPTS_MAX: u32 = 10;

/// Oldest firmware the link can talk to.
pub const MIN_FIRMWARE_DEFAULT: &str = "6.0.0";

// ─── Motion ─────────────────────────────────────────────────────────

/// Cycles allowed for the drive to reach Operation Enabled.
pub const ENABLE_TIMEOUT_CYCLES_DEFAULT: u32 = 1_000;

/// Cycles allowed for a homing run.
pub const HOMING_TIMEOUT_CYCLES_DEFAULT: u32 = 30_000;

/// Upper bound for both step timeouts.
pub const STEP_TIMEOUT_CYCLES_MAX: u32 = 1_000_000;

/// Depth of the recent-cycle fault history kept by the cycle runner.
pub const CYCLE_HISTORY_LEN: usize = 32;

// ─── Events ─────────────────────────────────────────────────────────

/// Events the cyclic thread can queue before the dispatcher catches up.
pub const EVENT_QUEUE_LEN: usize = 256;

/// Undelivered events held per subscriber; newer events are dropped.
pub const SUBSCRIBER_QUEUE_LEN: usize = 1_024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(CYCLE_TIME_US_MIN <= CYCLE_TIME_US && CYCLE_TIME_US <= CYCLE_TIME_US_MAX);
        assert!(MISS_THRESHOLD_DEFAULT > 0 && MISS_THRESHOLD_DEFAULT <= MISS_THRESHOLD_MAX);
        assert!(CONFIG_ATTEMPTS_DEFAULT <= CONFIG_ATTEMPTS_MAX);
        assert!(MIN_RTT_MS_DEFAULT <= INITIAL_RTT_MS_DEFAULT);
        assert!(INITIAL_RTT_MS_DEFAULT <= MAX_BACKOFF_MS_DEFAULT);
        assert!(JITTER_TOLERANCE_PERCENT_DEFAULT < 100);
    }

    #[test]
    fn ports_match_drive_defaults() {
        assert_eq!(CYCLIC_DRIVE_PORT, 49_360);
        assert_eq!(CYCLIC_LOCAL_PORT, 41_136);
    }
}

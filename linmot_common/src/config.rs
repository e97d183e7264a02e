//! Configuration loading traits and types.
//!
//! Every field has a default so an empty file is a valid configuration.
//! Numeric parameters are bounded by the `MIN`/`MAX` constants in
//! [`crate::consts`] and checked by [`DriveConfig::validate`].
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "debug"
//! service_name = "linmot-axis-1"
//!
//! [drive]
//! address = "192.168.1.100"
//!
//! [cyclic]
//! cycle_time_us = 2000
//! miss_threshold = 3
//!
//! [handshake]
//! min_firmware = "6.0.0"
//! ```

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::consts::*;
use crate::rstalk::FirmwareVersion;
use crate::units::{Acceleration, Velocity};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields for the service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "linmot-drive".to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Drive Link Config ──────────────────────────────────────────────

/// Complete drive link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub drive: LinkConfig,
    #[serde(default)]
    pub cyclic: CyclicConfig,
    #[serde(default)]
    pub config_channel: ConfigChannelConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub rt: RtConfig,
}

impl DriveConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.drive.validate()?;
        self.cyclic.validate()?;
        self.config_channel.validate()?;
        self.handshake.validate()?;
        self.motion.validate()?;
        self.rt.validate()?;
        Ok(())
    }

    /// Load from a file and validate.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

fn out_of_range<T: std::fmt::Display>(name: &str, value: T, min: T, max: T) -> ConfigError {
    ConfigError::ValidationError(format!("{name} {value} out of range [{min}, {max}]"))
}

// ─── [drive] ────────────────────────────────────────────────────────

/// Drive addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Drive IP address.
    #[serde(default = "default_drive_address")]
    pub address: String,
    /// Drive port for cyclic frames.
    #[serde(default = "default_cyclic_port")]
    pub cyclic_port: u16,
    /// Local port for cyclic frames (0 = any).
    #[serde(default = "default_local_cyclic_port")]
    pub local_cyclic_port: u16,
    /// Drive port for register requests.
    #[serde(default = "default_config_port")]
    pub config_port: u16,
    /// Local port for register requests (0 = any).
    #[serde(default)]
    pub local_config_port: u16,
}

fn default_drive_address() -> String {
    DEFAULT_DRIVE_ADDRESS.to_string()
}
fn default_cyclic_port() -> u16 {
    CYCLIC_DRIVE_PORT
}
fn default_local_cyclic_port() -> u16 {
    CYCLIC_LOCAL_PORT
}
fn default_config_port() -> u16 {
    CONFIG_PORT
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: default_drive_address(),
            cyclic_port: default_cyclic_port(),
            local_cyclic_port: default_local_cyclic_port(),
            config_port: default_config_port(),
            local_config_port: 0,
        }
    }
}

impl LinkConfig {
    pub fn ip(&self) -> Result<IpAddr, ConfigError> {
        self.address.parse().map_err(|_| {
            ConfigError::ValidationError(format!("invalid drive address {:?}", self.address))
        })
    }

    pub fn cyclic_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.ip()?, self.cyclic_port))
    }

    pub fn config_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.ip()?, self.config_port))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ip()?;
        if self.cyclic_port == 0 || self.config_port == 0 {
            return Err(ConfigError::ValidationError(
                "drive ports must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── [cyclic] ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CyclicConfig {
    /// Requested cycle period [µs]; clamped to the drive's range during handshake.
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u32,
    /// Consecutive missed cycles that fault the link.
    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,
    /// Wake-up jitter tolerance [% of period].
    #[serde(default = "default_jitter_tolerance")]
    pub jitter_tolerance_percent: u8,
    /// Append CRC-16 to outgoing frames.
    #[serde(default)]
    pub checksum: bool,
}

fn default_cycle_time_us() -> u32 {
    CYCLE_TIME_US
}
fn default_miss_threshold() -> u32 {
    MISS_THRESHOLD_DEFAULT
}
fn default_jitter_tolerance() -> u8 {
    JITTER_TOLERANCE_PERCENT_DEFAULT
}

impl Default for CyclicConfig {
    fn default() -> Self {
        Self {
            cycle_time_us: default_cycle_time_us(),
            miss_threshold: default_miss_threshold(),
            jitter_tolerance_percent: default_jitter_tolerance(),
            checksum: false,
        }
    }
}

impl CyclicConfig {
    pub fn cycle_time(&self) -> Duration {
        Duration::from_micros(u64::from(self.cycle_time_us))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(CYCLE_TIME_US_MIN..=CYCLE_TIME_US_MAX).contains(&self.cycle_time_us) {
            return Err(out_of_range(
                "cycle_time_us",
                self.cycle_time_us,
                CYCLE_TIME_US_MIN,
                CYCLE_TIME_US_MAX,
            ));
        }
        if self.miss_threshold == 0 || self.miss_threshold > MISS_THRESHOLD_MAX {
            return Err(out_of_range(
                "miss_threshold",
                self.miss_threshold,
                1,
                MISS_THRESHOLD_MAX,
            ));
        }
        if self.jitter_tolerance_percent == 0 || self.jitter_tolerance_percent > 100 {
            return Err(out_of_range(
                "jitter_tolerance_percent",
                self.jitter_tolerance_percent,
                1,
                100,
            ));
        }
        Ok(())
    }
}

// ─── [config_channel] ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChannelConfig {
    /// Transmissions per request, first one included.
    #[serde(default = "default_config_attempts")]
    pub attempts: u32,
    /// Round-trip estimate before the first sample [ms].
    #[serde(default = "default_initial_rtt_ms")]
    pub initial_rtt_ms: u64,
    /// Floor for the round-trip estimate [ms].
    #[serde(default = "default_min_rtt_ms")]
    pub min_rtt_ms: u64,
    /// Ceiling for one retransmission wait [ms].
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Append CRC-16 to outgoing frames.
    #[serde(default)]
    pub checksum: bool,
}

fn default_config_attempts() -> u32 {
    CONFIG_ATTEMPTS_DEFAULT
}
fn default_initial_rtt_ms() -> u64 {
    INITIAL_RTT_MS_DEFAULT
}
fn default_min_rtt_ms() -> u64 {
    MIN_RTT_MS_DEFAULT
}
fn default_max_backoff_ms() -> u64 {
    MAX_BACKOFF_MS_DEFAULT
}

impl Default for ConfigChannelConfig {
    fn default() -> Self {
        Self {
            attempts: default_config_attempts(),
            initial_rtt_ms: default_initial_rtt_ms(),
            min_rtt_ms: default_min_rtt_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            checksum: false,
        }
    }
}

impl ConfigChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts == 0 || self.attempts > CONFIG_ATTEMPTS_MAX {
            return Err(out_of_range("attempts", self.attempts, 1, CONFIG_ATTEMPTS_MAX));
        }
        if self.min_rtt_ms == 0 {
            return Err(ConfigError::ValidationError(
                "min_rtt_ms must be greater than 0".to_string(),
            ));
        }
        if self.min_rtt_ms > self.max_backoff_ms {
            return Err(ConfigError::ValidationError(format!(
                "min_rtt_ms {} exceeds max_backoff_ms {}",
                self.min_rtt_ms, self.max_backoff_ms
            )));
        }
        if !(self.min_rtt_ms..=self.max_backoff_ms).contains(&self.initial_rtt_ms) {
            return Err(out_of_range(
                "initial_rtt_ms",
                self.initial_rtt_ms,
                self.min_rtt_ms,
                self.max_backoff_ms,
            ));
        }
        Ok(())
    }
}

// ─── [handshake] ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default = "default_handshake_attempts")]
    pub attempts: u32,
    /// Oldest accepted firmware, `"major.minor.patch"`.
    #[serde(default = "default_min_firmware")]
    pub min_firmware: String,
}

fn default_handshake_attempts() -> u32 {
    HANDSHAKE_ATTEMPTS_DEFAULT
}
fn default_min_firmware() -> String {
    MIN_FIRMWARE_DEFAULT.to_string()
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            attempts: default_handshake_attempts(),
            min_firmware: default_min_firmware(),
        }
    }
}

impl HandshakeConfig {
    pub fn min_firmware(&self) -> Result<FirmwareVersion, ConfigError> {
        self.min_firmware
            .parse::<FirmwareVersion>()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts == 0 || self.attempts > HANDSHAKE_ATTEMPTS_MAX {
            return Err(out_of_range(
                "handshake attempts",
                self.attempts,
                1,
                HANDSHAKE_ATTEMPTS_MAX,
            ));
        }
        self.min_firmware()?;
        Ok(())
    }
}

// ─── [motion] ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Cycles allowed between enable and Operation Enabled.
    #[serde(default = "default_enable_timeout")]
    pub enable_timeout_cycles: u32,
    /// Cycles allowed for a homing run.
    #[serde(default = "default_homing_timeout")]
    pub homing_timeout_cycles: u32,
    /// Default move velocity [m/s].
    #[serde(default = "default_velocity")]
    pub velocity: f64,
    /// Default move acceleration [m/s²].
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    /// Default move and stop deceleration [m/s²].
    #[serde(default = "default_acceleration")]
    pub deceleration: f64,
}

fn default_enable_timeout() -> u32 {
    ENABLE_TIMEOUT_CYCLES_DEFAULT
}
fn default_homing_timeout() -> u32 {
    HOMING_TIMEOUT_CYCLES_DEFAULT
}
fn default_velocity() -> f64 {
    0.5
}
fn default_acceleration() -> f64 {
    5.0
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enable_timeout_cycles: default_enable_timeout(),
            homing_timeout_cycles: default_homing_timeout(),
            velocity: default_velocity(),
            acceleration: default_acceleration(),
            deceleration: default_acceleration(),
        }
    }
}

impl MotionConfig {
    pub fn velocity(&self) -> Velocity {
        Velocity::from_meters_per_second_f64(self.velocity)
    }

    pub fn acceleration(&self) -> Acceleration {
        Acceleration::from_meters_per_second_squared_f64(self.acceleration)
    }

    pub fn deceleration(&self) -> Acceleration {
        Acceleration::from_meters_per_second_squared_f64(self.deceleration)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, cycles) in [
            ("enable_timeout_cycles", self.enable_timeout_cycles),
            ("homing_timeout_cycles", self.homing_timeout_cycles),
        ] {
            if cycles == 0 || cycles > STEP_TIMEOUT_CYCLES_MAX {
                return Err(out_of_range(name, cycles, 1, STEP_TIMEOUT_CYCLES_MAX));
            }
        }
        for (name, value) in [
            ("velocity", self.velocity),
            ("acceleration", self.acceleration),
            ("deceleration", self.deceleration),
        ] {
            // Upper bound keeps the scaled value inside i32.
            if !(value > 0.0 && value <= 1000.0) {
                return Err(ConfigError::ValidationError(format!(
                    "motion {name} {value} out of range (0, 1000]"
                )));
            }
        }
        Ok(())
    }
}

// ─── [rt] ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtConfig {
    /// CPU core to pin the cyclic thread to.
    #[serde(default)]
    pub cpu_core: Option<usize>,
    /// SCHED_FIFO priority (1-99).
    #[serde(default = "default_rt_priority")]
    pub priority: i32,
    /// Lock all pages in RAM before the loop starts.
    #[serde(default = "default_true")]
    pub lock_memory: bool,
}

fn default_rt_priority() -> i32 {
    80
}
fn default_true() -> bool {
    true
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            cpu_core: None,
            priority: default_rt_priority(),
            lock_memory: true,
        }
    }
}

impl RtConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=99).contains(&self.priority) {
            return Err(out_of_range("rt priority", self.priority, 1, 99));
        }
        Ok(())
    }
}

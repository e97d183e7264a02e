//! Configuration loading for the drive runtime.
//!
//! Parses `DriveConfig` from TOML, applies command-line overrides and
//! validates the result. A missing file falls back to defaults only when the
//! caller asks for it (`--simulate` runs without a config file).

use std::path::Path;

use linmot_common::config::{ConfigError, ConfigLoader, DriveConfig};
use tracing::{info, warn};

/// Values given on the command line; `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub address: Option<String>,
    pub cpu_core: Option<usize>,
    pub rt_priority: Option<i32>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut DriveConfig) {
        if let Some(address) = &self.address {
            config.drive.address = address.clone();
        }
        if let Some(core) = self.cpu_core {
            config.rt.cpu_core = Some(core);
        }
        if let Some(priority) = self.rt_priority {
            config.rt.priority = priority;
        }
    }
}

/// Load, override and validate.
pub fn load_config(
    path: &Path,
    overrides: &ConfigOverrides,
    allow_missing: bool,
) -> Result<DriveConfig, ConfigError> {
    let mut config = match DriveConfig::load(path) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound) if allow_missing => {
            warn!(path = %path.display(), "config file not found, using defaults");
            DriveConfig::default()
        }
        Err(e) => return Err(e),
    };
    overrides.apply(&mut config);
    config.validate()?;
    log_summary(&config);
    Ok(config)
}

pub fn load_config_from_str(
    content: &str,
    overrides: &ConfigOverrides,
) -> Result<DriveConfig, ConfigError> {
    let mut config = DriveConfig::from_toml_str(content)?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn log_summary(config: &DriveConfig) {
    info!(
        service = %config.shared.service_name,
        drive = %config.drive.address,
        cyclic_port = config.drive.cyclic_port,
        config_port = config.drive.config_port,
        cycle_time_us = config.cyclic.cycle_time_us,
        miss_threshold = config.cyclic.miss_threshold,
        min_firmware = %config.handshake.min_firmware,
        "config loaded"
    );
}

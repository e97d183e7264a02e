//! Session handshake over the configuration channel.
//!
//! 1. Firmware version, checked against the configured minimum.
//! 2. Device identity.
//! 3. Cycle period: clamp the request into the drive's supported window,
//!    write it, read it back. The read-back value is what the drive runs.

use linmot_common::rstalk::{FirmwareVersion, RegisterAddress, RegisterValue, registers};
use serde::Serialize;
use tracing::{debug, info};

use crate::config_channel::ConfigChannel;
use crate::error::DriveError;
use crate::transport::Transport;

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeResult {
    pub firmware: FirmwareVersion,
    pub device_id: String,
    /// Negotiated cyclic period [µs].
    pub cycle_time_us: u32,
}

pub fn perform<T: Transport>(
    channel: &ConfigChannel<T>,
    requested_cycle_us: u32,
    min_firmware: FirmwareVersion,
) -> Result<HandshakeResult, DriveError> {
    let firmware = FirmwareVersion::from_packed(read_u32(channel, registers::FIRMWARE_VERSION)?);
    if firmware < min_firmware {
        return Err(DriveError::IncompatibleFirmware {
            found: firmware,
            required: min_firmware,
        });
    }

    let device_id = match read(channel, registers::DEVICE_ID)? {
        RegisterValue::Str(id) => id,
        other => {
            return Err(DriveError::Handshake(format!(
                "device id has type {:?}",
                other.data_type()
            )));
        }
    };
    debug!(%firmware, %device_id, "drive identified");

    let min = read_u32(channel, registers::CYCLE_TIME_MIN_US)?;
    let max = read_u32(channel, registers::CYCLE_TIME_MAX_US)?;
    if min == 0 || min > max {
        return Err(DriveError::Handshake(format!(
            "drive reports invalid cycle window [{min}, {max}] µs"
        )));
    }
    let cycle = requested_cycle_us.clamp(min, max);
    if cycle != requested_cycle_us {
        info!(requested = requested_cycle_us, negotiated = cycle, min, max, "cycle time clamped");
    }

    let address = registers::CYCLE_TIME_US;
    channel.write_register(address.index, address.subindex, RegisterValue::U32(cycle))?;
    let cycle_time_us = read_u32(channel, address)?;
    if cycle_time_us == 0 {
        return Err(DriveError::Handshake("drive reports zero cycle time".to_string()));
    }

    Ok(HandshakeResult {
        firmware,
        device_id,
        cycle_time_us,
    })
}

fn read<T: Transport>(
    channel: &ConfigChannel<T>,
    address: RegisterAddress,
) -> Result<RegisterValue, DriveError> {
    channel.read_register(address.index, address.subindex)
}

fn read_u32<T: Transport>(
    channel: &ConfigChannel<T>,
    address: RegisterAddress,
) -> Result<u32, DriveError> {
    let value = read(channel, address)?;
    value.as_u32().ok_or_else(|| {
        DriveError::Handshake(format!("register {address} holds {value}, expected u32"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_channel::tests::ScriptedTransport;
    use linmot_common::config::ConfigChannelConfig;
    use linmot_common::frame::{Frame, Message};
    use linmot_common::rstalk::{RegisterReply, RegisterStatus};
    use std::collections::HashMap;

    fn drive(firmware: FirmwareVersion, min: u32, max: u32) -> ConfigChannel<ScriptedTransport> {
        let mut map: HashMap<RegisterAddress, RegisterValue> = HashMap::from([
            (registers::FIRMWARE_VERSION, RegisterValue::U32(firmware.to_packed())),
            (registers::DEVICE_ID, RegisterValue::Str("C1250-LU".to_string())),
            (registers::CYCLE_TIME_US, RegisterValue::U32(2_000)),
            (registers::CYCLE_TIME_MIN_US, RegisterValue::U32(min)),
            (registers::CYCLE_TIME_MAX_US, RegisterValue::U32(max)),
        ]);
        let transport = ScriptedTransport::new(move |f: &Frame| {
            let reply = match &f.message {
                Message::RegisterRead(r) => match map.get(&r.address) {
                    Some(v) => RegisterReply::ok(r.address, v.clone()),
                    None => RegisterReply::error(r.address, RegisterStatus::UNKNOWN_REGISTER),
                },
                Message::RegisterWrite(w) => {
                    map.insert(w.address, w.value.clone());
                    RegisterReply::ok(w.address, w.value.clone())
                }
                _ => return Vec::new(),
            };
            vec![Frame::new(f.sequence, Message::RegisterReply(reply))]
        });
        ConfigChannel::new(
            transport,
            &ConfigChannelConfig {
                initial_rtt_ms: 5,
                min_rtt_ms: 1,
                max_backoff_ms: 20,
                ..ConfigChannelConfig::default()
            },
        )
    }

    #[test]
    fn negotiates_requested_cycle() {
        let channel = drive(FirmwareVersion::new(6, 2, 0), 250, 10_000);
        let result = perform(&channel, 1_000, FirmwareVersion::new(6, 0, 0)).unwrap();
        assert_eq!(result.cycle_time_us, 1_000);
        assert_eq!(result.device_id, "C1250-LU");
        assert_eq!(result.firmware, FirmwareVersion::new(6, 2, 0));
    }

    #[test]
    fn clamps_into_drive_window() {
        let channel = drive(FirmwareVersion::new(6, 2, 0), 500, 4_000);
        let result = perform(&channel, 250, FirmwareVersion::new(6, 0, 0)).unwrap();
        assert_eq!(result.cycle_time_us, 500);
    }

    #[test]
    fn old_firmware_is_incompatible() {
        let channel = drive(FirmwareVersion::new(5, 9, 9), 250, 10_000);
        let err = perform(&channel, 2_000, FirmwareVersion::new(6, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            DriveError::IncompatibleFirmware { found, .. } if found == FirmwareVersion::new(5, 9, 9)
        ));
        // Stopped before touching the cycle time.
        assert_eq!(channel.stats().requests, 1);
    }

    #[test]
    fn invalid_window_is_rejected() {
        let channel = drive(FirmwareVersion::new(6, 0, 0), 5_000, 1_000);
        assert!(matches!(
            perform(&channel, 2_000, FirmwareVersion::new(6, 0, 0)),
            Err(DriveError::Handshake(_))
        ));
    }
}

//! Integration test: connection handshake against the simulated drive.

use linmot_common::events::DriveEvent;
use linmot_common::rstalk::{FirmwareVersion, RegisterValue, registers};
use linmot_common::state::ConnectionState;
use linmot_drive::error::DriveError;
use linmot_drive::session::DriveSession;
use linmot_drive::sim::{SimOptions, SimulatedDrive};

use super::{connected, test_config, wait_until};

#[test]
fn connect_negotiates_cycle_time() {
    let (sim, session, events) = connected(SimOptions::default());

    assert_eq!(session.state(), ConnectionState::Connected);
    let snapshot = session.snapshot();
    let handshake = snapshot.handshake.unwrap();
    assert_eq!(handshake.firmware, FirmwareVersion::new(6, 2, 0));
    assert_eq!(handshake.device_id, "LinMot C1250-SIM");
    assert_eq!(handshake.cycle_time_us, 4_000);
    assert_eq!(sim.register(registers::CYCLE_TIME_US), Some(RegisterValue::U32(4_000)));

    let seen: Vec<_> = events.try_iter().collect();
    assert!(seen.iter().any(|e| matches!(e, DriveEvent::HandshakeSucceeded { .. })));
    assert!(seen.iter().any(|e| matches!(
        e,
        DriveEvent::SessionStateChanged {
            to: ConnectionState::Connected,
            ..
        }
    )));

    // Cyclic traffic is flowing.
    assert!(wait_until(|| session.snapshot().cycle.link.accepted > 5));
}

#[test]
fn requested_cycle_is_clamped_to_drive_window() {
    let sim = SimulatedDrive::spawn(SimOptions {
        cycle_time_min_us: 5_000,
        cycle_time_max_us: 8_000,
        ..SimOptions::default()
    })
    .unwrap();
    let mut session = DriveSession::new(test_config(&sim));
    let result = session.connect().unwrap();
    assert_eq!(result.cycle_time_us, 5_000);
}

#[test]
fn old_firmware_is_refused_without_retry() {
    let sim = SimulatedDrive::spawn(SimOptions {
        firmware: FirmwareVersion::new(5, 9, 0),
        ..SimOptions::default()
    })
    .unwrap();
    let mut config = test_config(&sim);
    config.handshake.attempts = 3;
    let mut session = DriveSession::new(config);
    let events = session.subscribe();

    let err = session.connect().unwrap_err();
    assert!(matches!(err, DriveError::IncompatibleFirmware { .. }));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.snapshot().handshake.is_none());

    let failures = events
        .try_iter()
        .filter(|e| matches!(e, DriveEvent::HandshakeFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    // Only the firmware register was read.
    assert_eq!(sim.config_requests(), 1);
    assert_eq!(sim.control_frames(), 0);
}

#[test]
fn unreachable_drive_times_out() {
    let sim = SimulatedDrive::spawn(SimOptions::default()).unwrap();
    sim.set_drop_config(true);
    let mut config = test_config(&sim);
    config.handshake.attempts = 1;
    config.config_channel.attempts = 2;
    let mut session = DriveSession::new(config);

    let err = session.connect().unwrap_err();
    assert!(matches!(err, DriveError::RequestTimeout { attempts: 2 }));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(sim.config_requests(), 2);
}

#[test]
fn checksummed_frames_are_understood() {
    let sim = SimulatedDrive::spawn(SimOptions {
        checksum: true,
        ..SimOptions::default()
    })
    .unwrap();
    let mut config = test_config(&sim);
    config.cyclic.checksum = true;
    config.config_channel.checksum = true;
    let mut session = DriveSession::new(config);
    session.connect().unwrap();
    assert!(wait_until(|| session.snapshot().cycle.link.accepted > 5));
    assert_eq!(session.snapshot().cycle.link.undecodable, 0);
}

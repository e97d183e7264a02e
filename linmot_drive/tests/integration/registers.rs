//! Integration test: register access through a connected session.

use linmot_common::rstalk::{RegisterStatus, RegisterValue, registers};
use linmot_drive::config_channel::CancelToken;
use linmot_drive::error::DriveError;
use linmot_drive::sim::SimOptions;

use super::connected;

#[test]
fn write_then_read_scratch_register() {
    let (_sim, session, _events) = connected(SimOptions::default());

    session
        .write_register(0x1234, 0, RegisterValue::I32(500))
        .unwrap();
    assert_eq!(session.read_register(0x1234, 0).unwrap(), RegisterValue::I32(500));
}

#[test]
fn unknown_register_reports_drive_status() {
    let (_sim, session, _events) = connected(SimOptions::default());

    let err = session.read_register(0x4321, 7).unwrap_err();
    assert_eq!(err.register_status(), Some(RegisterStatus::UNKNOWN_REGISTER));
}

#[test]
fn read_only_register_is_refused_before_sending() {
    let (sim, session, _events) = connected(SimOptions::default());
    let before = sim.config_requests();

    let address = registers::FIRMWARE_VERSION;
    let err = session
        .write_register(address.index, address.subindex, RegisterValue::U32(0))
        .unwrap_err();
    assert!(matches!(
        err,
        DriveError::RegisterError { code, .. } if code == RegisterStatus::READ_ONLY
    ));
    assert_eq!(sim.config_requests(), before);
}

#[test]
fn out_of_range_cycle_time_is_rejected_by_drive() {
    let (_sim, session, _events) = connected(SimOptions::default());

    let address = registers::CYCLE_TIME_US;
    let err = session
        .write_register(address.index, address.subindex, RegisterValue::U32(1))
        .unwrap_err();
    assert_eq!(err.register_status(), Some(RegisterStatus::OUT_OF_RANGE));
}

#[test]
fn cancelled_request_discards_late_reply() {
    let (sim, session, _events) = connected(SimOptions::default());
    let before = sim.config_requests();

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = session
        .read_register_cancellable(0x1234, 0, &cancel)
        .unwrap_err();
    assert!(matches!(err, DriveError::Cancelled));
    // The request still went out once.
    assert!(super::wait_until(|| sim.config_requests() == before + 1));

    // Its late reply must not resolve the next request.
    session
        .write_register(0x1234, 1, RegisterValue::U16(7))
        .unwrap();
    assert_eq!(session.read_register(0x1234, 1).unwrap(), RegisterValue::U16(7));
}

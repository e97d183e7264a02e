//! Integration test: enable → home → move → stop, and fault handling.

use linmot_common::events::DriveEvent;
use linmot_common::linudp::ErrorCode;
use linmot_common::state::{FaultReason, MotionState};
use linmot_common::units::Position;
use linmot_drive::sim::SimOptions;

use super::{connected, wait_event, wait_motion, wait_until};

#[test]
fn enable_home_and_move() {
    let (sim, session, events) = connected(SimOptions::default());

    session.enable().unwrap();
    assert!(wait_motion(&events, MotionState::Enabling));
    assert!(wait_motion(&events, MotionState::Ready));

    session.home().unwrap();
    assert!(wait_motion(&events, MotionState::Homing));
    assert!(wait_motion(&events, MotionState::Ready));
    assert!(sim.is_homed());
    assert_eq!(sim.position(), Position(0));

    let target = Position::from_millimeters(10);
    session.move_to(target).unwrap();
    assert!(wait_motion(&events, MotionState::Moving));
    assert!(wait_motion(&events, MotionState::Ready));
    assert_eq!(sim.position(), target);
    assert!(wait_until(|| session.snapshot().cycle.actual_position == Some(target)));

    session.disable().unwrap();
    assert!(wait_motion(&events, MotionState::Disabled));
}

#[test]
fn stop_halts_motion_short_of_target() {
    let (sim, session, events) = connected(SimOptions {
        speed: 100,
        stop_frames: 25,
        ..SimOptions::default()
    });
    session.enable().unwrap();
    assert!(wait_motion(&events, MotionState::Ready));

    let target = Position::from_millimeters(50);
    session.move_to(target).unwrap();
    assert!(wait_motion(&events, MotionState::Moving));
    let at_stop = sim.position();
    session.stop().unwrap();
    assert!(wait_motion(&events, MotionState::Ready));

    // Ready only after the drive has coasted to standstill.
    let stopped = sim.position();
    assert!(stopped.0 >= at_stop.0 + 25 * 100);
    assert!(stopped.0 < target.0);
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(sim.position(), stopped);
}

#[test]
fn move_after_reset_reaches_new_target() {
    let (sim, mut session, events) = connected(SimOptions::default());
    session.enable().unwrap();
    assert!(wait_motion(&events, MotionState::Ready));

    let first = Position::from_millimeters(10);
    session.move_to(first).unwrap();
    assert!(wait_motion(&events, MotionState::Moving));
    assert!(wait_motion(&events, MotionState::Ready));
    assert_eq!(sim.position(), first);

    // The drive keeps its motion command count across the reconnect.
    session.reset().unwrap();
    session.enable().unwrap();
    assert!(wait_motion(&events, MotionState::Ready));

    let second = Position::from_millimeters(20);
    session.move_to(second).unwrap();
    assert!(wait_motion(&events, MotionState::Moving));
    assert!(wait_motion(&events, MotionState::Ready));
    assert_eq!(sim.position(), second);
}

#[test]
fn command_in_wrong_state_is_rejected() {
    let (_sim, session, events) = connected(SimOptions::default());

    session.move_to(Position::from_millimeters(1)).unwrap();
    let rejected = wait_event(&events, |e| matches!(e, DriveEvent::CommandRejected { .. }));
    assert_eq!(
        rejected,
        Some(DriveEvent::CommandRejected {
            command: "move_to",
            state: MotionState::Disabled,
        })
    );
}

#[test]
fn drive_fault_is_acknowledged_and_cleared() {
    let (sim, session, events) = connected(SimOptions::default());
    session.enable().unwrap();
    assert!(wait_motion(&events, MotionState::Ready));

    sim.inject_fault(ErrorCode::MotorHotSensor);
    let entered = wait_event(&events, |e| matches!(e, DriveEvent::FaultEntered { .. }));
    assert_eq!(
        entered,
        Some(DriveEvent::FaultEntered {
            reason: FaultReason::Drive(ErrorCode::MotorHotSensor)
        })
    );

    // Enable while faulted is refused.
    session.enable().unwrap();
    let rejected = wait_event(&events, |e| matches!(e, DriveEvent::CommandRejected { .. }));
    assert_eq!(
        rejected,
        Some(DriveEvent::CommandRejected {
            command: "enable",
            state: MotionState::Faulted,
        })
    );

    session.fault_reset().unwrap();
    assert!(wait_event(&events, |e| matches!(e, DriveEvent::FaultCleared)).is_some());
    assert!(wait_until(|| session.snapshot().cycle.motion_state == MotionState::Disabled));
    assert!(session.snapshot().cycle.fault.is_none());

    session.enable().unwrap();
    assert!(wait_motion(&events, MotionState::Ready));
}

#[test]
fn fatal_fault_cannot_be_acknowledged() {
    let (sim, session, events) = connected(SimOptions::default());
    sim.inject_fatal(ErrorCode::MotorCommunicationLost);
    assert!(wait_motion(&events, MotionState::Faulted));

    session.fault_reset().unwrap();
    let rejected = wait_event(&events, |e| matches!(e, DriveEvent::CommandRejected { .. }));
    assert_eq!(
        rejected,
        Some(DriveEvent::CommandRejected {
            command: "fault_acknowledge",
            state: MotionState::Faulted,
        })
    );
    assert_eq!(
        session.snapshot().cycle.fault,
        Some(FaultReason::DriveFatal(ErrorCode::MotorCommunicationLost))
    );
}

//! Integration test: cyclic link loss, fault latching and session reset.

use std::time::Duration;

use linmot_common::events::DriveEvent;
use linmot_common::state::{ConnectionState, FaultReason, MotionState};
use linmot_drive::error::DriveError;
use linmot_drive::sim::SimOptions;

use super::{connected, wait_event, wait_until};

#[test]
fn dropped_status_faults_link_exactly_once() {
    let (sim, mut session, events) = connected(SimOptions::default());
    assert!(wait_until(|| session.snapshot().cycle.link.accepted > 5));

    sim.set_drop_status(true);
    assert!(wait_event(&events, |e| matches!(e, DriveEvent::LinkFaulted { .. })).is_some());
    assert!(wait_until(|| session.state() == ConnectionState::Faulted));

    // Keep missing for a while: no second LinkFaulted.
    std::thread::sleep(Duration::from_millis(100));
    let later: Vec<_> = events.try_iter().collect();
    assert!(!later.iter().any(|e| matches!(e, DriveEvent::LinkFaulted { .. })));
    assert!(later.iter().any(|e| matches!(e, DriveEvent::CycleMissed { .. })));

    let snapshot = session.snapshot();
    assert!(snapshot.cycle.link_faulted);
    assert_eq!(snapshot.cycle.motion_state, MotionState::Faulted);
    assert_eq!(snapshot.cycle.fault, Some(FaultReason::LinkLost));
    assert!(snapshot.cycle.consecutive_misses >= 5);

    // Commands and registers are refused until reset.
    assert!(matches!(session.enable(), Err(DriveError::SessionFaulted)));
    assert!(matches!(session.read_register(0x1234, 0), Err(DriveError::SessionFaulted)));

    sim.set_drop_status(false);
    session.reset().unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(wait_until(|| session.snapshot().cycle.link.accepted > 5));
    let snapshot = session.snapshot();
    assert!(!snapshot.cycle.link_faulted);
    assert_eq!(snapshot.cycle.motion_state, MotionState::Disabled);
}

#[test]
fn stale_echoes_are_not_accepted() {
    let (sim, session, events) = connected(SimOptions::default());
    assert!(wait_until(|| session.snapshot().cycle.link.accepted > 5));

    sim.set_stale_echo(true);
    assert!(wait_event(&events, |e| matches!(e, DriveEvent::LinkFaulted { .. })).is_some());
    let link = session.snapshot().cycle.link;
    assert!(link.stale > 0);
}

#[test]
fn isolated_miss_does_not_fault() {
    let (sim, session, events) = connected(SimOptions::default());
    assert!(wait_until(|| session.snapshot().cycle.link.accepted > 5));

    sim.set_drop_status(true);
    assert!(wait_event(&events, |e| matches!(e, DriveEvent::CycleMissed { .. })).is_some());
    sim.set_drop_status(false);

    let accepted = session.snapshot().cycle.link.accepted;
    assert!(wait_until(|| session.snapshot().cycle.link.accepted > accepted + 5));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.cycle.consecutive_misses, 0);
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(!snapshot.cycle.link_faulted);
}

#[test]
fn disconnect_stops_cyclic_traffic() {
    let (sim, mut session, _events) = connected(SimOptions::default());
    assert!(wait_until(|| sim.control_frames() > 5));

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    let frames = sim.control_frames();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(sim.control_frames(), frames);
}

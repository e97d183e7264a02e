mod cyclic_link;
mod handshake;
mod motion_flow;
mod registers;

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use linmot_common::config::DriveConfig;
use linmot_common::events::DriveEvent;
use linmot_common::state::MotionState;
use linmot_drive::session::DriveSession;
use linmot_drive::sim::{SimOptions, SimulatedDrive};

pub const WAIT: Duration = Duration::from_secs(5);

/// Session settings aimed at `sim`, relaxed for loaded test machines.
pub fn test_config(sim: &SimulatedDrive) -> DriveConfig {
    let mut config = DriveConfig::default();
    config.drive = sim.link_config();
    config.cyclic.cycle_time_us = 4_000;
    config.cyclic.miss_threshold = 5;
    config.cyclic.jitter_tolerance_percent = 100;
    config.config_channel.max_backoff_ms = 50;
    config.rt.lock_memory = false;
    config
}

/// Simulated drive plus a connected session and its event stream.
pub fn connected(options: SimOptions) -> (SimulatedDrive, DriveSession, Receiver<DriveEvent>) {
    let sim = SimulatedDrive::spawn(options).unwrap();
    let mut session = DriveSession::new(test_config(&sim));
    let events = session.subscribe();
    session.connect().unwrap();
    (sim, session, events)
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Consume events until one matches; `None` on timeout.
pub fn wait_event(
    events: &Receiver<DriveEvent>,
    mut matches: impl FnMut(&DriveEvent) -> bool,
) -> Option<DriveEvent> {
    let deadline = Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

pub fn wait_motion(events: &Receiver<DriveEvent>, state: MotionState) -> bool {
    wait_event(
        events,
        |e| matches!(e, DriveEvent::MotionStateChanged { to, .. } if *to == state),
    )
    .is_some()
}

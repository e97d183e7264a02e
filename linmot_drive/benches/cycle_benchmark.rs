//! Cycle benchmark: the per-cycle work of the cyclic thread.
//!
//! `motion_update` is the compute part (decode status, step the state
//! machine, build the next request). `loopback_exchange` adds one
//! request/response round trip against the simulated drive.

use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};

use linmot_common::config::{CyclicConfig, MotionConfig};
use linmot_common::linudp::{DEFAULT_RESPONSE_FLAGS, DriveState, StatusFlags, StatusResponse};
use linmot_common::units::Position;
use linmot_drive::cyclic::CyclicChannel;
use linmot_drive::motion::{ControlOutput, DriveStatus, MotionStateMachine, OperatorCommand};
use linmot_drive::sim::{SimOptions, SimulatedDrive};

fn enabled_status(count: u8, in_target: bool) -> StatusResponse {
    let mut flags = StatusFlags::OPERATION_ENABLED | StatusFlags::HOMED;
    flags.set(StatusFlags::IN_TARGET_POSITION, in_target);
    flags.set(StatusFlags::MOTION_ACTIVE, !in_target);
    StatusResponse {
        status_flags: Some(flags),
        state: Some(DriveState::OperationEnabled {
            motion_command_count: count,
            event_handler: false,
            motion_active: !in_target,
            in_target_position: in_target,
            homed: true,
        }),
        actual_position: Some(Position::from_millimeters(10)),
        ..StatusResponse::default()
    }
}

fn bench_motion_update(c: &mut Criterion) {
    let mut machine = MotionStateMachine::new(&MotionConfig::default());
    machine.submit(OperatorCommand::Enable);
    let ready = DriveStatus {
        ready: true,
        ..DriveStatus::default()
    };
    machine.update(&ready);
    machine.update(&DriveStatus::from_status(&enabled_status(0, true)));

    let mut target = 0;
    let mut count = 0;
    c.bench_function("motion_update", |b| {
        b.iter(|| {
            // Move and arrive, so every iteration takes two transitions.
            target = (target + 1) % 100;
            machine.submit(OperatorCommand::MoveTo(Position::from_millimeters(target)));
            let issued = machine.update(&DriveStatus::from_status(&enabled_status(count, true)));
            count = issued.motion_command.map_or(0, |m| m.count);
            let status = DriveStatus::from_status(black_box(&enabled_status(count, true)));
            let output: ControlOutput = machine.update(&status);
            black_box(output.to_request(DEFAULT_RESPONSE_FLAGS))
        })
    });
}

fn bench_loopback_exchange(c: &mut Criterion) {
    let sim = match SimulatedDrive::spawn(SimOptions::default()) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("skipping loopback_exchange: {e}");
            return;
        }
    };
    let config = CyclicConfig {
        miss_threshold: 1_000,
        ..CyclicConfig::default()
    };
    let mut channel =
        match CyclicChannel::connect(&sim.link_config(), &config, Duration::from_millis(50)) {
            Ok(channel) => channel,
            Err(e) => {
                eprintln!("skipping loopback_exchange: {e}");
                return;
            }
        };
    let machine = MotionStateMachine::new(&MotionConfig::default());
    let request = machine.output().to_request(DEFAULT_RESPONSE_FLAGS);

    c.bench_function("loopback_exchange", |b| {
        b.iter(|| black_box(channel.exchange(black_box(&request))))
    });
}

criterion_group!(benches, bench_motion_update, bench_loopback_exchange);
criterion_main!(benches);

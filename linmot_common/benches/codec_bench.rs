//! Frame codec benchmarks.
//!
//! One control frame out and one status frame in per cycle; both must stay
//! far below the cycle budget.

use bytes::BytesMut;
use criterion::{Criterion, criterion_group, criterion_main};
use linmot_common::linudp::DEFAULT_RESPONSE_FLAGS;
use linmot_common::prelude::*;
use std::hint::black_box;

fn control_frame() -> Frame {
    Frame::new(
        42,
        Message::Control(ControlRequest {
            control_flags: Some(ControlFlags::OPERATE),
            motion_command: Some(MotionCommand {
                count: 5,
                command: Command::VaiGoToPos {
                    target_position: Position::from_millimeters(100),
                    maximal_velocity: Velocity::from_meters_per_second(1),
                    acceleration: Acceleration::from_meters_per_second_squared(10),
                    deceleration: Acceleration::from_meters_per_second_squared(10),
                },
            }),
            realtime_configuration: None,
            response_flags: DEFAULT_RESPONSE_FLAGS,
        }),
    )
}

fn status_frame() -> Frame {
    Frame::new(
        42,
        Message::Status(StatusResponse {
            echoed_request: RequestFlags::CONTROL_FLAGS | RequestFlags::MOTION_COMMAND,
            status_flags: Some(StatusFlags::OPERATION_ENABLED | StatusFlags::HOMED),
            state: Some(DriveState::OperationEnabled {
                motion_command_count: 5,
                event_handler: false,
                motion_active: true,
                in_target_position: false,
                homed: true,
            }),
            actual_position: Some(Position(512_345)),
            demand_position: Some(Position(512_400)),
            current: Some(Current(1_250)),
            warning_flags: Some(WarningFlags::empty()),
            error_code: Some(ErrorCode::NoError),
            monitoring_channel: None,
            realtime_configuration: None,
        }),
    )
}

fn bench_encode(c: &mut Criterion) {
    let frame = control_frame();
    let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN);

    for checksum in [false, true] {
        let codec = FrameCodec::new(checksum);
        let name = if checksum { "encode_control_crc" } else { "encode_control" };
        c.bench_function(name, |b| {
            b.iter(|| {
                buf.clear();
                codec.encode_into(black_box(&frame), &mut buf).unwrap();
            });
        });
    }
}

fn bench_decode(c: &mut Criterion) {
    for checksum in [false, true] {
        let codec = FrameCodec::new(checksum);
        let bytes = codec.encode(&status_frame()).unwrap();
        let name = if checksum { "decode_status_crc" } else { "decode_status" };
        c.bench_function(name, |b| {
            b.iter(|| codec.decode(black_box(&bytes)).unwrap());
        });
    }
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);

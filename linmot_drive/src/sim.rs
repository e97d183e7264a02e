//! Simulated drive on loopback sockets.
//!
//! Serves the cyclic protocol and the register protocol from two threads.
//! The drive model is small: switch-on and enable, a homing run of fixed
//! length, go-to-position at constant speed, a stop that coasts for a few
//! frames, injected faults cleared by a rising ERROR ACKNOWLEDGE edge. Runtime switches drop status
//! frames, echo stale sequence numbers or ignore register requests.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use linmot_common::config::LinkConfig;
use linmot_common::frame::{Frame, FrameCodec, MAX_FRAME_LEN, Message};
use linmot_common::linudp::{
    Command, ControlFlags, ControlRequest, DriveState, ErrorCode, ResponseFlags, StatusFlags,
    StatusResponse, WarningFlags,
};
use linmot_common::rstalk::{
    AccessMode, FirmwareVersion, RegisterAddress, RegisterReply, RegisterStatus, RegisterValue,
    registers,
};
use linmot_common::units::{Current, Position};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

const POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub firmware: FirmwareVersion,
    pub device_id: String,
    pub cycle_time_us: u32,
    pub cycle_time_min_us: u32,
    pub cycle_time_max_us: u32,
    /// Travel per control frame [0.1 µm].
    pub speed: i32,
    /// Control frames a homing run takes.
    pub homing_frames: u32,
    /// Control frames a VaiStop keeps moving at speed before standstill.
    pub stop_frames: u32,
    /// Append CRC-16 to outgoing frames.
    pub checksum: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            firmware: FirmwareVersion::new(6, 2, 0),
            device_id: "LinMot C1250-SIM".to_string(),
            cycle_time_us: 2_000,
            cycle_time_min_us: 250,
            cycle_time_max_us: 10_000,
            speed: 20_000,
            homing_frames: 20,
            stop_frames: 0,
            checksum: false,
        }
    }
}

// ─── Drive model ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DriveModel {
    fault: Option<ErrorCode>,
    fatal: bool,
    enabled: bool,
    homed: bool,
    homing_remaining: Option<u32>,
    position: i32,
    target: i32,
    motion_count: u8,
    last_control: ControlFlags,
    speed: i32,
    homing_frames: u32,
    stop_frames: u32,
}

impl DriveModel {
    fn new(options: &SimOptions) -> Self {
        Self {
            speed: options.speed.max(1),
            homing_frames: options.homing_frames,
            stop_frames: options.stop_frames,
            ..Self::default()
        }
    }

    fn step(&mut self, request: &ControlRequest) -> StatusResponse {
        let control = request.control_flags.unwrap_or(self.last_control);
        let rising = control.difference(self.last_control);
        self.last_control = control;

        if self.fault.is_some() && !self.fatal && rising.contains(ControlFlags::ERROR_ACKNOWLEDGE) {
            info!("simulated drive: fault acknowledged");
            self.fault = None;
        }

        let operate = ControlFlags::SWITCH_ON | ControlFlags::ENABLE_OPERATION;
        self.enabled = self.fault.is_none() && control.contains(operate);
        if !self.enabled {
            self.homing_remaining = None;
            self.target = self.position;
        } else {
            self.step_enabled(control, rising, request);
        }
        self.status(request, control)
    }

    fn step_enabled(&mut self, control: ControlFlags, rising: ControlFlags, request: &ControlRequest) {
        if control.contains(ControlFlags::HOME) {
            if rising.contains(ControlFlags::HOME) {
                self.homed = false;
                self.homing_remaining = Some(self.homing_frames);
            }
            // Finished homing holds until HOME drops.
            if let Some(remaining) = self.homing_remaining {
                let left = remaining.saturating_sub(1);
                self.homing_remaining = Some(left);
                if left == 0 && !self.homed {
                    self.homed = true;
                    self.position = 0;
                    self.target = 0;
                }
            }
        } else {
            self.homing_remaining = None;
        }

        if let Some(motion) = request.motion_command {
            if motion.count != self.motion_count {
                self.motion_count = motion.count;
                match motion.command {
                    Command::VaiGoToPos {
                        target_position, ..
                    } => self.target = target_position.0,
                    Command::VaiStop { .. } => {
                        let coast = self
                            .speed
                            .saturating_mul(i32::try_from(self.stop_frames).unwrap_or(i32::MAX));
                        let remaining = self.target.saturating_sub(self.position);
                        self.target = self.position + remaining.clamp(-coast, coast);
                    }
                    _ => {}
                }
            }
        }

        let delta = self
            .target
            .saturating_sub(self.position)
            .clamp(-self.speed, self.speed);
        self.position += delta;
    }

    fn status(&self, request: &ControlRequest, control: ControlFlags) -> StatusResponse {
        let motion_active = self.enabled && self.position != self.target;
        let in_target = self.enabled && !motion_active;

        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::ERROR, self.fault.is_some());
        flags.set(StatusFlags::SWITCH_ON_LOCKED, self.fault.is_some());
        flags.set(StatusFlags::FATAL_ERROR, self.fault.is_some() && self.fatal);
        flags.set(
            StatusFlags::OPERATION_ENABLED | StatusFlags::SWITCH_ON_ACTIVE | StatusFlags::ENABLE_OPERATION,
            self.enabled,
        );
        flags.set(StatusFlags::VOLTAGE_ENABLE, control.contains(ControlFlags::VOLTAGE_ENABLE));
        flags.set(StatusFlags::HOMED, self.homed);
        flags.set(StatusFlags::MOTION_ACTIVE, motion_active);
        flags.set(StatusFlags::IN_TARGET_POSITION, in_target);

        let state = match (self.fault, self.enabled, self.homing_remaining) {
            (Some(error_code), _, _) => DriveState::Error { error_code },
            (None, true, Some(remaining)) => DriveState::Homing {
                finished: remaining == 0,
            },
            (None, true, None) => DriveState::OperationEnabled {
                motion_command_count: self.motion_count,
                event_handler: false,
                motion_active,
                in_target_position: in_target,
                homed: self.homed,
            },
            (None, false, _) if control.contains(ControlFlags::SWITCH_ON) => {
                DriveState::ReadyToOperate
            }
            (None, false, _) => DriveState::ReadyToSwitchOn,
        };

        let mut warnings = WarningFlags::empty();
        warnings.set(WarningFlags::MOTOR_NOT_HOMED, !self.homed);

        let wants = |section| request.response_flags.contains(section);
        StatusResponse {
            echoed_request: request.flags(),
            status_flags: wants(ResponseFlags::STATUS_FLAGS).then_some(flags),
            state: wants(ResponseFlags::STATE).then_some(state),
            actual_position: wants(ResponseFlags::ACTUAL_POSITION).then_some(Position(self.position)),
            demand_position: wants(ResponseFlags::DEMAND_POSITION).then_some(Position(self.target)),
            current: wants(ResponseFlags::CURRENT)
                .then_some(Current(if motion_active { 1_200 } else { 150 })),
            warning_flags: wants(ResponseFlags::WARNING_FLAGS).then_some(warnings),
            error_code: wants(ResponseFlags::ERROR_CODE).then_some(self.fault.unwrap_or_default()),
            monitoring_channel: wants(ResponseFlags::MONITORING_CHANNEL).then_some([0; 4]),
            realtime_configuration: None,
        }
    }
}

// ─── Register map ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SimRegister {
    value: RegisterValue,
    access: AccessMode,
}

#[derive(Debug)]
struct RegisterMap {
    registers: HashMap<RegisterAddress, SimRegister>,
    cycle_min: u32,
    cycle_max: u32,
}

impl RegisterMap {
    fn new(options: &SimOptions) -> Self {
        let ro = |value| SimRegister {
            value,
            access: AccessMode::ReadOnly,
        };
        let registers = HashMap::from([
            (registers::FIRMWARE_VERSION, ro(RegisterValue::U32(options.firmware.to_packed()))),
            (registers::DEVICE_ID, ro(RegisterValue::Str(options.device_id.clone()))),
            (
                registers::CYCLE_TIME_US,
                SimRegister {
                    value: RegisterValue::U32(options.cycle_time_us),
                    access: AccessMode::ReadWrite,
                },
            ),
            (registers::CYCLE_TIME_MIN_US, ro(RegisterValue::U32(options.cycle_time_min_us))),
            (registers::CYCLE_TIME_MAX_US, ro(RegisterValue::U32(options.cycle_time_max_us))),
        ]);
        Self {
            registers,
            cycle_min: options.cycle_time_min_us,
            cycle_max: options.cycle_time_max_us,
        }
    }

    fn read(&self, address: RegisterAddress) -> RegisterReply {
        match self.registers.get(&address) {
            Some(register) => RegisterReply::ok(address, register.value.clone()),
            None => RegisterReply::error(address, RegisterStatus::UNKNOWN_REGISTER),
        }
    }

    /// Unknown addresses are created read-write on first write.
    fn write(&mut self, address: RegisterAddress, value: RegisterValue) -> RegisterReply {
        if let Some(existing) = self.registers.get(&address) {
            if existing.access == AccessMode::ReadOnly {
                return RegisterReply::error(address, RegisterStatus::READ_ONLY);
            }
            if existing.value.data_type() != value.data_type() {
                return RegisterReply::error(address, RegisterStatus::TYPE_MISMATCH);
            }
        }
        if address == registers::CYCLE_TIME_US {
            let in_range = value
                .as_u32()
                .is_some_and(|us| (self.cycle_min..=self.cycle_max).contains(&us));
            if !in_range {
                return RegisterReply::error(address, RegisterStatus::OUT_OF_RANGE);
            }
        }
        self.registers.insert(
            address,
            SimRegister {
                value: value.clone(),
                access: AccessMode::ReadWrite,
            },
        );
        RegisterReply::ok(address, value)
    }
}

// ─── Server ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimShared {
    running: AtomicBool,
    drop_status: AtomicBool,
    stale_echo: AtomicBool,
    drop_config: AtomicBool,
    control_frames: AtomicU64,
    status_frames: AtomicU64,
    config_requests: AtomicU64,
}

/// A drive answering on two loopback sockets until dropped.
pub struct SimulatedDrive {
    cyclic_addr: SocketAddr,
    config_addr: SocketAddr,
    shared: Arc<SimShared>,
    model: Arc<Mutex<DriveModel>>,
    registers: Arc<Mutex<RegisterMap>>,
    threads: Vec<JoinHandle<()>>,
}

impl SimulatedDrive {
    /// Bind both sockets on 127.0.0.1 (ephemeral ports) and start serving.
    pub fn spawn(options: SimOptions) -> std::io::Result<Self> {
        let loopback: SocketAddr = ([127, 0, 0, 1], 0).into();
        let cyclic = UdpSocket::bind(loopback)?;
        let config = UdpSocket::bind(loopback)?;
        cyclic.set_read_timeout(Some(POLL))?;
        config.set_read_timeout(Some(POLL))?;

        let shared = Arc::new(SimShared::default());
        shared.running.store(true, Ordering::Release);
        let model = Arc::new(Mutex::new(DriveModel::new(&options)));
        let registers = Arc::new(Mutex::new(RegisterMap::new(&options)));
        let codec = FrameCodec::new(options.checksum);

        let mut drive = Self {
            cyclic_addr: cyclic.local_addr()?,
            config_addr: config.local_addr()?,
            shared: shared.clone(),
            model: model.clone(),
            registers: registers.clone(),
            threads: Vec::with_capacity(2),
        };

        let cyclic_shared = shared.clone();
        drive.threads.push(
            std::thread::Builder::new()
                .name("sim-cyclic".to_string())
                .spawn(move || serve_cyclic(cyclic, codec, cyclic_shared, model))?,
        );
        drive.threads.push(
            std::thread::Builder::new()
                .name("sim-config".to_string())
                .spawn(move || serve_config(config, codec, shared, registers))?,
        );

        info!(cyclic = %drive.cyclic_addr, config = %drive.config_addr, "simulated drive listening");
        Ok(drive)
    }

    pub fn cyclic_addr(&self) -> SocketAddr {
        self.cyclic_addr
    }

    pub fn config_addr(&self) -> SocketAddr {
        self.config_addr
    }

    /// Link settings that reach this drive, with ephemeral local ports.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            address: self.cyclic_addr.ip().to_string(),
            cyclic_port: self.cyclic_addr.port(),
            local_cyclic_port: 0,
            config_port: self.config_addr.port(),
            local_config_port: 0,
        }
    }

    /// Stop answering control frames (the model keeps stepping).
    pub fn set_drop_status(&self, drop: bool) {
        self.shared.drop_status.store(drop, Ordering::Release);
    }

    /// Answer with the previous sequence number instead of the echo.
    pub fn set_stale_echo(&self, stale: bool) {
        self.shared.stale_echo.store(stale, Ordering::Release);
    }

    pub fn set_drop_config(&self, drop: bool) {
        self.shared.drop_config.store(drop, Ordering::Release);
    }

    pub fn inject_fault(&self, code: ErrorCode) {
        let mut model = self.model.lock();
        model.fault = Some(code);
        model.fatal = false;
        warn!(?code, "simulated drive: fault injected");
    }

    pub fn inject_fatal(&self, code: ErrorCode) {
        let mut model = self.model.lock();
        model.fault = Some(code);
        model.fatal = true;
        warn!(?code, "simulated drive: fatal fault injected");
    }

    pub fn position(&self) -> Position {
        Position(self.model.lock().position)
    }

    pub fn is_homed(&self) -> bool {
        self.model.lock().homed
    }

    pub fn register(&self, address: RegisterAddress) -> Option<RegisterValue> {
        self.registers
            .lock()
            .registers
            .get(&address)
            .map(|r| r.value.clone())
    }

    pub fn control_frames(&self) -> u64 {
        self.shared.control_frames.load(Ordering::Acquire)
    }

    pub fn status_frames(&self) -> u64 {
        self.shared.status_frames.load(Ordering::Acquire)
    }

    pub fn config_requests(&self) -> u64 {
        self.shared.config_requests.load(Ordering::Acquire)
    }

    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for SimulatedDrive {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receive one datagram, or `None` on poll timeout.
fn receive(socket: &UdpSocket, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
    match socket.recv_from(buf) {
        Ok(received) => Some(received),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => None,
        Err(e) => {
            warn!(error = %e, "simulated drive: receive failed");
            None
        }
    }
}

fn reply(socket: &UdpSocket, codec: &FrameCodec, frame: &Frame, to: SocketAddr) {
    match codec.encode(frame) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, to) {
                warn!(error = %e, "simulated drive: send failed");
            }
        }
        Err(e) => warn!(error = %e, "simulated drive: reply not encodable"),
    }
}

fn serve_cyclic(
    socket: UdpSocket,
    codec: FrameCodec,
    shared: Arc<SimShared>,
    model: Arc<Mutex<DriveModel>>,
) {
    let mut buf = [0u8; MAX_FRAME_LEN];
    while shared.running.load(Ordering::Acquire) {
        let Some((len, from)) = receive(&socket, &mut buf) else {
            continue;
        };
        let (sequence, request) = match codec.decode(&buf[..len]) {
            Ok(Frame {
                sequence,
                message: Message::Control(request),
            }) => (sequence, request),
            Ok(other) => {
                debug!(message = ?other.message.message_type(), "simulated drive: ignoring non-control frame");
                continue;
            }
            Err(e) => {
                debug!(error = %e, "simulated drive: undecodable control frame");
                continue;
            }
        };
        shared.control_frames.fetch_add(1, Ordering::AcqRel);
        let status = model.lock().step(&request);

        if shared.drop_status.load(Ordering::Acquire) {
            trace!(sequence, "simulated drive: status dropped");
            continue;
        }
        let echo = if shared.stale_echo.load(Ordering::Acquire) {
            sequence.wrapping_sub(1)
        } else {
            sequence
        };
        reply(&socket, &codec, &Frame::new(echo, Message::Status(status)), from);
        shared.status_frames.fetch_add(1, Ordering::AcqRel);
    }
}

fn serve_config(
    socket: UdpSocket,
    codec: FrameCodec,
    shared: Arc<SimShared>,
    registers: Arc<Mutex<RegisterMap>>,
) {
    let mut buf = [0u8; MAX_FRAME_LEN];
    while shared.running.load(Ordering::Acquire) {
        let Some((len, from)) = receive(&socket, &mut buf) else {
            continue;
        };
        shared.config_requests.fetch_add(1, Ordering::AcqRel);
        if shared.drop_config.load(Ordering::Acquire) {
            continue;
        }
        let frame = match codec.decode(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "simulated drive: undecodable register request");
                continue;
            }
        };
        let answer = match frame.message {
            Message::RegisterRead(read) => registers.lock().read(read.address),
            Message::RegisterWrite(write) => registers.lock().write(write.address, write.value),
            other => {
                debug!(message = ?other.message_type(), "simulated drive: ignoring frame");
                continue;
            }
        };
        trace!(address = %answer.address, status = %answer.status, "simulated drive: register reply");
        reply(&socket, &codec, &Frame::new(frame.sequence, Message::RegisterReply(answer)), from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linmot_common::linudp::{DEFAULT_RESPONSE_FLAGS, MotionCommand};

    fn request(control: ControlFlags, motion: Option<MotionCommand>) -> ControlRequest {
        ControlRequest {
            control_flags: Some(control),
            motion_command: motion,
            realtime_configuration: None,
            response_flags: DEFAULT_RESPONSE_FLAGS,
        }
    }

    #[test]
    fn model_enables_and_moves() {
        let mut model = DriveModel::new(&SimOptions {
            speed: 100,
            ..SimOptions::default()
        });
        let status = model.step(&request(ControlFlags::OPERATE, None));
        assert!(status.status_flags.unwrap().contains(StatusFlags::OPERATION_ENABLED));

        let go = MotionCommand {
            count: 1,
            command: Command::VaiGoToPos {
                target_position: Position(250),
                maximal_velocity: Default::default(),
                acceleration: Default::default(),
                deceleration: Default::default(),
            },
        };
        let mut last = StatusResponse::default();
        for _ in 0..3 {
            last = model.step(&request(ControlFlags::OPERATE, Some(go)));
        }
        assert_eq!(last.actual_position, Some(Position(250)));
        assert!(last.status_flags.unwrap().contains(StatusFlags::IN_TARGET_POSITION));
        assert!(matches!(
            last.state,
            Some(DriveState::OperationEnabled {
                motion_command_count: 1,
                ..
            })
        ));
    }

    #[test]
    fn model_homing_reports_finished_until_home_drops() {
        let mut model = DriveModel::new(&SimOptions {
            homing_frames: 2,
            ..SimOptions::default()
        });
        let home = ControlFlags::OPERATE | ControlFlags::HOME;
        let states: Vec<_> = (0..4)
            .map(|_| model.step(&request(home, None)).state)
            .collect();
        assert_eq!(states[0], Some(DriveState::Homing { finished: false }));
        assert_eq!(states[1], Some(DriveState::Homing { finished: true }));
        assert_eq!(states[2], Some(DriveState::Homing { finished: true }));
        assert_eq!(states[3], Some(DriveState::Homing { finished: true }));
        assert!(model.homed);

        let after = model.step(&request(ControlFlags::OPERATE, None));
        assert!(matches!(
            after.state,
            Some(DriveState::OperationEnabled { homed: true, .. })
        ));
    }

    #[test]
    fn model_stop_coasts() {
        let mut model = DriveModel::new(&SimOptions {
            speed: 100,
            stop_frames: 3,
            ..SimOptions::default()
        });
        let go = MotionCommand {
            count: 1,
            command: Command::VaiGoToPos {
                target_position: Position(10_000),
                maximal_velocity: Default::default(),
                acceleration: Default::default(),
                deceleration: Default::default(),
            },
        };
        let stop = MotionCommand {
            count: 2,
            command: Command::VaiStop {
                deceleration: Default::default(),
            },
        };
        model.step(&request(ControlFlags::OPERATE, Some(go)));
        let at_stop = model.position;
        let status = model.step(&request(ControlFlags::OPERATE, Some(stop)));
        assert!(status.status_flags.unwrap().contains(StatusFlags::MOTION_ACTIVE));
        for _ in 0..3 {
            model.step(&request(ControlFlags::OPERATE, Some(stop)));
        }
        assert_eq!(model.position, at_stop + 300);
        let settled = model.step(&request(ControlFlags::OPERATE, Some(stop)));
        assert!(!settled.status_flags.unwrap().contains(StatusFlags::MOTION_ACTIVE));
    }

    #[test]
    fn model_fault_needs_rising_acknowledge() {
        let mut model = DriveModel::new(&SimOptions::default());
        model.fault = Some(ErrorCode::MotorHotSensor);
        let ack = ControlFlags::ERROR_ACKNOWLEDGE;

        let status = model.step(&request(ControlFlags::OPERATE, None));
        assert!(status.status_flags.unwrap().contains(StatusFlags::ERROR));
        model.step(&request(ack, None));
        assert!(model.fault.is_none());
    }

    #[test]
    fn fatal_fault_survives_acknowledge() {
        let mut model = DriveModel::new(&SimOptions::default());
        model.fault = Some(ErrorCode::MotorCommunicationLost);
        model.fatal = true;
        model.step(&request(ControlFlags::empty(), None));
        let status = model.step(&request(ControlFlags::ERROR_ACKNOWLEDGE, None));
        assert!(status.status_flags.unwrap().contains(StatusFlags::FATAL_ERROR));
    }

    #[test]
    fn register_map_rules() {
        let mut map = RegisterMap::new(&SimOptions::default());
        assert_eq!(
            map.write(registers::FIRMWARE_VERSION, RegisterValue::U32(1)).status,
            RegisterStatus::READ_ONLY
        );
        assert_eq!(
            map.write(registers::CYCLE_TIME_US, RegisterValue::U32(50)).status,
            RegisterStatus::OUT_OF_RANGE
        );
        assert_eq!(
            map.write(registers::CYCLE_TIME_US, RegisterValue::I16(1)).status,
            RegisterStatus::TYPE_MISMATCH
        );
        let scratch = RegisterAddress::new(0x1234, 0);
        assert_eq!(
            map.read(scratch).status,
            RegisterStatus::UNKNOWN_REGISTER
        );
        assert!(map.write(scratch, RegisterValue::I32(500)).status.is_ok());
        assert_eq!(map.read(scratch).value, Some(RegisterValue::I32(500)));
    }
}

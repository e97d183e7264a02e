//! LinUDP process-data payloads.
//!
//! A control request carries the master's control word, an optional motion
//! command block and an optional realtime-configuration command. The drive
//! answers with a status response whose contents are selected by the
//! request's [`ResponseFlags`]. Both payloads start with two 32-bit flag
//! words describing which optional sections follow.

use bitflags::bitflags;
use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::frame::FrameError;
use crate::units::{Acceleration, Current, Position, Velocity};
use crate::wire::{WireRead, WireWrite, ensure_remaining};

// ─── Flag words ─────────────────────────────────────────────────────

bitflags! {
    /// Sections present in a control request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestFlags: u32 {
        const CONTROL_FLAGS = 1 << 0;
        const MOTION_COMMAND = 1 << 1;
        const REALTIME_CONFIGURATION = 1 << 2;
    }

    /// Sections the drive includes in its status response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResponseFlags: u32 {
        const STATUS_FLAGS = 1 << 0;
        const STATE = 1 << 1;
        const ACTUAL_POSITION = 1 << 2;
        const DEMAND_POSITION = 1 << 3;
        const CURRENT = 1 << 4;
        const WARNING_FLAGS = 1 << 5;
        const ERROR_CODE = 1 << 6;
        const MONITORING_CHANNEL = 1 << 7;
        const REALTIME_CONFIGURATION = 1 << 8;
    }

    /// Control word sent by the master every cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlFlags: u16 {
        const SWITCH_ON = 1 << 0;
        const VOLTAGE_ENABLE = 1 << 1;
        const QUICK_STOP_DISABLE = 1 << 2;
        const ENABLE_OPERATION = 1 << 3;
        const ABORT_DISABLE = 1 << 4;
        const FREEZE_DISABLE = 1 << 5;
        const GO_TO_POSITION = 1 << 6;
        const ERROR_ACKNOWLEDGE = 1 << 7;
        const JOG_MOVE_POSITIVE = 1 << 8;
        const JOG_MOVE_NEGATIVE = 1 << 9;
        const SPECIAL_MODE = 1 << 10;
        const HOME = 1 << 11;
        const CLEARANCE_CHECK = 1 << 12;
        const GO_TO_INITIAL_POSITION = 1 << 13;
        const _RESERVED_14 = 1 << 14;
        const PHASE_SEARCH = 1 << 15;
    }

    /// Status word reported by the drive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u16 {
        const OPERATION_ENABLED = 1 << 0;
        const SWITCH_ON_ACTIVE = 1 << 1;
        const ENABLE_OPERATION = 1 << 2;
        const ERROR = 1 << 3;
        const VOLTAGE_ENABLE = 1 << 4;
        const QUICK_STOP_DISABLE = 1 << 5;
        const SWITCH_ON_LOCKED = 1 << 6;
        const WARNING = 1 << 7;
        const EVENT_HANDLER_ACTIVE = 1 << 8;
        const SPECIAL_MOTION_ACTIVE = 1 << 9;
        const IN_TARGET_POSITION = 1 << 10;
        const HOMED = 1 << 11;
        const FATAL_ERROR = 1 << 12;
        const MOTION_ACTIVE = 1 << 13;
        const RANGE_INDICATOR_1 = 1 << 14;
        const RANGE_INDICATOR_2 = 1 << 15;
    }

    /// Warning word reported by the drive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WarningFlags: u16 {
        const MOTOR_HOT_SENSOR = 1 << 0;
        const MOTOR_SHORT_TIME_OVERLOAD = 1 << 1;
        const MOTOR_SUPPLY_VOLTAGE_LOW = 1 << 2;
        const MOTOR_SUPPLY_VOLTAGE_HIGH = 1 << 3;
        const POSITION_LAG_ALWAYS = 1 << 4;
        const _RESERVED_5 = 1 << 5;
        const DRIVE_HOT = 1 << 6;
        const MOTOR_NOT_HOMED = 1 << 7;
        const PTC_SENSOR_1_HOT = 1 << 8;
        const PTC_SENSOR_2_HOT = 1 << 9;
        const REGENERATIVE_TEMP_OVERLOAD = 1 << 10;
        const SPEED_LAG_ALWAYS = 1 << 11;
        const POSITION_SENSOR = 1 << 12;
        const _RESERVED_13 = 1 << 13;
        const INTERFACE_WARN_FLAG = 1 << 14;
        const APPLICATION_WARN_FLAG = 1 << 15;
    }
}

impl ControlFlags {
    /// Control word that brings the drive to (and keeps it in) Operation Enabled.
    pub const OPERATE: Self = Self::SWITCH_ON
        .union(Self::VOLTAGE_ENABLE)
        .union(Self::QUICK_STOP_DISABLE)
        .union(Self::ENABLE_OPERATION)
        .union(Self::ABORT_DISABLE)
        .union(Self::FREEZE_DISABLE);
}

/// Response sections requested by the cyclic channel by default.
pub const DEFAULT_RESPONSE_FLAGS: ResponseFlags = ResponseFlags::STATUS_FLAGS
    .union(ResponseFlags::STATE)
    .union(ResponseFlags::ACTUAL_POSITION)
    .union(ResponseFlags::DEMAND_POSITION)
    .union(ResponseFlags::CURRENT)
    .union(ResponseFlags::WARNING_FLAGS)
    .union(ResponseFlags::ERROR_CODE);

macro_rules! impl_wire_flags {
    ($ty:ty, $raw:ty) => {
        impl WireRead for $ty {
            fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
                Ok(Self::from_bits_retain(<$raw>::read_from(src)?))
            }
        }

        impl WireWrite for $ty {
            fn wire_len(&self) -> usize {
                size_of::<$raw>()
            }

            fn write_to<B: BufMut>(&self, dst: &mut B) {
                self.bits().write_to(dst);
            }
        }
    };
}

impl_wire_flags!(ControlFlags, u16);
impl_wire_flags!(StatusFlags, u16);
impl_wire_flags!(WarningFlags, u16);

// ─── Error codes ────────────────────────────────────────────────────

/// Drive error code (from the error word or the Error main state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    NoError,
    LogicSupplyTooLow,
    LogicSupplyTooHigh,
    MotorSupplyTooLow,
    MotorSupplyTooHigh,
    MinPositionUndershot,
    MaxPositionOvershot,
    PositionLagAlwaysTooBig,
    MotorHotSensor,
    MotorSliderMissing,
    MotorShortTimeOverload,
    MotorCommunicationLost,
    NotHomed,
    UnknownMotionCommand,
    PvtBufferOverflow,
    PvtBufferUnderflow,
    PvtMasterTooFast,
    PvtMasterTooSlow,
    MotionCommandInWrongState,
    Unknown(u16),
}

impl ErrorCode {
    /// Raw wire value.
    pub const fn code(&self) -> u16 {
        match self {
            Self::NoError => 0x00,
            Self::LogicSupplyTooLow => 0x01,
            Self::LogicSupplyTooHigh => 0x02,
            Self::MotorSupplyTooLow => 0x03,
            Self::MotorSupplyTooHigh => 0x04,
            Self::MinPositionUndershot => 0x07,
            Self::MaxPositionOvershot => 0x08,
            Self::PositionLagAlwaysTooBig => 0x0B,
            Self::MotorHotSensor => 0x20,
            Self::MotorSliderMissing => 0x22,
            Self::MotorShortTimeOverload => 0x23,
            Self::MotorCommunicationLost => 0x45,
            Self::NotHomed => 0x80,
            Self::UnknownMotionCommand => 0x81,
            Self::PvtBufferOverflow => 0x82,
            Self::PvtBufferUnderflow => 0x83,
            Self::PvtMasterTooFast => 0x84,
            Self::PvtMasterTooSlow => 0x85,
            Self::MotionCommandInWrongState => 0x86,
            Self::Unknown(code) => *code,
        }
    }
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            0x00 => Self::NoError,
            0x01 => Self::LogicSupplyTooLow,
            0x02 => Self::LogicSupplyTooHigh,
            0x03 => Self::MotorSupplyTooLow,
            0x04 => Self::MotorSupplyTooHigh,
            0x07 => Self::MinPositionUndershot,
            0x08 => Self::MaxPositionOvershot,
            0x0B => Self::PositionLagAlwaysTooBig,
            0x20 => Self::MotorHotSensor,
            0x22 => Self::MotorSliderMissing,
            0x23 => Self::MotorShortTimeOverload,
            0x45 => Self::MotorCommunicationLost,
            0x80 => Self::NotHomed,
            0x81 => Self::UnknownMotionCommand,
            0x82 => Self::PvtBufferOverflow,
            0x83 => Self::PvtBufferUnderflow,
            0x84 => Self::PvtMasterTooFast,
            0x85 => Self::PvtMasterTooSlow,
            0x86 => Self::MotionCommandInWrongState,
            other => Self::Unknown(other),
        }
    }
}

impl From<u8> for ErrorCode {
    fn from(code: u8) -> Self {
        Self::from(u16::from(code))
    }
}

impl WireRead for ErrorCode {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        Ok(u16::read_from(src)?.into())
    }
}

impl WireWrite for ErrorCode {
    fn wire_len(&self) -> usize {
        2
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.code().write_to(dst);
    }
}

// ─── Drive state ────────────────────────────────────────────────────

/// Sub state value that marks a finished special motion (homing, jogging...).
const SUB_STATE_FINISHED: u8 = 0x0F;

/// Drive main state decoded together with its sub state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SetupError { error_code: ErrorCode },
    Error { error_code: ErrorCode },
    HardwareTests,
    ReadyToOperate,
    OperationEnabled {
        motion_command_count: u8,
        event_handler: bool,
        motion_active: bool,
        in_target_position: bool,
        homed: bool,
    },
    Homing { finished: bool },
    ClearanceCheck { finished: bool },
    GoingToInitialPosition { finished: bool },
    Aborting,
    Freezing,
    QuickStop,
    GoingToPosition { finished: bool },
    JoggingPositive { finished: bool },
    JoggingNegative { finished: bool },
    Linearizing,
    PhaseSearch,
    SpecialMode,
    BrakeDelay,
    Unknown { main_state: u8, sub_state: u8 },
}

impl Default for DriveState {
    fn default() -> Self {
        Self::NotReadyToSwitchOn
    }
}

impl DriveState {
    pub fn from_raw(main_state: u8, sub_state: u8) -> Self {
        let finished = sub_state == SUB_STATE_FINISHED;
        match main_state {
            0 => Self::NotReadyToSwitchOn,
            1 => Self::SwitchOnDisabled,
            2 => Self::ReadyToSwitchOn,
            3 => Self::SetupError { error_code: sub_state.into() },
            4 => Self::Error { error_code: sub_state.into() },
            5 => Self::HardwareTests,
            6 => Self::ReadyToOperate,
            8 => Self::OperationEnabled {
                motion_command_count: sub_state & 0x0F,
                event_handler: sub_state & (1 << 4) != 0,
                motion_active: sub_state & (1 << 5) != 0,
                in_target_position: sub_state & (1 << 6) != 0,
                homed: sub_state & (1 << 7) != 0,
            },
            9 => Self::Homing { finished },
            10 => Self::ClearanceCheck { finished },
            11 => Self::GoingToInitialPosition { finished },
            12 => Self::Aborting,
            13 => Self::Freezing,
            14 => Self::QuickStop,
            15 => Self::GoingToPosition { finished },
            16 => Self::JoggingPositive { finished },
            17 => Self::JoggingNegative { finished },
            18 => Self::Linearizing,
            19 => Self::PhaseSearch,
            20 => Self::SpecialMode,
            21 => Self::BrakeDelay,
            _ => Self::Unknown { main_state, sub_state },
        }
    }

    /// `(main_state, sub_state)` as reported on the wire.
    pub fn to_raw(&self) -> (u8, u8) {
        let done = |finished: bool| if finished { SUB_STATE_FINISHED } else { 0 };
        match *self {
            Self::NotReadyToSwitchOn => (0, 0),
            Self::SwitchOnDisabled => (1, 0),
            Self::ReadyToSwitchOn => (2, 0),
            Self::SetupError { error_code } => (3, error_code.code() as u8),
            Self::Error { error_code } => (4, error_code.code() as u8),
            Self::HardwareTests => (5, 0),
            Self::ReadyToOperate => (6, 0),
            Self::OperationEnabled {
                motion_command_count,
                event_handler,
                motion_active,
                in_target_position,
                homed,
            } => {
                let mut sub = motion_command_count & 0x0F;
                sub |= u8::from(event_handler) << 4;
                sub |= u8::from(motion_active) << 5;
                sub |= u8::from(in_target_position) << 6;
                sub |= u8::from(homed) << 7;
                (8, sub)
            }
            Self::Homing { finished } => (9, done(finished)),
            Self::ClearanceCheck { finished } => (10, done(finished)),
            Self::GoingToInitialPosition { finished } => (11, done(finished)),
            Self::Aborting => (12, 0),
            Self::Freezing => (13, 0),
            Self::QuickStop => (14, 0),
            Self::GoingToPosition { finished } => (15, done(finished)),
            Self::JoggingPositive { finished } => (16, done(finished)),
            Self::JoggingNegative { finished } => (17, done(finished)),
            Self::Linearizing => (18, 0),
            Self::PhaseSearch => (19, 0),
            Self::SpecialMode => (20, 0),
            Self::BrakeDelay => (21, 0),
            Self::Unknown { main_state, sub_state } => (main_state, sub_state),
        }
    }
}

impl WireRead for DriveState {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        ensure_remaining(src, 2, "drive state")?;
        let sub_state = u8::read_from(src)?;
        let main_state = u8::read_from(src)?;
        Ok(Self::from_raw(main_state, sub_state))
    }
}

impl WireWrite for DriveState {
    fn wire_len(&self) -> usize {
        2
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        let (main_state, sub_state) = self.to_raw();
        dst.put_u8(sub_state);
        dst.put_u8(main_state);
    }
}

// ─── Motion commands ────────────────────────────────────────────────

/// Size of the motion command block, header included.
pub const MOTION_COMMAND_LEN: usize = 32;

/// Parameter bytes available after the 2-byte header.
pub const MOTION_PARAMETERS_LEN: usize = MOTION_COMMAND_LEN - 2;

/// Motion command interface command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Command {
    #[default]
    NoOperation,
    /// Go to an absolute position with velocity/acceleration interpolation.
    VaiGoToPos {
        target_position: Position,
        maximal_velocity: Velocity,
        acceleration: Acceleration,
        deceleration: Acceleration,
    },
    /// Decelerate to standstill.
    VaiStop { deceleration: Acceleration },
    /// Command id this crate has no typed form for; parameters kept verbatim.
    Raw {
        id: u16,
        parameters: [u8; MOTION_PARAMETERS_LEN],
    },
}

impl Command {
    pub const NO_OPERATION_ID: u16 = 0x000;
    pub const VAI_GO_TO_POS_ID: u16 = 0x010;
    pub const VAI_STOP_ID: u16 = 0x017;

    pub const fn id(&self) -> u16 {
        match self {
            Self::NoOperation => Self::NO_OPERATION_ID,
            Self::VaiGoToPos { .. } => Self::VAI_GO_TO_POS_ID,
            Self::VaiStop { .. } => Self::VAI_STOP_ID,
            Self::Raw { id, .. } => *id,
        }
    }

    fn parameters_len(&self) -> usize {
        match self {
            Self::NoOperation => 0,
            Self::VaiGoToPos { .. } => 16,
            Self::VaiStop { .. } => 4,
            Self::Raw { .. } => MOTION_PARAMETERS_LEN,
        }
    }

    fn write_parameters<B: BufMut>(&self, dst: &mut B) {
        match self {
            Self::NoOperation => {}
            Self::VaiGoToPos {
                target_position,
                maximal_velocity,
                acceleration,
                deceleration,
            } => {
                target_position.0.write_to(dst);
                maximal_velocity.0.write_to(dst);
                acceleration.0.write_to(dst);
                deceleration.0.write_to(dst);
            }
            Self::VaiStop { deceleration } => deceleration.0.write_to(dst),
            Self::Raw { parameters, .. } => dst.put_slice(parameters),
        }
    }

    fn read_parameters(id: u16, block: [u8; MOTION_PARAMETERS_LEN]) -> Result<Self, FrameError> {
        let mut src = &block[..];
        Ok(match id {
            Self::NO_OPERATION_ID => Self::NoOperation,
            Self::VAI_GO_TO_POS_ID => Self::VaiGoToPos {
                target_position: Position(i32::read_from(&mut src)?),
                maximal_velocity: Velocity(i32::read_from(&mut src)?),
                acceleration: Acceleration(i32::read_from(&mut src)?),
                deceleration: Acceleration(i32::read_from(&mut src)?),
            },
            Self::VAI_STOP_ID => Self::VaiStop {
                deceleration: Acceleration(i32::read_from(&mut src)?),
            },
            id => Self::Raw {
                id,
                parameters: block,
            },
        })
    }
}

/// A command together with the 4-bit counter the drive uses to detect new
/// commands. The drive executes a command once per counter change.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionCommand {
    pub count: u8,
    pub command: Command,
}

impl MotionCommand {
    pub fn header(&self) -> u16 {
        (self.command.id() << 4) | u16::from(self.count & 0x0F)
    }
}

impl WireWrite for MotionCommand {
    fn wire_len(&self) -> usize {
        MOTION_COMMAND_LEN
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.header().write_to(dst);
        self.command.write_parameters(dst);
        dst.put_bytes(0, MOTION_PARAMETERS_LEN - self.command.parameters_len());
    }
}

impl WireRead for MotionCommand {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        ensure_remaining(src, MOTION_COMMAND_LEN, "motion command block")?;
        let header = u16::read_from(src)?;
        let block = <[u8; MOTION_PARAMETERS_LEN]>::read_from(src)?;
        Ok(Self {
            count: (header & 0x0F) as u8,
            command: Command::read_parameters(header >> 4, block)?,
        })
    }
}

// ─── Realtime configuration ─────────────────────────────────────────

/// Realtime configuration (parameter channel) command and its three arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RealtimeConfiguration {
    pub command: u16,
    pub params: [u16; 3],
}

impl WireWrite for RealtimeConfiguration {
    fn wire_len(&self) -> usize {
        8
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.command.write_to(dst);
        for p in &self.params {
            p.write_to(dst);
        }
    }
}

impl WireRead for RealtimeConfiguration {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        ensure_remaining(src, 8, "realtime configuration")?;
        let command = u16::read_from(src)?;
        let mut params = [0u16; 3];
        for p in &mut params {
            *p = u16::read_from(src)?;
        }
        Ok(Self { command, params })
    }
}

// ─── Control request ────────────────────────────────────────────────

/// Master → drive process-data payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlRequest {
    pub control_flags: Option<ControlFlags>,
    pub motion_command: Option<MotionCommand>,
    pub realtime_configuration: Option<RealtimeConfiguration>,
    pub response_flags: ResponseFlags,
}

impl ControlRequest {
    /// Flag word derived from the optional sections present.
    pub fn flags(&self) -> RequestFlags {
        let mut flags = RequestFlags::empty();
        flags.set(RequestFlags::CONTROL_FLAGS, self.control_flags.is_some());
        flags.set(RequestFlags::MOTION_COMMAND, self.motion_command.is_some());
        flags.set(
            RequestFlags::REALTIME_CONFIGURATION,
            self.realtime_configuration.is_some(),
        );
        flags
    }
}

impl WireWrite for ControlRequest {
    fn wire_len(&self) -> usize {
        8 + self.control_flags.map_or(0, |c| c.wire_len())
            + self.motion_command.map_or(0, |m| m.wire_len())
            + self.realtime_configuration.map_or(0, |r| r.wire_len())
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.flags().bits().write_to(dst);
        self.response_flags.bits().write_to(dst);
        if let Some(control) = &self.control_flags {
            control.write_to(dst);
        }
        if let Some(command) = &self.motion_command {
            command.write_to(dst);
        }
        if let Some(rtc) = &self.realtime_configuration {
            rtc.write_to(dst);
        }
    }
}

impl WireRead for ControlRequest {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        let flags = RequestFlags::from_bits_truncate(u32::read_from(src)?);
        let response_flags = ResponseFlags::from_bits_truncate(u32::read_from(src)?);

        Ok(Self {
            control_flags: read_section(src, flags.contains(RequestFlags::CONTROL_FLAGS))?,
            motion_command: read_section(src, flags.contains(RequestFlags::MOTION_COMMAND))?,
            realtime_configuration: read_section(
                src,
                flags.contains(RequestFlags::REALTIME_CONFIGURATION),
            )?,
            response_flags,
        })
    }
}

// ─── Status response ────────────────────────────────────────────────

/// Drive → master process-data payload.
///
/// `echoed_request` is the request flag word the drive is answering; the
/// realtime-configuration section is only present when that request carried
/// one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusResponse {
    pub echoed_request: RequestFlags,
    pub status_flags: Option<StatusFlags>,
    pub state: Option<DriveState>,
    pub actual_position: Option<Position>,
    pub demand_position: Option<Position>,
    pub current: Option<Current>,
    pub warning_flags: Option<WarningFlags>,
    pub error_code: Option<ErrorCode>,
    pub monitoring_channel: Option<[u32; 4]>,
    pub realtime_configuration: Option<RealtimeConfiguration>,
}

impl StatusResponse {
    /// Flag word derived from the optional sections present.
    pub fn flags(&self) -> ResponseFlags {
        let mut flags = ResponseFlags::empty();
        flags.set(ResponseFlags::STATUS_FLAGS, self.status_flags.is_some());
        flags.set(ResponseFlags::STATE, self.state.is_some());
        flags.set(ResponseFlags::ACTUAL_POSITION, self.actual_position.is_some());
        flags.set(ResponseFlags::DEMAND_POSITION, self.demand_position.is_some());
        flags.set(ResponseFlags::CURRENT, self.current.is_some());
        flags.set(ResponseFlags::WARNING_FLAGS, self.warning_flags.is_some());
        flags.set(ResponseFlags::ERROR_CODE, self.error_code.is_some());
        flags.set(ResponseFlags::MONITORING_CHANNEL, self.monitoring_channel.is_some());
        flags.set(
            ResponseFlags::REALTIME_CONFIGURATION,
            self.realtime_configuration.is_some() && self.carries_realtime_configuration(),
        );
        flags
    }

    fn carries_realtime_configuration(&self) -> bool {
        self.echoed_request
            .contains(RequestFlags::REALTIME_CONFIGURATION)
    }
}

impl WireWrite for StatusResponse {
    fn wire_len(&self) -> usize {
        let flags = self.flags();
        let section = |flag: ResponseFlags, len: usize| if flags.contains(flag) { len } else { 0 };
        8 + section(ResponseFlags::STATUS_FLAGS, 2)
            + section(ResponseFlags::STATE, 2)
            + section(ResponseFlags::ACTUAL_POSITION, 4)
            + section(ResponseFlags::DEMAND_POSITION, 4)
            + section(ResponseFlags::CURRENT, 2)
            + section(ResponseFlags::WARNING_FLAGS, 2)
            + section(ResponseFlags::ERROR_CODE, 2)
            + section(ResponseFlags::MONITORING_CHANNEL, 16)
            + section(ResponseFlags::REALTIME_CONFIGURATION, 8)
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        self.echoed_request.bits().write_to(dst);
        self.flags().bits().write_to(dst);
        if let Some(status) = &self.status_flags {
            status.write_to(dst);
        }
        if let Some(state) = &self.state {
            state.write_to(dst);
        }
        if let Some(position) = &self.actual_position {
            position.0.write_to(dst);
        }
        if let Some(position) = &self.demand_position {
            position.0.write_to(dst);
        }
        if let Some(current) = &self.current {
            current.0.write_to(dst);
        }
        if let Some(warnings) = &self.warning_flags {
            warnings.write_to(dst);
        }
        if let Some(error) = &self.error_code {
            error.write_to(dst);
        }
        if let Some(channels) = &self.monitoring_channel {
            for value in channels {
                value.write_to(dst);
            }
        }
        if self.carries_realtime_configuration()
            && let Some(rtc) = &self.realtime_configuration
        {
            rtc.write_to(dst);
        }
    }
}

// Section words are truncated: reserved bits from newer firmware announce
// nothing this decoder lays out.
impl WireRead for StatusResponse {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        let echoed_request = RequestFlags::from_bits_truncate(u32::read_from(src)?);
        let mut flags = ResponseFlags::from_bits_truncate(u32::read_from(src)?);
        if !echoed_request.contains(RequestFlags::REALTIME_CONFIGURATION) {
            flags.remove(ResponseFlags::REALTIME_CONFIGURATION);
        }

        Ok(Self {
            echoed_request,
            status_flags: read_section(src, flags.contains(ResponseFlags::STATUS_FLAGS))?,
            state: read_section(src, flags.contains(ResponseFlags::STATE))?,
            actual_position: read_section::<i32>(src, flags.contains(ResponseFlags::ACTUAL_POSITION))?
                .map(Position),
            demand_position: read_section::<i32>(src, flags.contains(ResponseFlags::DEMAND_POSITION))?
                .map(Position),
            current: read_section::<i16>(src, flags.contains(ResponseFlags::CURRENT))?.map(Current),
            warning_flags: read_section(src, flags.contains(ResponseFlags::WARNING_FLAGS))?,
            error_code: read_section(src, flags.contains(ResponseFlags::ERROR_CODE))?,
            monitoring_channel: if flags.contains(ResponseFlags::MONITORING_CHANNEL) {
                ensure_remaining(src, 16, "monitoring channel")?;
                let mut channels = [0u32; 4];
                for value in &mut channels {
                    *value = u32::read_from(src)?;
                }
                Some(channels)
            } else {
                None
            },
            realtime_configuration: read_section(
                src,
                flags.contains(ResponseFlags::REALTIME_CONFIGURATION),
            )?,
        })
    }
}

fn read_section<T: WireRead>(src: &mut &[u8], present: bool) -> Result<Option<T>, FrameError> {
    if present { T::read_from(src).map(Some) } else { Ok(None) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_command_matches_documented_bytes() {
        let command = MotionCommand {
            count: 0,
            command: Command::VaiGoToPos {
                target_position: Position::from_millimeters(10),
                maximal_velocity: Velocity::from_meters_per_second(1),
                acceleration: Acceleration::from_meters_per_second_squared(10),
                deceleration: Acceleration::from_meters_per_second_squared(10),
            },
        };

        let mut buf = Vec::new();
        command.write_to(&mut buf);

        let mut expected = vec![
            0x00, 0x01, 0xA0, 0x86, 0x01, 0x00, 0x40, 0x42, 0x0F, 0x00, 0x40, 0x42, 0x0F, 0x00,
            0x40, 0x42, 0x0F, 0x00,
        ];
        expected.resize(MOTION_COMMAND_LEN, 0);
        assert_eq!(buf, expected);
    }

    #[test]
    fn motion_command_header_carries_count() {
        let command = MotionCommand {
            count: 0x1B,
            command: Command::VaiStop {
                deceleration: Acceleration(5),
            },
        };
        assert_eq!(command.header(), 0x017B);

        let mut buf = Vec::new();
        command.write_to(&mut buf);
        assert_eq!(buf.len(), MOTION_COMMAND_LEN);

        let decoded = MotionCommand::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded.count, 0x0B);
        assert_eq!(decoded.command, command.command);
    }

    #[test]
    fn unknown_command_id_kept_raw() {
        let mut block = vec![0x53, 0x02];
        block.resize(MOTION_COMMAND_LEN, 0xAA);
        let decoded = MotionCommand::read_from(&mut &block[..]).unwrap();
        assert_eq!(decoded.count, 3);
        assert!(matches!(decoded.command, Command::Raw { id: 0x025, .. }));
    }

    #[test]
    fn drive_state_decodes_operation_enabled_sub_state() {
        let state = DriveState::from_raw(8, 0b1100_0101);
        assert_eq!(
            state,
            DriveState::OperationEnabled {
                motion_command_count: 5,
                event_handler: false,
                motion_active: false,
                in_target_position: true,
                homed: true,
            }
        );
        assert_eq!(state.to_raw(), (8, 0b1100_0101));
    }

    #[test]
    fn drive_state_wire_order_is_sub_then_main() {
        let data = [0x0F, 9];
        let state = DriveState::read_from(&mut &data[..]).unwrap();
        assert_eq!(state, DriveState::Homing { finished: true });

        let data = [0x80, 4];
        let state = DriveState::read_from(&mut &data[..]).unwrap();
        assert_eq!(
            state,
            DriveState::Error {
                error_code: ErrorCode::NotHomed
            }
        );
    }

    #[test]
    fn unknown_main_state_is_preserved() {
        let state = DriveState::from_raw(7, 3);
        assert_eq!(
            state,
            DriveState::Unknown {
                main_state: 7,
                sub_state: 3
            }
        );
        assert_eq!(state.to_raw(), (7, 3));
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(ErrorCode::from(0x0Bu16), ErrorCode::PositionLagAlwaysTooBig);
        assert_eq!(ErrorCode::from(0x99u16), ErrorCode::Unknown(0x99));
        assert_eq!(ErrorCode::MotionCommandInWrongState.code(), 0x86);
    }

    #[test]
    fn response_drops_realtime_configuration_without_request() {
        let response = StatusResponse {
            echoed_request: RequestFlags::CONTROL_FLAGS,
            status_flags: Some(StatusFlags::OPERATION_ENABLED),
            realtime_configuration: Some(RealtimeConfiguration::default()),
            ..Default::default()
        };
        assert!(!response.flags().contains(ResponseFlags::REALTIME_CONFIGURATION));

        let mut buf = Vec::new();
        response.write_to(&mut buf);
        assert_eq!(buf.len(), response.wire_len());

        let decoded = StatusResponse::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded.realtime_configuration, None);
        assert_eq!(decoded.status_flags, Some(StatusFlags::OPERATION_ENABLED));
    }

    #[test]
    fn control_request_sections_follow_flags() {
        let request = ControlRequest {
            control_flags: Some(ControlFlags::OPERATE),
            motion_command: None,
            realtime_configuration: Some(RealtimeConfiguration {
                command: 0x1000,
                params: [1, 2, 3],
            }),
            response_flags: DEFAULT_RESPONSE_FLAGS,
        };
        let mut buf = Vec::new();
        request.write_to(&mut buf);
        assert_eq!(buf.len(), 8 + 2 + 8);
        assert_eq!(&buf[..4], &[0x05, 0, 0, 0]);

        let decoded = ControlRequest::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn truncated_response_is_malformed() {
        let response = StatusResponse {
            echoed_request: RequestFlags::CONTROL_FLAGS,
            status_flags: Some(StatusFlags::empty()),
            actual_position: Some(Position(42)),
            ..Default::default()
        };
        let mut buf = Vec::new();
        response.write_to(&mut buf);
        buf.pop();
        assert!(matches!(
            StatusResponse::read_from(&mut &buf[..]),
            Err(FrameError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn reserved_section_bits_are_ignored() {
        let response = StatusResponse {
            echoed_request: RequestFlags::CONTROL_FLAGS,
            status_flags: Some(StatusFlags::OPERATION_ENABLED | StatusFlags::HOMED),
            ..Default::default()
        };
        let mut buf = Vec::new();
        response.write_to(&mut buf);
        buf[3] |= 0x80;
        buf[7] |= 0x80;
        let decoded = StatusResponse::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded.echoed_request, RequestFlags::CONTROL_FLAGS);
        assert_eq!(
            decoded.status_flags,
            Some(StatusFlags::OPERATION_ENABLED | StatusFlags::HOMED)
        );
    }
}

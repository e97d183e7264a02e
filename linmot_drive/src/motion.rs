//! Motion state machine.
//!
//! Transitions derive only from the latest decoded status and the single
//! pending operator command. The control word for the current state is
//! re-issued every cycle until the drive confirms the transition.
//!
//! ```text
//! Disabled ──enable & ready──▶ Enabling ──enabled──▶ Ready
//! Ready ──home──▶ Homing ──homed──▶ Ready
//! Ready ──move──▶ Moving ──target reached / stopped──▶ Ready
//! any ──fault──▶ Faulted ──ack──▶ FaultAcknowledge ──cleared──▶ Disabled
//! ```

use linmot_common::config::MotionConfig;
use linmot_common::events::DriveEvent;
use linmot_common::linudp::{
    Command, ControlFlags, ControlRequest, DriveState, ErrorCode, MotionCommand, ResponseFlags,
    StatusFlags, StatusResponse,
};
use linmot_common::state::{FaultReason, MotionState};
use linmot_common::units::{Acceleration, Position, Velocity};
use tracing::{debug, info, warn};

/// Control word with the power stage off but nothing blocking a switch-on.
pub const CONTROL_IDLE: ControlFlags = ControlFlags::VOLTAGE_ENABLE
    .union(ControlFlags::QUICK_STOP_DISABLE)
    .union(ControlFlags::ABORT_DISABLE)
    .union(ControlFlags::FREEZE_DISABLE);

const MAX_EVENTS: usize = 8;

// ─── Operator commands ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Enable,
    Disable,
    Home,
    MoveTo(Position),
    Stop,
    FaultAcknowledge,
}

impl OperatorCommand {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Home => "home",
            Self::MoveTo(_) => "move_to",
            Self::Stop => "stop",
            Self::FaultAcknowledge => "fault_acknowledge",
        }
    }
}

// ─── Decoded status ─────────────────────────────────────────────────

/// Status word reduced to what the transitions need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveStatus {
    pub fault: bool,
    pub fatal: bool,
    pub ready: bool,
    pub enabled: bool,
    pub homed: bool,
    pub in_target: bool,
    pub motion_active: bool,
    /// Motion command count echoed in the Operation Enabled sub state.
    pub motion_count: Option<u8>,
    /// `Some(finished)` while the drive is in its Homing main state.
    pub homing: Option<bool>,
    pub error_code: ErrorCode,
}

impl DriveStatus {
    pub fn from_status(status: &StatusResponse) -> Self {
        let flags = status.status_flags.unwrap_or_default();
        let state_error = match status.state {
            Some(DriveState::Error { error_code }) => Some(error_code),
            _ => None,
        };
        let fatal = flags.contains(StatusFlags::FATAL_ERROR);
        let fault = fatal || flags.contains(StatusFlags::ERROR) || state_error.is_some();
        let motion_count = match status.state {
            Some(DriveState::OperationEnabled {
                motion_command_count,
                ..
            }) => Some(motion_command_count),
            _ => None,
        };
        let homing = match status.state {
            Some(DriveState::Homing { finished }) => Some(finished),
            _ => None,
        };
        let error_code = status
            .error_code
            .filter(|code| *code != ErrorCode::NoError)
            .or(state_error)
            .unwrap_or_default();

        Self {
            fault,
            fatal,
            ready: !fault && !flags.contains(StatusFlags::SWITCH_ON_LOCKED),
            enabled: flags.contains(StatusFlags::OPERATION_ENABLED),
            homed: flags.contains(StatusFlags::HOMED),
            in_target: flags.contains(StatusFlags::IN_TARGET_POSITION),
            motion_active: flags.contains(StatusFlags::MOTION_ACTIVE),
            motion_count,
            homing,
            error_code,
        }
    }
}

// ─── Output ─────────────────────────────────────────────────────────

/// What to send in the next control frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlOutput {
    pub control_flags: ControlFlags,
    pub motion_command: Option<MotionCommand>,
}

impl ControlOutput {
    pub fn to_request(&self, response_flags: ResponseFlags) -> ControlRequest {
        ControlRequest {
            control_flags: Some(self.control_flags),
            motion_command: self.motion_command,
            realtime_configuration: None,
            response_flags,
        }
    }
}

/// Result of submitting an operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionTransition {
    /// Command accepted; takes effect on the next status update.
    Accepted,
    Rejected(&'static str),
}

/// Homing runs in two steps: wait for the drive to drop the homed bit,
/// then wait for it to come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum HomingStep {
    WaitStart = 0,
    WaitHomed = 1,
}

// ─── Sequence tracker ───────────────────────────────────────────────

/// Step index plus cycles spent in the step, for step timeouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceTracker {
    pub step: u8,
    pub step_cycles: u32,
}

impl SequenceTracker {
    pub const fn new() -> Self {
        Self {
            step: 0,
            step_cycles: 0,
        }
    }

    pub fn advance(&mut self) {
        self.step += 1;
        self.step_cycles = 0;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn tick(&mut self) {
        self.step_cycles = self.step_cycles.saturating_add(1);
    }

    /// Zero disables the timeout.
    pub const fn timed_out(&self, timeout_cycles: u32) -> bool {
        timeout_cycles > 0 && self.step_cycles >= timeout_cycles
    }
}

// ─── Motion profile ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionProfile {
    pub velocity: Velocity,
    pub acceleration: Acceleration,
    pub deceleration: Acceleration,
}

impl From<&MotionConfig> for MotionProfile {
    fn from(config: &MotionConfig) -> Self {
        Self {
            velocity: config.velocity(),
            acceleration: config.acceleration(),
            deceleration: config.deceleration(),
        }
    }
}

// ─── State machine ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MotionStateMachine {
    state: MotionState,
    pending: Option<OperatorCommand>,
    pub sequence: SequenceTracker,
    fault: Option<FaultReason>,
    /// 4-bit count of the last issued motion command.
    motion_count: u8,
    /// Last count the drive echoed; survives across sessions on the drive side.
    echoed_count: Option<u8>,
    active_command: Option<Command>,
    /// VaiStop issued in Moving; completion waits for standstill, not target.
    stopping: bool,
    profile: MotionProfile,
    enable_timeout_cycles: u32,
    homing_timeout_cycles: u32,
    events: heapless::Vec<DriveEvent, MAX_EVENTS>,
}

impl MotionStateMachine {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            state: MotionState::Disabled,
            pending: None,
            sequence: SequenceTracker::new(),
            fault: None,
            motion_count: 0,
            echoed_count: None,
            active_command: None,
            stopping: false,
            profile: MotionProfile::from(config),
            enable_timeout_cycles: config.enable_timeout_cycles,
            homing_timeout_cycles: config.homing_timeout_cycles,
            events: heapless::Vec::new(),
        }
    }

    #[inline]
    pub const fn state(&self) -> MotionState {
        self.state
    }

    pub const fn fault(&self) -> Option<FaultReason> {
        self.fault
    }

    pub const fn pending(&self) -> Option<OperatorCommand> {
        self.pending
    }

    /// Drain events raised since the last call.
    pub fn take_events(&mut self) -> heapless::Vec<DriveEvent, MAX_EVENTS> {
        core::mem::take(&mut self.events)
    }

    /// Offer an operator command. Commands that do not apply to the current
    /// state are dropped and reported, never queued.
    pub fn submit(&mut self, command: OperatorCommand) -> MotionTransition {
        let verdict = match (self.state, command) {
            (MotionState::Disabled, OperatorCommand::Enable) => Ok(()),
            (state, OperatorCommand::Disable) if state.is_enabled() => Ok(()),
            (MotionState::Ready, OperatorCommand::Home | OperatorCommand::MoveTo(_)) => Ok(()),
            (MotionState::Moving, OperatorCommand::Stop) => Ok(()),
            (MotionState::Faulted, OperatorCommand::FaultAcknowledge) => {
                if matches!(self.fault, Some(FaultReason::DriveFatal(_))) {
                    Err("fatal drive error cannot be acknowledged")
                } else {
                    Ok(())
                }
            }
            (_, OperatorCommand::Enable) => Err("enable requires Disabled"),
            (_, OperatorCommand::Disable) => Err("already disabled"),
            (_, OperatorCommand::Home) => Err("home requires Ready"),
            (_, OperatorCommand::MoveTo(_)) => Err("move requires Ready"),
            (_, OperatorCommand::Stop) => Err("stop requires Moving"),
            (_, OperatorCommand::FaultAcknowledge) => Err("no fault to acknowledge"),
        };

        match verdict {
            Ok(()) => {
                debug!(command = command.name(), state = %self.state, "operator command accepted");
                self.pending = Some(command);
                MotionTransition::Accepted
            }
            Err(reason) => {
                warn!(command = command.name(), state = %self.state, reason, "operator command rejected");
                self.push_event(DriveEvent::CommandRejected {
                    command: command.name(),
                    state: self.state,
                });
                MotionTransition::Rejected(reason)
            }
        }
    }

    /// Advance on a fresh status and return the next control output.
    pub fn update(&mut self, status: &DriveStatus) -> ControlOutput {
        self.sequence.tick();
        if status.motion_count.is_some() {
            self.echoed_count = status.motion_count;
        }

        if status.fault && !self.state.is_faulted() {
            let reason = if status.fatal {
                FaultReason::DriveFatal(status.error_code)
            } else {
                FaultReason::Drive(status.error_code)
            };
            self.enter_fault(reason);
            return self.output();
        }
        if let (Some(FaultReason::Drive(_)), true) = (self.fault, status.fatal) {
            self.fault = Some(FaultReason::DriveFatal(status.error_code));
        }

        // Disable pre-empts everything else.
        if matches!(self.pending, Some(OperatorCommand::Disable)) {
            self.pending = None;
            self.active_command = None;
            self.transition(MotionState::Disabled);
            return self.output();
        }

        match self.state {
            MotionState::Disabled => {
                if matches!(self.pending, Some(OperatorCommand::Enable)) {
                    self.pending = None;
                    if status.ready {
                        self.transition(MotionState::Enabling);
                    } else {
                        warn!("enable dropped, drive not ready to switch on");
                        self.push_event(DriveEvent::CommandRejected {
                            command: OperatorCommand::Enable.name(),
                            state: self.state,
                        });
                    }
                }
            }
            MotionState::Enabling => {
                if status.enabled {
                    self.transition(MotionState::Ready);
                } else if self.sequence.timed_out(self.enable_timeout_cycles) {
                    self.enter_fault(FaultReason::EnableTimeout);
                }
            }
            MotionState::Ready => match self.pending.take() {
                Some(OperatorCommand::Home) => self.transition(MotionState::Homing),
                Some(OperatorCommand::MoveTo(target)) => {
                    self.issue(Command::VaiGoToPos {
                        target_position: target,
                        maximal_velocity: self.profile.velocity,
                        acceleration: self.profile.acceleration,
                        deceleration: self.profile.deceleration,
                    });
                    self.transition(MotionState::Moving);
                }
                _ => {}
            },
            MotionState::Homing => self.update_homing(status),
            MotionState::Moving => {
                if matches!(self.pending, Some(OperatorCommand::Stop)) {
                    self.pending = None;
                    if !self.stopping {
                        self.issue(Command::VaiStop {
                            deceleration: self.profile.deceleration,
                        });
                        self.stopping = true;
                    }
                } else if self.motion_settled(status) {
                    info!(stopped = self.stopping, "motion complete");
                    self.transition(MotionState::Ready);
                }
            }
            MotionState::Faulted => {
                if matches!(self.pending, Some(OperatorCommand::FaultAcknowledge)) {
                    self.pending = None;
                    self.transition(MotionState::FaultAcknowledge);
                }
            }
            MotionState::FaultAcknowledge => {
                if !status.fault {
                    self.fault = None;
                    self.push_event(DriveEvent::FaultCleared);
                    info!("drive fault cleared");
                    self.transition(MotionState::Disabled);
                }
            }
        }

        self.output()
    }

    /// The Homing sub state's finished flag decides when the drive reports
    /// it; the homed bit is the fallback without a state section.
    fn update_homing(&mut self, status: &DriveStatus) {
        if status.homing == Some(true) {
            info!("homing complete");
            self.transition(MotionState::Ready);
            return;
        }
        match self.sequence.step {
            s if s == HomingStep::WaitStart as u8 => {
                if status.homing.is_some() || !status.homed {
                    self.sequence.advance();
                } else if self.sequence.timed_out(self.homing_timeout_cycles) {
                    self.enter_fault(FaultReason::HomingTimeout);
                }
            }
            s if s == HomingStep::WaitHomed as u8 => {
                if status.homing.is_none() && status.homed {
                    info!("homing complete");
                    self.transition(MotionState::Ready);
                } else if self.sequence.timed_out(self.homing_timeout_cycles) {
                    self.enter_fault(FaultReason::HomingTimeout);
                }
            }
            _ => {}
        }
    }

    /// Only once the drive echoes our count, so a stale in-target bit from
    /// the previous command is never read as completion. After a stop the
    /// drive settles short of the target.
    fn motion_settled(&self, status: &DriveStatus) -> bool {
        status.motion_count == Some(self.motion_count)
            && !status.motion_active
            && (self.stopping || status.in_target)
    }

    /// Enter `Faulted` regardless of the current state.
    pub fn force_fault(&mut self, reason: FaultReason) {
        if self.state != MotionState::Faulted {
            self.enter_fault(reason);
        }
    }

    /// Control output for the current state.
    pub fn output(&self) -> ControlOutput {
        let control_flags = match self.state {
            MotionState::Disabled | MotionState::Faulted => CONTROL_IDLE,
            MotionState::FaultAcknowledge => CONTROL_IDLE | ControlFlags::ERROR_ACKNOWLEDGE,
            MotionState::Enabling | MotionState::Ready | MotionState::Moving => {
                ControlFlags::OPERATE
            }
            MotionState::Homing => ControlFlags::OPERATE | ControlFlags::HOME,
        };
        ControlOutput {
            control_flags,
            motion_command: self.active_command.map(|command| MotionCommand {
                count: self.motion_count,
                command,
            }),
        }
    }

    /// The drive acts on a count that differs from the one it holds. Without
    /// an outstanding command of our own, continue from the drive's echo.
    fn issue(&mut self, command: Command) {
        let base = match (self.active_command, self.echoed_count) {
            (None, Some(echoed)) => echoed,
            _ => self.motion_count,
        };
        self.motion_count = next_motion_count(base);
        self.active_command = Some(command);
        debug!(count = self.motion_count, ?command, "motion command issued");
    }

    fn enter_fault(&mut self, reason: FaultReason) {
        warn!(%reason, state = %self.state, "motion fault");
        self.fault = Some(reason);
        self.pending = None;
        self.active_command = None;
        self.push_event(DriveEvent::FaultEntered { reason });
        self.transition(MotionState::Faulted);
    }

    fn transition(&mut self, to: MotionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.stopping = false;
        self.sequence.reset();
        debug!(%from, %to, "motion state changed");
        self.push_event(DriveEvent::MotionStateChanged { from, to });
    }

    fn push_event(&mut self, event: DriveEvent) {
        if self.events.push(event).is_err() {
            warn!("motion event buffer full, event dropped");
        }
    }
}

/// Successor in the drive's 4-bit motion command counter.
#[inline]
pub const fn next_motion_count(count: u8) -> u8 {
    count.wrapping_add(1) & 0x0F
}

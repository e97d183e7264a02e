//! Drive session: connection lifecycle and operator surface.
//!
//! ```text
//! Disconnected → Handshaking → Connected → Faulted ─reset→ Disconnected → Handshaking …
//! ```
//!
//! The session owns the configuration channel and the cyclic thread. Motion
//! commands are handed to the cyclic thread and take effect on its next
//! cycle; callers observe the outcome through [`DriveSession::snapshot`] or
//! the event stream.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use linmot_common::config::DriveConfig;
use linmot_common::events::DriveEvent;
use linmot_common::rstalk::RegisterValue;
use linmot_common::state::ConnectionState;
use linmot_common::units::Position;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config_channel::{CancelToken, ConfigChannel};
use crate::cycle::{CycleRunner, CycleShared, CycleSnapshot, rt_setup};
use crate::cyclic::CyclicChannel;
use crate::error::{DriveError, TransportError};
use crate::events::EventBus;
use crate::handshake::{self, HandshakeResult};
use crate::motion::{MotionStateMachine, OperatorCommand};

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub handshake: Option<HandshakeResult>,
    pub cycle: CycleSnapshot,
}

struct CyclicHandle {
    commands: Sender<OperatorCommand>,
    thread: JoinHandle<Result<(), DriveError>>,
}

pub struct DriveSession {
    config: DriveConfig,
    shared: CycleShared,
    config_channel: Option<ConfigChannel>,
    cyclic: Option<CyclicHandle>,
    handshake: Option<HandshakeResult>,
}

impl DriveSession {
    pub fn new(config: DriveConfig) -> Self {
        Self {
            config,
            shared: CycleShared::new(EventBus::new()),
            config_channel: None,
            cyclic: None,
            handshake: None,
        }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.connection()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<DriveEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.state(),
            handshake: self.handshake.clone(),
            cycle: self.shared.snapshot.read().clone(),
        }
    }

    /// Point the session at `config_addr` (the drive's register service) and connect.
    ///
    /// The cyclic port stays as configured.
    pub fn connect_to(&mut self, config_addr: SocketAddr) -> Result<HandshakeResult, DriveError> {
        self.config.drive.address = config_addr.ip().to_string();
        self.config.drive.config_port = config_addr.port();
        self.connect()
    }

    /// Handshake and start the cyclic thread.
    ///
    /// On failure the session stays Disconnected. Incompatible firmware is
    /// never retried.
    pub fn connect(&mut self) -> Result<HandshakeResult, DriveError> {
        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected => {
                if let Some(result) = &self.handshake {
                    return Ok(result.clone());
                }
            }
            ConnectionState::Handshaking => return Err(DriveError::NotConnected),
            ConnectionState::Faulted => return Err(DriveError::SessionFaulted),
        }

        self.shared.set_connection(ConnectionState::Handshaking);
        match self.try_connect() {
            Ok(result) => Ok(result),
            Err(e) => {
                self.teardown();
                self.shared.set_connection(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn try_connect(&mut self) -> Result<HandshakeResult, DriveError> {
        let channel = ConfigChannel::connect(&self.config.drive, &self.config.config_channel)?;
        let min_firmware = self.config.handshake.min_firmware()?;
        let attempts = self.config.handshake.attempts.max(1);

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match handshake::perform(&channel, self.config.cyclic.cycle_time_us, min_firmware) {
                Ok(result) => break result,
                Err(e) => {
                    warn!(attempt, error = %e, "handshake failed");
                    self.shared.events.publish(DriveEvent::HandshakeFailed {
                        attempt,
                        reason: e.to_string(),
                    });
                    if attempt >= attempts || matches!(e, DriveError::IncompatibleFirmware { .. }) {
                        return Err(e);
                    }
                }
            }
        };

        info!(
            firmware = %result.firmware,
            device_id = %result.device_id,
            cycle_time_us = result.cycle_time_us,
            "handshake complete"
        );
        self.shared.events.publish(DriveEvent::HandshakeSucceeded {
            firmware: result.firmware,
            device_id: result.device_id.clone(),
            cycle_time_us: result.cycle_time_us,
        });

        self.config_channel = Some(channel);
        self.start_cyclic(result.cycle_time_us)?;
        self.handshake = Some(result.clone());
        Ok(result)
    }

    fn start_cyclic(&mut self, cycle_time_us: u32) -> Result<(), DriveError> {
        let period = Duration::from_micros(u64::from(cycle_time_us));
        let channel = CyclicChannel::connect(&self.config.drive, &self.config.cyclic, period)?;
        let motion = MotionStateMachine::new(&self.config.motion);
        let (tx, rx) = mpsc::channel();

        *self.shared.snapshot.write() = CycleSnapshot::default();
        self.shared.running.store(true, Ordering::Release);
        let mut runner = CycleRunner::new(
            channel,
            motion,
            rx,
            self.shared.clone(),
            self.config.cyclic.jitter_tolerance_percent,
        );
        let rt = self.config.rt.clone();
        let shared = self.shared.clone();

        // Before the first cycle: the runner may set Faulted from then on.
        self.shared.set_connection(ConnectionState::Connected);
        let thread = std::thread::Builder::new()
            .name("linmot-cyclic".to_string())
            .spawn(move || {
                if let Err(e) = rt_setup(rt.cpu_core, rt.priority, rt.lock_memory) {
                    error!(error = %e, "RT setup failed");
                    shared.set_connection(ConnectionState::Faulted);
                    return Err(DriveError::from(e));
                }
                runner.run()
            })
            .map_err(|e| DriveError::Transport(e.into()))?;

        self.cyclic = Some(CyclicHandle {
            commands: tx,
            thread,
        });
        Ok(())
    }

    /// Stop the cyclic thread and drop both channels.
    fn teardown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.cyclic.take() {
            drop(handle.commands);
            match handle.thread.join() {
                Ok(Ok(())) => debug!("cyclic thread stopped"),
                Ok(Err(e)) => warn!(error = %e, "cyclic thread ended with error"),
                Err(_) => error!("cyclic thread panicked"),
            }
        }
        self.config_channel = None;
    }

    /// Stop cyclic traffic and return to Disconnected.
    pub fn disconnect(&mut self) {
        if self.state() == ConnectionState::Disconnected && self.cyclic.is_none() {
            return;
        }
        self.teardown();
        self.handshake = None;
        self.shared.set_connection(ConnectionState::Disconnected);
        info!("session disconnected");
    }

    /// Leave Faulted and re-run the handshake.
    pub fn reset(&mut self) -> Result<HandshakeResult, DriveError> {
        info!(state = %self.state(), "session reset requested");
        self.disconnect();
        self.connect()
    }

    fn channel(&self) -> Result<&ConfigChannel, DriveError> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Faulted => return Err(DriveError::SessionFaulted),
            ConnectionState::Disconnected | ConnectionState::Handshaking => {
                return Err(DriveError::NotConnected);
            }
        }
        self.config_channel.as_ref().ok_or(DriveError::NotConnected)
    }

    /// A socket error on the register channel faults the whole session, like
    /// one on the cyclic channel. Timeouts and drive refusals do not.
    fn fault_on_socket_error<R>(&self, result: Result<R, DriveError>) -> Result<R, DriveError> {
        if let Err(DriveError::Transport(TransportError::Io(e))) = &result {
            error!(error = %e, "configuration channel failed");
            self.shared.set_connection(ConnectionState::Faulted);
        }
        result
    }

    pub fn read_register(&self, index: u16, subindex: u8) -> Result<RegisterValue, DriveError> {
        self.fault_on_socket_error(self.channel()?.read_register(index, subindex))
    }

    pub fn write_register(
        &self,
        index: u16,
        subindex: u8,
        value: RegisterValue,
    ) -> Result<(), DriveError> {
        self.fault_on_socket_error(self.channel()?.write_register(index, subindex, value))
    }

    pub fn read_register_cancellable(
        &self,
        index: u16,
        subindex: u8,
        cancel: &CancelToken,
    ) -> Result<RegisterValue, DriveError> {
        let result = self.channel()?.read_register_cancellable(index, subindex, cancel);
        self.fault_on_socket_error(result)
    }

    pub fn write_register_cancellable(
        &self,
        index: u16,
        subindex: u8,
        value: RegisterValue,
        cancel: &CancelToken,
    ) -> Result<(), DriveError> {
        let result = self
            .channel()?
            .write_register_cancellable(index, subindex, value, cancel);
        self.fault_on_socket_error(result)
    }

    fn command(&self, command: OperatorCommand) -> Result<(), DriveError> {
        self.channel()?;
        let handle = self.cyclic.as_ref().ok_or(DriveError::NotConnected)?;
        debug!(command = command.name(), "operator command");
        handle
            .commands
            .send(command)
            .map_err(|_| DriveError::NotConnected)
    }

    pub fn enable(&self) -> Result<(), DriveError> {
        self.command(OperatorCommand::Enable)
    }

    pub fn disable(&self) -> Result<(), DriveError> {
        self.command(OperatorCommand::Disable)
    }

    pub fn home(&self) -> Result<(), DriveError> {
        self.command(OperatorCommand::Home)
    }

    pub fn move_to(&self, target: Position) -> Result<(), DriveError> {
        self.command(OperatorCommand::MoveTo(target))
    }

    pub fn stop(&self) -> Result<(), DriveError> {
        self.command(OperatorCommand::Stop)
    }

    /// Acknowledge a drive fault.
    pub fn fault_reset(&self) -> Result<(), DriveError> {
        self.command(OperatorCommand::FaultAcknowledge)
    }
}

impl Drop for DriveSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

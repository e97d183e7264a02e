//! Cyclic thread: exchange → motion update → publish, once per period.
//!
//! ## RT Setup
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` when configured.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` to the configured core.
//! 4. `sched_setscheduler(SCHED_FIFO, priority)`.
//!
//! All calls are no-ops without the `rt` feature.
//!
//! ## Pacing
//! With `rt`: absolute `clock_nanosleep(TIMER_ABSTIME)` on `CLOCK_MONOTONIC`.
//! Without: `std::thread::sleep` to an absolute `Instant` deadline. A late
//! cycle realigns the schedule instead of bursting to catch up.
//!
//! ## Cycle Body
//! Take the latest operator command → exchange the control frame → feed the
//! decoded status to the motion state machine → publish the snapshot.
//! Events leave through the non-blocking [`EventSender`]; logging and
//! fan-out happen on the dispatcher thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use linmot_common::consts::CYCLE_HISTORY_LEN;
use linmot_common::events::DriveEvent;
use linmot_common::linudp::{DEFAULT_RESPONSE_FLAGS, DriveState, ErrorCode, StatusResponse};
use linmot_common::state::{ConnectionState, FaultReason, MotionState};
use linmot_common::units::{Current, Position};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::cyclic::{CyclicChannel, CyclicStats};
use crate::error::DriveError;
use crate::events::{EventBus, EventSender};
use crate::motion::{ControlOutput, DriveStatus, MotionStateMachine, OperatorCommand};
use crate::transport::Transport;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CycleStats {
    pub cycle_count: u64,
    /// Last cycle body duration [ns].
    pub last_cycle_ns: i64,
    pub min_cycle_ns: i64,
    pub max_cycle_ns: i64,
    pub sum_cycle_ns: i64,
    /// Cycles whose body ran past the period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns] (actual minus scheduled wake).
    pub max_latency_ns: i64,
    /// Cycles without a valid status frame.
    pub misses: u64,
    /// Cycles whose wake-up latency exceeded the jitter tolerance.
    pub jitter_violations: u64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
            misses: 0,
            jitter_violations: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns = self.sum_cycle_ns.saturating_add(duration_ns);
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    /// Average cycle time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────

/// Read-only view of the cyclic state, republished every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSnapshot {
    pub cycle: u64,
    pub motion_state: MotionState,
    pub fault: Option<FaultReason>,
    pub status_word: u16,
    pub warning_word: u16,
    pub drive_state: Option<DriveState>,
    pub actual_position: Option<Position>,
    pub demand_position: Option<Position>,
    pub current: Option<Current>,
    pub error_code: Option<ErrorCode>,
    pub consecutive_misses: u32,
    pub link_faulted: bool,
    pub link: CyclicStats,
    pub timing: CycleStats,
}

impl CycleSnapshot {
    fn apply_status(&mut self, status: &StatusResponse) {
        self.status_word = status.status_flags.map_or(0, |f| f.bits());
        self.warning_word = status.warning_flags.map_or(0, |f| f.bits());
        self.drive_state = status.state;
        self.actual_position = status.actual_position;
        self.demand_position = status.demand_position;
        self.current = status.current;
        self.error_code = status.error_code;
    }
}

/// One entry of the recent fault history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaultRecord {
    pub cycle: u64,
    pub reason: FaultReason,
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Errors during RT setup.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("RT setup error: {0}")]
    RtSetup(String),
}

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch 256 KiB of stack so the loop never page-faults on it.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Full RT setup for the calling thread.
pub fn rt_setup(cpu_core: Option<usize>, rt_priority: i32, lock_memory: bool) -> Result<(), CycleError> {
    if lock_memory {
        rt_mlockall()?;
    }
    prefault_stack();
    if let Some(cpu) = cpu_core {
        rt_set_affinity(cpu)?;
    }
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Handles shared between the runner thread and the session.
#[derive(Clone)]
pub struct CycleShared {
    pub snapshot: Arc<RwLock<CycleSnapshot>>,
    pub connection: Arc<AtomicU8>,
    pub running: Arc<AtomicBool>,
    pub events: EventBus,
}

impl CycleShared {
    pub fn new(events: EventBus) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(CycleSnapshot::default())),
            connection: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
            running: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Store `to`; the change event if the state actually changed.
    #[must_use]
    pub fn swap_connection(&self, to: ConnectionState) -> Option<DriveEvent> {
        let from = ConnectionState::from_u8(self.connection.swap(to as u8, Ordering::AcqRel))
            .unwrap_or_default();
        (from != to).then_some(DriveEvent::SessionStateChanged { from, to })
    }

    /// Store `to` and publish the change on the calling thread.
    pub fn set_connection(&self, to: ConnectionState) {
        if let Some(event) = self.swap_connection(to) {
            info!(state = %to, "session state changed");
            self.events.publish(event);
        }
    }
}

/// Owns the cyclic channel and motion state machine on the cyclic thread.
pub struct CycleRunner<T: Transport> {
    channel: CyclicChannel<T>,
    motion: MotionStateMachine,
    commands: Receiver<OperatorCommand>,
    shared: CycleShared,
    events: EventSender,
    output: ControlOutput,
    stats: CycleStats,
    snapshot: CycleSnapshot,
    faults: heapless::Deque<FaultRecord, CYCLE_HISTORY_LEN>,
    cycle_time_ns: i64,
    jitter_tolerance_ns: i64,
}

impl<T: Transport> CycleRunner<T> {
    pub fn new(
        channel: CyclicChannel<T>,
        motion: MotionStateMachine,
        commands: Receiver<OperatorCommand>,
        shared: CycleShared,
        jitter_tolerance_percent: u8,
    ) -> Self {
        let cycle_time_ns = channel.period().as_nanos() as i64;
        let output = motion.output();
        let events = shared.events.sender();
        Self {
            channel,
            motion,
            commands,
            shared,
            events,
            output,
            stats: CycleStats::new(),
            snapshot: CycleSnapshot::default(),
            faults: heapless::Deque::new(),
            cycle_time_ns,
            jitter_tolerance_ns: cycle_time_ns * i64::from(jitter_tolerance_percent) / 100,
        }
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn motion(&self) -> &MotionStateMachine {
        &self.motion
    }

    /// Recent faults, oldest first.
    pub fn fault_history(&self) -> impl Iterator<Item = &FaultRecord> {
        self.faults.iter()
    }

    /// Run until the shared `running` flag clears or the transport fails.
    pub fn run(&mut self) -> Result<(), DriveError> {
        info!(
            cycle_time_us = self.cycle_time_ns / 1_000,
            jitter_tolerance_us = self.jitter_tolerance_ns / 1_000,
            "cyclic loop starting"
        );

        #[cfg(feature = "rt")]
        let result = self.run_rt_loop();

        #[cfg(not(feature = "rt"))]
        let result = self.run_sim_loop();

        info!(
            cycles = self.stats.cycle_count,
            avg_us = self.stats.avg_cycle_ns() / 1_000,
            max_us = self.stats.max_cycle_ns / 1_000,
            max_latency_us = self.stats.max_latency_ns / 1_000,
            misses = self.stats.misses,
            jitter_violations = self.stats.jitter_violations,
            "cyclic loop stopped"
        );
        result
    }

    /// RT loop using `clock_nanosleep(TIMER_ABSTIME)`.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self) -> Result<(), DriveError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let now = || {
            clock_gettime(clock).map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))
        };
        let mut next_wake = now()?;

        while self.shared.running.load(Ordering::Acquire) {
            let cycle_start = now()?;
            let latency_ns = timespec_diff_ns(&cycle_start, &next_wake);
            next_wake = timespec_add_ns(next_wake, self.cycle_time_ns);

            let budget = timespec_diff_ns(&next_wake, &cycle_start).max(0);
            self.cycle_body(Duration::from_nanos(budget as u64))?;

            let cycle_end = now()?;
            let duration_ns = timespec_diff_ns(&cycle_end, &cycle_start);
            self.finish_cycle(duration_ns, latency_ns);

            if timespec_diff_ns(&cycle_end, &next_wake) > 0 {
                // Late: realign instead of bursting.
                next_wake = cycle_end;
                continue;
            }
            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
        Ok(())
    }

    /// Portable loop using `std::thread::sleep`.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self) -> Result<(), DriveError> {
        use std::time::Instant;

        let period = Duration::from_nanos(self.cycle_time_ns as u64);
        let mut next_wake = Instant::now();

        while self.shared.running.load(Ordering::Acquire) {
            let cycle_start = Instant::now();
            let latency_ns = cycle_start.saturating_duration_since(next_wake).as_nanos() as i64;
            next_wake += period;

            let budget = next_wake.saturating_duration_since(cycle_start);
            self.cycle_body(budget)?;

            let duration_ns = cycle_start.elapsed().as_nanos() as i64;
            self.finish_cycle(duration_ns, latency_ns);

            let now = Instant::now();
            if now >= next_wake {
                trace!(late_us = (now - next_wake).as_micros() as u64, "late cycle, realigning");
                next_wake = now;
                continue;
            }
            std::thread::sleep(next_wake - now);
        }
        Ok(())
    }

    /// Take the latest command, exchange, update motion, publish.
    fn cycle_body(&mut self, budget: Duration) -> Result<(), DriveError> {
        let cycle = self.stats.cycle_count;

        // Latest command per cycle wins.
        let mut latest = None;
        while let Ok(command) = self.commands.try_recv() {
            latest = Some(command);
        }
        if let Some(command) = latest {
            self.motion.submit(command);
            self.output = self.motion.output();
        }

        let request = self.output.to_request(DEFAULT_RESPONSE_FLAGS);
        match self.channel.exchange_within(&request, budget) {
            Ok(status) => {
                self.output = self.motion.update(&DriveStatus::from_status(&status));
                self.snapshot.apply_status(&status);
            }
            Err(DriveError::CycleMissed) => {
                self.stats.misses += 1;
                self.events.send(DriveEvent::CycleMissed {
                    cycle,
                    consecutive: self.channel.consecutive_misses(),
                });
            }
            Err(DriveError::LinkFaulted) => {
                self.stats.misses += 1;
                let consecutive = self.channel.consecutive_misses();
                self.events.send(DriveEvent::CycleMissed { cycle, consecutive });
                self.events.send(DriveEvent::LinkFaulted { consecutive });
                self.motion.force_fault(FaultReason::LinkLost);
                self.output = self.motion.output();
                self.fault_session();
            }
            Err(DriveError::Frame(e)) => {
                warn!(error = %e, "control frame not encodable");
            }
            Err(e) => {
                error!(error = %e, "cyclic transport failed");
                self.motion.force_fault(FaultReason::LinkLost);
                self.drain_motion_events(cycle);
                self.fault_session();
                self.publish_snapshot(cycle);
                return Err(e);
            }
        }

        self.drain_motion_events(cycle);
        self.publish_snapshot(cycle);
        Ok(())
    }

    fn finish_cycle(&mut self, duration_ns: i64, latency_ns: i64) {
        self.stats.record(duration_ns, latency_ns);
        if duration_ns > self.cycle_time_ns {
            self.stats.overruns += 1;
            debug!(duration_ns, budget_ns = self.cycle_time_ns, "cycle overrun");
        }
        if self.jitter_tolerance_ns > 0 && latency_ns > self.jitter_tolerance_ns {
            self.stats.jitter_violations += 1;
            self.events.send(DriveEvent::JitterExceeded {
                cycle: self.stats.cycle_count,
                latency_us: (latency_ns / 1_000) as u64,
                tolerance_us: (self.jitter_tolerance_ns / 1_000) as u64,
            });
        }
    }

    fn drain_motion_events(&mut self, cycle: u64) {
        for event in self.motion.take_events() {
            if let DriveEvent::FaultEntered { reason } = event {
                if self.faults.is_full() {
                    self.faults.pop_front();
                }
                let _ = self.faults.push_back(FaultRecord { cycle, reason });
            }
            self.events.send(event);
        }
    }

    fn fault_session(&self) {
        if let Some(event) = self.shared.swap_connection(ConnectionState::Faulted) {
            self.events.send(event);
        }
    }

    fn publish_snapshot(&mut self, cycle: u64) {
        self.snapshot.cycle = cycle;
        self.snapshot.motion_state = self.motion.state();
        self.snapshot.fault = self.motion.fault();
        self.snapshot.consecutive_misses = self.channel.consecutive_misses();
        self.snapshot.link_faulted = self.channel.is_link_faulted();
        self.snapshot.link = self.channel.stats();
        self.snapshot.timing = self.stats;
        // Never block the cyclic thread on a reader.
        if let Some(mut guard) = self.shared.snapshot.try_write() {
            guard.clone_from(&self.snapshot);
        }
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let total = ts.tv_nsec() + ns;
    let secs = ts.tv_sec() + total.div_euclid(1_000_000_000);
    let nanos = total.rem_euclid(1_000_000_000);
    TimeSpec::new(secs, nanos)
}

/// `a - b` in nanoseconds.
#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

// ─── Tests ──────────────────────────────────────────────────────────

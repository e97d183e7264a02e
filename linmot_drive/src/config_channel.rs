//! Configuration channel: request/response register access.
//!
//! One request in flight at a time. Concurrent callers queue on the channel
//! mutex. A request is retransmitted with the same sequence number and an
//! exponential backoff seeded from the smoothed round-trip estimate, so a
//! late reply to an earlier transmission still resolves the call. Replies
//! carrying any other sequence number are stale and discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use linmot_common::config::{ConfigChannelConfig, LinkConfig};
use linmot_common::frame::{Frame, FrameCodec, FrameError, MAX_FRAME_LEN, Message};
use linmot_common::rstalk::{
    AccessMode, RegisterAddress, RegisterRead, RegisterReply, RegisterStatus, RegisterValue,
    RegisterWrite, registers,
};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{DriveError, TransportError};
use crate::transport::{Transport, UdpTransport, local_bind_addr};

/// Granularity at which a blocked request notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(5);

// ─── Cancellation ───────────────────────────────────────────────────

/// Shared flag that aborts a pending configuration request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ─── Round-trip estimate ────────────────────────────────────────────

/// Smoothed round-trip time: `srtt = 7/8 srtt + 1/8 sample`, clamped.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    srtt: Duration,
    min: Duration,
    max: Duration,
}

impl RttEstimator {
    pub fn new(initial: Duration, min: Duration, max: Duration) -> Self {
        Self {
            srtt: initial.clamp(min, max),
            min,
            max,
        }
    }

    pub fn sample(&mut self, rtt: Duration) {
        let smoothed = (self.srtt * 7 + rtt) / 8;
        self.srtt = smoothed.clamp(self.min, self.max);
    }

    /// First retransmission timeout.
    #[inline]
    pub fn estimate(&self) -> Duration {
        self.srtt
    }

    /// Backoff after `retries` timeouts, doubled each time up to the maximum.
    pub fn backoff(&self, retries: u32) -> Duration {
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        self.srtt.saturating_mul(factor).min(self.max)
    }
}

// ─── Channel ────────────────────────────────────────────────────────

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChannelStats {
    pub requests: u64,
    pub transmissions: u64,
    pub timeouts: u64,
    pub stale_replies: u64,
    pub undecodable: u64,
}

/// The single pending request. Capacity one.
#[derive(Debug, Clone, Copy)]
struct Pending {
    sequence: u16,
    address: RegisterAddress,
}

struct Inner<T> {
    transport: T,
    next_sequence: u16,
    pending: Option<Pending>,
    rtt: RttEstimator,
    last_read: Option<(RegisterAddress, RegisterValue)>,
    stats: ConfigChannelStats,
    rx_buf: [u8; MAX_FRAME_LEN],
}

/// Register read/write channel over its own transport.
pub struct ConfigChannel<T: Transport = UdpTransport> {
    inner: Mutex<Inner<T>>,
    codec: FrameCodec,
    attempts: u32,
}

impl ConfigChannel<UdpTransport> {
    /// Open the channel to the drive configured in `link`.
    pub fn connect(link: &LinkConfig, config: &ConfigChannelConfig) -> Result<Self, DriveError> {
        let peer = link.config_addr()?;
        let transport = UdpTransport::connect(local_bind_addr(&peer, link.local_config_port), peer)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> ConfigChannel<T> {
    pub fn new(transport: T, config: &ConfigChannelConfig) -> Self {
        let rtt = RttEstimator::new(
            Duration::from_millis(config.initial_rtt_ms),
            Duration::from_millis(config.min_rtt_ms),
            Duration::from_millis(config.max_backoff_ms),
        );
        Self {
            inner: Mutex::new(Inner {
                transport,
                next_sequence: 0,
                pending: None,
                rtt,
                last_read: None,
                stats: ConfigChannelStats::default(),
                rx_buf: [0; MAX_FRAME_LEN],
            }),
            codec: FrameCodec::new(config.checksum),
            attempts: config.attempts.max(1),
        }
    }

    /// Read a register.
    pub fn read_register(&self, index: u16, subindex: u8) -> Result<RegisterValue, DriveError> {
        self.read_register_cancellable(index, subindex, &CancelToken::new())
    }

    pub fn read_register_cancellable(
        &self,
        index: u16,
        subindex: u8,
        cancel: &CancelToken,
    ) -> Result<RegisterValue, DriveError> {
        let address = RegisterAddress::new(index, subindex);
        let reply = self.request(Message::RegisterRead(RegisterRead { address }), address, cancel)?;
        let value = reply.value.ok_or(FrameError::MalformedFrame {
            reason: "read reply without value",
        })?;
        debug!(%address, %value, "register read");
        self.inner.lock().last_read = Some((address, value.clone()));
        Ok(value)
    }

    /// Write a register. Returns once the drive acknowledges.
    pub fn write_register(
        &self,
        index: u16,
        subindex: u8,
        value: RegisterValue,
    ) -> Result<(), DriveError> {
        self.write_register_cancellable(index, subindex, value, &CancelToken::new())
    }

    pub fn write_register_cancellable(
        &self,
        index: u16,
        subindex: u8,
        value: RegisterValue,
        cancel: &CancelToken,
    ) -> Result<(), DriveError> {
        let address = RegisterAddress::new(index, subindex);
        if registers::lookup(address).is_some_and(|d| d.access == AccessMode::ReadOnly) {
            debug!(%address, "write to read-only register refused locally");
            return Err(DriveError::RegisterError {
                address,
                code: RegisterStatus::READ_ONLY,
            });
        }
        debug!(%address, %value, "register write");
        self.request(
            Message::RegisterWrite(RegisterWrite { address, value }),
            address,
            cancel,
        )?;
        Ok(())
    }

    /// Most recent successful read.
    pub fn last_read(&self) -> Option<(RegisterAddress, RegisterValue)> {
        self.inner.lock().last_read.clone()
    }

    pub fn stats(&self) -> ConfigChannelStats {
        self.inner.lock().stats
    }

    pub fn rtt_estimate(&self) -> Duration {
        self.inner.lock().rtt.estimate()
    }

    /// Send `message` and block until the matching reply, cancellation or
    /// the retry budget runs out.
    fn request(
        &self,
        message: Message,
        address: RegisterAddress,
        cancel: &CancelToken,
    ) -> Result<RegisterReply, DriveError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let sequence = inner.next_sequence;
        inner.next_sequence = inner.next_sequence.wrapping_add(1);
        inner.pending = Some(Pending { sequence, address });
        inner.stats.requests += 1;

        let datagram = match self.codec.encode(&Frame::new(sequence, message)) {
            Ok(bytes) => bytes,
            Err(e) => {
                inner.pending = None;
                return Err(e.into());
            }
        };

        let result = self.transact(inner, &datagram, cancel);
        inner.pending = None;

        let reply = result?;
        if reply.status.is_ok() {
            Ok(reply)
        } else {
            warn!(%address, status = %reply.status, "drive rejected register access");
            Err(DriveError::RegisterError {
                address,
                code: reply.status,
            })
        }
    }

    fn transact(
        &self,
        inner: &mut Inner<T>,
        datagram: &[u8],
        cancel: &CancelToken,
    ) -> Result<RegisterReply, DriveError> {
        for attempt in 0..self.attempts {
            let wait = inner.rtt.backoff(attempt);
            let sent_at = Instant::now();
            inner.transport.send(datagram)?;
            inner.stats.transmissions += 1;
            if attempt > 0 {
                debug!(attempt = attempt + 1, wait_ms = wait.as_millis() as u64, "retransmitting request");
            }

            let deadline = sent_at + wait;
            loop {
                if cancel.is_cancelled() {
                    debug!("request cancelled");
                    return Err(DriveError::Cancelled);
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let slice = (deadline - now).min(CANCEL_POLL);
                let len = match inner.transport.receive(&mut inner.rx_buf, slice) {
                    Ok(len) => len,
                    Err(TransportError::Timeout) => continue,
                    Err(e) => return Err(e.into()),
                };
                if let Some(reply) = Self::accept(inner, &self.codec, len) {
                    // Only unambiguous samples feed the estimate.
                    if attempt == 0 {
                        inner.rtt.sample(sent_at.elapsed());
                    }
                    return Ok(reply);
                }
            }
            inner.stats.timeouts += 1;
        }

        warn!(attempts = self.attempts, "configuration request timed out");
        Err(DriveError::RequestTimeout {
            attempts: self.attempts,
        })
    }

    /// Match a received datagram against the pending request.
    fn accept(inner: &mut Inner<T>, codec: &FrameCodec, len: usize) -> Option<RegisterReply> {
        let pending = inner.pending?;
        let frame = match codec.decode(&inner.rx_buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                inner.stats.undecodable += 1;
                debug!(error = %e, "discarding undecodable datagram");
                return None;
            }
        };
        match frame.message {
            Message::RegisterReply(reply)
                if frame.sequence == pending.sequence && reply.address == pending.address =>
            {
                Some(reply)
            }
            _ => {
                inner.stats.stale_replies += 1;
                trace!(
                    sequence = frame.sequence,
                    expected = pending.sequence,
                    "discarding stale reply"
                );
                None
            }
        }
    }
}

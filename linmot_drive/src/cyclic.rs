//! Cyclic channel: one control frame out, one status frame back, per cycle.
//!
//! The drive echoes the sequence number of the control frame it answers.
//! Only that exact echo completes an exchange. Older echoes are stale,
//! anything else is unexpected; both are dropped and the exchange keeps
//! waiting until its deadline. Missed control frames are never retransmitted.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use linmot_common::config::{CyclicConfig, LinkConfig};
use linmot_common::frame::{Frame, FrameCodec, MAX_FRAME_LEN, Message};
use linmot_common::linudp::{ControlRequest, StatusResponse};
use tracing::{debug, trace, warn};

use crate::error::{DriveError, TransportError};
use crate::transport::{Transport, UdpTransport, local_bind_addr};

/// Exchange counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CyclicStats {
    pub exchanges: u64,
    pub accepted: u64,
    pub misses: u64,
    pub stale: u64,
    pub unexpected: u64,
    pub undecodable: u64,
}

/// Link to the drive's process-data port.
pub struct CyclicChannel<T: Transport = UdpTransport> {
    transport: T,
    codec: FrameCodec,
    period: Duration,
    miss_threshold: u32,
    next_sequence: u16,
    last_accepted: Option<u16>,
    consecutive_misses: u32,
    link_faulted: bool,
    stats: CyclicStats,
    tx_buf: BytesMut,
    rx_buf: [u8; MAX_FRAME_LEN],
}

impl CyclicChannel<UdpTransport> {
    /// Open the cyclic socket for the drive in `link`, running at `period`.
    pub fn connect(
        link: &LinkConfig,
        config: &CyclicConfig,
        period: Duration,
    ) -> Result<Self, DriveError> {
        let peer = link.cyclic_addr()?;
        let transport =
            UdpTransport::connect(local_bind_addr(&peer, link.local_cyclic_port), peer)?;
        Ok(Self::new(transport, config, period))
    }
}

impl<T: Transport> CyclicChannel<T> {
    pub fn new(transport: T, config: &CyclicConfig, period: Duration) -> Self {
        Self {
            transport,
            codec: FrameCodec::new(config.checksum),
            period,
            miss_threshold: config.miss_threshold.max(1),
            next_sequence: 0,
            last_accepted: None,
            consecutive_misses: 0,
            link_faulted: false,
            stats: CyclicStats::default(),
            tx_buf: BytesMut::with_capacity(MAX_FRAME_LEN),
            rx_buf: [0; MAX_FRAME_LEN],
        }
    }

    /// Exchange within one cycle period.
    pub fn exchange(&mut self, request: &ControlRequest) -> Result<StatusResponse, DriveError> {
        self.exchange_within(request, self.period)
    }

    /// Send `request` and wait up to `timeout` for its status frame.
    ///
    /// A miss returns [`DriveError::CycleMissed`], except the miss that
    /// reaches the threshold, which returns [`DriveError::LinkFaulted`]
    /// exactly once.
    pub fn exchange_within(
        &mut self,
        request: &ControlRequest,
        timeout: Duration,
    ) -> Result<StatusResponse, DriveError> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.stats.exchanges += 1;

        self.tx_buf.clear();
        let frame = Frame::new(sequence, Message::Control(request.clone()));
        self.codec.encode_into(&frame, &mut self.tx_buf)?;
        self.transport.send(&self.tx_buf)?;

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.record_miss());
            }
            let len = match self.transport.receive(&mut self.rx_buf, deadline - now) {
                Ok(len) => len,
                Err(TransportError::Timeout) => return Err(self.record_miss()),
                Err(e) => return Err(e.into()),
            };
            if let Some(status) = self.accept(sequence, len) {
                if self.consecutive_misses > 0 {
                    debug!(misses = self.consecutive_misses, "cyclic link recovered");
                }
                self.consecutive_misses = 0;
                self.last_accepted = Some(sequence);
                self.stats.accepted += 1;
                return Ok(status);
            }
        }
    }

    fn accept(&mut self, sequence: u16, len: usize) -> Option<StatusResponse> {
        let frame = match self.codec.decode(&self.rx_buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.undecodable += 1;
                debug!(error = %e, "discarding undecodable status datagram");
                return None;
            }
        };
        match frame.message {
            Message::Status(status) if frame.sequence == sequence => Some(status),
            Message::Status(_) if is_older(frame.sequence, sequence) => {
                self.stats.stale += 1;
                trace!(sequence = frame.sequence, expected = sequence, "stale status frame");
                None
            }
            _ => {
                self.stats.unexpected += 1;
                trace!(sequence = frame.sequence, expected = sequence, "unexpected frame");
                None
            }
        }
    }

    fn record_miss(&mut self) -> DriveError {
        self.stats.misses += 1;
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        if !self.link_faulted && self.consecutive_misses >= self.miss_threshold {
            self.link_faulted = true;
            warn!(consecutive = self.consecutive_misses, "cyclic link faulted");
            DriveError::LinkFaulted
        } else {
            DriveError::CycleMissed
        }
    }

    #[inline]
    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    #[inline]
    pub fn is_link_faulted(&self) -> bool {
        self.link_faulted
    }

    /// Sequence number of the last accepted exchange.
    pub fn last_accepted(&self) -> Option<u16> {
        self.last_accepted
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> CyclicStats {
        self.stats
    }

    /// Clear the fault latch and miss counter.
    pub fn reset_link(&mut self) {
        self.link_faulted = false;
        self.consecutive_misses = 0;
    }
}

/// `a` precedes `b` in wrapping u16 sequence order.
#[inline]
fn is_older(a: u16, b: u16) -> bool {
    let diff = b.wrapping_sub(a);
    diff != 0 && diff < 0x8000
}

//! # LinMot Drive Link
//!
//! Master-side runtime for a LinMot servo drive over UDP. Two channels share
//! one drive:
//!
//! - **Configuration channel**: request/response register access with
//!   retransmission and an adaptive timeout ([`config_channel`]).
//! - **Cyclic channel**: one control frame out, one status frame back, every
//!   cycle, on a dedicated thread ([`cyclic`], [`cycle`]).
//!
//! ## Layers
//!
//! 1. [`transport`]: datagram socket behind the [`transport::Transport`] seam
//! 2. [`config_channel`] / [`cyclic`]: protocol engines over a transport
//! 3. [`handshake`]: firmware check, identity and cycle-time negotiation
//! 4. [`motion`]: per-cycle motion state machine (status in, control out)
//! 5. [`cycle`]: the periodic loop, RT setup, statistics and snapshots
//! 6. [`session`]: connection lifecycle and the operator surface
//!
//! [`sim`] provides a loopback drive for tests and `--simulate`.
//!
//! ## Threads
//!
//! The cyclic thread owns the cyclic channel and the motion state machine.
//! Operator commands reach it over an mpsc queue; state flows back through
//! an atomically published snapshot and the [`events`] bus.

pub mod config;
pub mod config_channel;
pub mod cycle;
pub mod cyclic;
pub mod error;
pub mod events;
pub mod handshake;
pub mod motion;
pub mod session;
pub mod sim;
pub mod transport;

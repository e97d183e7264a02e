//! LinMot Common Library
//!
//! Wire formats, drive types and configuration shared by the drive link
//! runtime and its tools.
//!
//! # Module Structure
//!
//! - [`frame`] - Frame header, checksum and the [`frame::FrameCodec`]
//! - [`linudp`] - Cyclic process-data payloads (control/status words, motion commands)
//! - [`rstalk`] - Register channel payloads and the well-known register catalog
//! - [`units`] - Position/velocity/acceleration/current newtypes
//! - [`state`] - Connection and motion state enums
//! - [`events`] - Diagnostic events
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use linmot_common::prelude::*;
//!
//! let codec = FrameCodec::new(false);
//! let frame = Frame::new(
//!     1,
//!     Message::RegisterRead(RegisterRead { address: registers::FIRMWARE_VERSION }),
//! );
//! let bytes = codec.encode(&frame).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), frame);
//! ```

pub mod config;
pub mod consts;
pub mod events;
pub mod frame;
pub mod linudp;
pub mod prelude;
pub mod rstalk;
pub mod state;
pub mod units;
pub mod wire;

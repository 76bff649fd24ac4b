//! Wire protocol shared between the relay server and every client.
//!
//! This crate owns the message tag space, the semantic [`Frame`] union, and
//! the binary codec that turns a [`Frame`] into `(tag: u8, payload: bytes)`
//! and back. Tag numbers are stable across releases; new tags are appended,
//! never renumbered.

pub mod codec;
pub mod error;
pub mod frame;
pub mod quantize;
pub mod tags;
pub mod types;
pub mod wire;

pub use error::DecodeError;
#[cfg(feature = "debug-text-codec")]
pub use error::TextDecodeError;
pub use frame::Frame;

/// The buffer size used for per-participant outbound channels and the room's
/// inbound request channel.
pub const CHANNEL_BUFFER_SIZE: usize = 256;

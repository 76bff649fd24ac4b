//! Client-side networking for the creature game: a server-time clock, a
//! per-entity position buffer with interpolation, a send-rate/delta
//! scheduler for outbound transforms, and a thin websocket transport over
//! [`protocol::Frame`]. There is no client-hosted authoritative game logic
//! here to dispatch into — the only "host" concept is bookkeeping mirrored
//! from the server's `HostAssigned`/`HostChanged` frames.

pub mod clock;
pub mod connection;
pub mod position_buffer;
pub mod send_scheduler;
pub mod socket;

pub use clock::NetworkClock;
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use position_buffer::{PositionBuffer, Sample};
pub use send_scheduler::{OutgoingPosition, SendScheduler};

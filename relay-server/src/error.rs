//! Typed error taxonomy for everything that can go wrong once a client is
//! past the handshake. None of these ever propagate past the [`crate::connection::Connection`]
//! that raised them — a Room survives any single connection's misbehavior.

use thiserror::Error;

/// A well-formed frame arrived in the wrong state (e.g. `POSITION` before
/// `JOIN_GAME`, `NPC_SNAPSHOT` from a non-host). Policy: drop the frame,
/// tick the connection's bad-frame counter, close on sustained abuse.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("tag {tag:#04x} received before JOIN_GAME")]
    NotJoinedYet { tag: u8 },
    #[error("NPC_SNAPSHOT submitted by a non-host participant")]
    NotHost,
    #[error("prism id {0:?} already exists")]
    DuplicatePrism(String),
    #[error("prism {0:?} is not owned by the requester")]
    NotPrismOwner(String),
    #[error("no such prism {0:?}")]
    NoSuchPrism(String),
    #[error("display name exceeds 32 UTF-8 octets")]
    DisplayNameTooLong,
    #[error("chat text exceeds 256 UTF-8 octets")]
    ChatTooLong,
}

/// Room or outbound queue capacity exceeded.
#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("room {0:?} is at capacity")]
    RoomFull(String),
    #[error("participant outbound queue is full")]
    OutboundQueueFull,
}

/// A deadline elapsed.
#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error("no frame received within the keepalive window")]
    Keepalive,
    #[error("handshake did not complete within the deadline")]
    Handshake,
    #[error("write did not complete within the deadline")]
    Write,
}

/// An internal bug was detected and recovered from. A Room never crashes
/// the process over one of these; it logs and repairs what it can.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("host_id {0:?} refers to a participant no longer in the room")]
    HostMissing(protocol::types::ParticipantId),
}

//! The one-byte message tags. Numeric values are stable across releases;
//! new tags must be appended, never renumbered.

/// C→S: `displayName`, `creature`.
pub const JOIN_GAME: u8 = 0x01;
/// S→C: full room bootstrap for the joiner.
pub const WELCOME: u8 = 0x02;
/// S→C: a new participant joined the room.
pub const PLAYER_JOIN: u8 = 0x03;
/// S→C: a participant left the room.
pub const PLAYER_LEAVE: u8 = 0x04;
/// C→S: one participant's latest transform (and optional world volume).
pub const POSITION: u8 = 0x05;
/// S→C: the periodic batched transform broadcast.
pub const BATCH_POSITIONS: u8 = 0x06;
/// C→S / S→C: creature cosmetic update.
pub const CREATURE_UPDATE: u8 = 0x07;
/// S→C: legacy scale-only update, superseded by `worldVolume` in [`BATCH_POSITIONS`].
pub const SIZE_UPDATE: u8 = 0x08;
/// C→S: client round-trip probe.
pub const PING: u8 = 0x09;
/// S→C: reply to [`PING`].
pub const PONG: u8 = 0x0A;
/// S→C: opaque NPC spawn payload forwarded verbatim from the host.
pub const NPC_SPAWN: u8 = 0x0B;
/// S→C: an NPC has been consumed.
pub const NPC_DEATH: u8 = 0x0C;
/// C→S: a claim that a participant ate an NPC.
pub const EAT_NPC: u8 = 0x0D;
/// S→C: broadcast of an accepted map change (also reused for the rare
/// client-originated variant carrying the same fields; see [`crate::frame::Frame::MapChange`]).
pub const MAP_CHANGE: u8 = 0x0E;
/// C→S: ask the room to roll a new world seed.
pub const REQUEST_MAP_CHANGE: u8 = 0x0F;
/// S→C: tells a freshly joined participant whether it is the host.
pub const HOST_ASSIGNED: u8 = 0x10;
/// S→C: the room's host changed.
pub const HOST_CHANGED: u8 = 0x11;
/// C→S (host only) / S→C (broadcast): opaque NPC simulation snapshot.
pub const NPC_SNAPSHOT: u8 = 0x12;
/// C→S / S→C: an ability was activated.
pub const ABILITY_START: u8 = 0x13;
/// C→S / S→C: an ability was deactivated.
pub const ABILITY_STOP: u8 = 0x14;
/// C→S / S→C: a prism structure was placed.
pub const PRISM_PLACE: u8 = 0x15;
/// C→S / S→C: a prism structure was removed.
pub const PRISM_REMOVE: u8 = 0x16;
/// C→S / S→C: a chat message.
pub const CHAT: u8 = 0x17;
/// S→C: a human-readable reason sent right before the socket is closed
/// (room full, malformed join request, kicked, ...).
pub const CLOSE_REASON: u8 = 0x18;

/// Start of the reserved extension range. Tags in `0x80..=0xFF` decode to
/// [`crate::frame::Frame::Passthrough`] instead of failing, so older rooms
/// can ignore messages introduced by newer clients.
pub const EXTENSION_RANGE_START: u8 = 0x80;

//! The semantic message union. Application code on both sides of the wire
//! constructs and matches on [`Frame`] values; [`crate::codec`] is the only
//! place that knows how a given variant is quantized and tagged.

use serde::{Deserialize, Serialize};

use crate::types::{
    AbilityKey, AbilityParams, Creature, ExistingParticipant, Geometry, NpcId, ParticipantId,
    RoomId, Transform, WorldVolume,
};

/// One sample inside a [`Frame::BatchPositions`] broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub id: ParticipantId,
    pub transform: Transform,
    pub volume: Option<WorldVolume>,
}

/// A fully decoded, fully typed protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// C→S. tag [`crate::tags::JOIN_GAME`].
    JoinGame {
        display_name: String,
        creature: Creature,
    },
    /// S→C. tag [`crate::tags::WELCOME`].
    Welcome {
        participant_id: ParticipantId,
        room_id: RoomId,
        world_seed: u32,
        npc_seed: u32,
        dead_npc_ids: Vec<NpcId>,
        existing_participants: Vec<ExistingParticipant>,
        host_id: ParticipantId,
        is_host: bool,
    },
    /// S→C. tag [`crate::tags::PLAYER_JOIN`].
    PlayerJoin {
        participant_id: ParticipantId,
        display_name: String,
        creature: Creature,
        transform: Transform,
        world_volume: WorldVolume,
    },
    /// S→C. tag [`crate::tags::PLAYER_LEAVE`].
    PlayerLeave { participant_id: ParticipantId },
    /// C→S. tag [`crate::tags::POSITION`].
    Position {
        transform: Transform,
        volume: Option<WorldVolume>,
    },
    /// S→C. tag [`crate::tags::BATCH_POSITIONS`].
    BatchPositions {
        server_time_ms: u64,
        entries: Vec<BatchEntry>,
    },
    /// C→S / S→C. tag [`crate::tags::CREATURE_UPDATE`].
    CreatureUpdate {
        creature: Creature,
        /// Present only when server-originated (forwarded to other clients).
        participant_id: Option<ParticipantId>,
    },
    /// S→C, deprecated in favor of `world_volume` on [`Frame::BatchPositions`].
    /// tag [`crate::tags::SIZE_UPDATE`].
    SizeUpdate {
        participant_id: ParticipantId,
        scale: f64,
    },
    /// C→S. tag [`crate::tags::PING`].
    Ping { client_time_ms: u64 },
    /// S→C. tag [`crate::tags::PONG`].
    Pong {
        client_time_ms: u64,
        server_time_ms: u64,
    },
    /// S→C, opaque passthrough from the room's current host. Covers both
    /// `NPC_SPAWN` and `NPC_BATCH_SPAWN` from the original message table —
    /// the server never distinguishes them. tag [`crate::tags::NPC_SPAWN`].
    NpcSpawn { payload: Vec<u8> },
    /// S→C. tag [`crate::tags::NPC_DEATH`].
    NpcDeath {
        npc_id: NpcId,
        eaten_by: ParticipantId,
    },
    /// C→S. tag [`crate::tags::EAT_NPC`].
    EatNpc { npc_id: NpcId },
    /// S→C broadcast of an accepted map change. tag [`crate::tags::MAP_CHANGE`].
    MapChange {
        seed: u32,
        requester_id: ParticipantId,
    },
    /// C→S. tag [`crate::tags::REQUEST_MAP_CHANGE`].
    RequestMapChange,
    /// S→C. tag [`crate::tags::HOST_ASSIGNED`].
    HostAssigned { is_host: bool },
    /// S→C. tag [`crate::tags::HOST_CHANGED`].
    HostChanged { host_id: ParticipantId },
    /// C→S (host only) / S→C (broadcast), opaque. tag [`crate::tags::NPC_SNAPSHOT`].
    NpcSnapshot { tick: u64, fish: Vec<u8> },
    /// C→S / S→C. tag [`crate::tags::ABILITY_START`].
    AbilityStart {
        participant_id: ParticipantId,
        ability: AbilityKey,
        params: AbilityParams,
    },
    /// C→S / S→C. tag [`crate::tags::ABILITY_STOP`].
    AbilityStop {
        participant_id: ParticipantId,
        ability: AbilityKey,
        params: AbilityParams,
    },
    /// C→S / S→C. tag [`crate::tags::PRISM_PLACE`].
    PrismPlace {
        prism_id: String,
        placer_id: ParticipantId,
        geometry: Geometry,
    },
    /// C→S / S→C. tag [`crate::tags::PRISM_REMOVE`].
    PrismRemove {
        prism_id: String,
        placer_id: ParticipantId,
    },
    /// C→S / S→C. tag [`crate::tags::CHAT`].
    Chat {
        sender_id: ParticipantId,
        text: String,
        is_emoji: bool,
        show_proximity: bool,
    },
    /// S→C, sent immediately before the socket closes. tag [`crate::tags::CLOSE_REASON`].
    CloseReason { reason: String },
    /// A frame whose tag falls in the reserved extension range
    /// (`0x80..=0xFF`). Decoded generically and ignored by the room instead
    /// of failing, so older deployments tolerate newer client features.
    Passthrough { tag: u8, payload: Vec<u8> },
}

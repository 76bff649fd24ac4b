//! Semantic (non-quantized) types shared by the [`crate::frame::Frame`] union.
//!
//! These are the types application code on either side of the wire actually
//! works with. Quantization to/from their wire representation happens only
//! inside [`crate::codec`].

use serde::{Deserialize, Serialize};

/// Server-assigned, opaque identifier for a seated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

/// Server-assigned room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

/// An NPC identifier, as minted by whichever client currently hosts the
/// simulation. The server never interprets this beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NpcId(pub u32);

/// Opaque creature selection. The server never interprets these fields
/// beyond forwarding them to other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creature {
    pub creature_type: String,
    pub class: String,
    pub variant_index: u32,
    pub seed: u32,
}

/// A participant's last known pose. `scale` is the "manual scale" debug
/// multiplier's visual counterpart — it is distinct from [`WorldVolume`] and
/// carries no authoritative meaning of its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub pos: [f64; 3],
    pub rot: [f64; 3],
    pub visual_scale: f64,
}

impl Transform {
    pub const ORIGIN: Transform = Transform {
        pos: [0.0, 0.0, 0.0],
        rot: [0.0, 0.0, 0.0],
        visual_scale: 1.0,
    };
}

/// The authoritative creature size in cubic meters. Always clamped to
/// `[1, 1000]`; it is the only quantity that drives "who can eat whom".
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct WorldVolume(pub f64);

impl WorldVolume {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 1000.0;

    /// Clamps an arbitrary (possibly non-finite) input into `[MIN, MAX]`.
    pub fn clamped(raw: f64) -> Self {
        let finite = if raw.is_finite() { raw } else { Self::MIN };
        WorldVolume(finite.clamp(Self::MIN, Self::MAX))
    }
}

impl Default for WorldVolume {
    fn default() -> Self {
        WorldVolume(Self::MIN)
    }
}

/// The four abilities a participant can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbilityKey {
    Sprinter,
    Stacker,
    Camper,
    Attacker,
}

/// A single opaque ability parameter (color, terrain, mimic seed, ...).
/// The server never interprets these; it only forwards them verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AbilityValue {
    Number(f64),
    Text(String),
    Flag(bool),
}

/// Opaque, ordered bag of ability parameters. A `Vec` rather than a map
/// keeps encode/decode order-stable, so round-tripping a frame through the
/// wire reproduces it exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbilityParams(pub Vec<(String, AbilityValue)>);

/// Opaque geometry payload for a placed prism. The server stores and
/// forwards this without interpreting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry(pub serde_json::Value);

/// A summary of one already-connected participant, sent inside [`crate::frame::Frame::Welcome`]
/// so a joiner can reconstruct the room without racing further broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingParticipant {
    pub id: ParticipantId,
    pub display_name: String,
    pub creature: Creature,
    pub transform: Transform,
    pub world_volume: WorldVolume,
}

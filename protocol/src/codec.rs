//! Binary frame codec. `encode` never fails for a well-formed [`Frame`] —
//! out-of-range numeric fields are clamped/rounded by [`crate::quantize`]
//! before this module ever sees them. `decode` fails only on a frame
//! shorter than the tag header, an unknown tag outside the extension
//! range, or a malformed payload for a known tag.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::frame::{BatchEntry, Frame};
use crate::tags;
use crate::types::{
    AbilityKey, AbilityParams, Creature, ExistingParticipant, Geometry, NpcId, ParticipantId,
    RoomId, Transform, WorldVolume,
};
use crate::wire::WireTransform;
use crate::wire::{dequantize_volume_field, quantize_volume_field};

fn build<T: Serialize>(tag: u8, payload: &T) -> Vec<u8> {
    let body =
        postcard::to_stdvec(payload).expect("in-range protocol payload always serializes");
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(tag);
    out.extend_from_slice(&body);
    out
}

fn parse<T: DeserializeOwned>(tag: u8, body: &[u8]) -> Result<T, DecodeError> {
    postcard::from_bytes(body).map_err(|source| DecodeError::MalformedPayload { tag, source })
}

// --- Quantized/plain wire payload shapes, private to this module. -------

#[derive(Serialize, Deserialize)]
struct PJoinGame {
    display_name: String,
    creature: Creature,
}

#[derive(Serialize, Deserialize)]
struct PExistingParticipant {
    id: u32,
    display_name: String,
    creature: Creature,
    transform: WireTransform,
    volume: u32,
}

#[derive(Serialize, Deserialize)]
struct PWelcome {
    participant_id: u32,
    room_id: String,
    world_seed: u32,
    npc_seed: u32,
    dead_npc_ids: Vec<u32>,
    existing_participants: Vec<PExistingParticipant>,
    host_id: u32,
    is_host: bool,
}

#[derive(Serialize, Deserialize)]
struct PPlayerJoin {
    participant_id: u32,
    display_name: String,
    creature: Creature,
    transform: WireTransform,
    volume: u32,
}

#[derive(Serialize, Deserialize)]
struct PPlayerLeave {
    participant_id: u32,
}

#[derive(Serialize, Deserialize)]
struct PPosition {
    transform: WireTransform,
    volume: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct PBatchEntry {
    id: u32,
    transform: WireTransform,
    volume: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct PBatchPositions {
    server_time_ms: u64,
    entries: Vec<PBatchEntry>,
}

#[derive(Serialize, Deserialize)]
struct PCreatureUpdate {
    creature: Creature,
    participant_id: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct PSizeUpdate {
    participant_id: u32,
    scale: i32,
}

#[derive(Serialize, Deserialize)]
struct PPing {
    client_time_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct PPong {
    client_time_ms: u64,
    server_time_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct PNpcSpawn {
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PNpcDeath {
    npc_id: u32,
    eaten_by: u32,
}

#[derive(Serialize, Deserialize)]
struct PEatNpc {
    npc_id: u32,
}

#[derive(Serialize, Deserialize)]
struct PMapChange {
    seed: u32,
    requester_id: u32,
}

#[derive(Serialize, Deserialize)]
struct PHostAssigned {
    is_host: bool,
}

#[derive(Serialize, Deserialize)]
struct PHostChanged {
    host_id: u32,
}

#[derive(Serialize, Deserialize)]
struct PNpcSnapshot {
    tick: u64,
    fish: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PAbilityEvent {
    participant_id: u32,
    ability: AbilityKey,
    params: AbilityParams,
}

#[derive(Serialize, Deserialize)]
struct PPrismPlace {
    prism_id: String,
    placer_id: u32,
    geometry: Geometry,
}

#[derive(Serialize, Deserialize)]
struct PPrismRemove {
    prism_id: String,
    placer_id: u32,
}

#[derive(Serialize, Deserialize)]
struct PChat {
    sender_id: u32,
    text: String,
    is_emoji: bool,
    show_proximity: bool,
}

#[derive(Serialize, Deserialize)]
struct PCloseReason {
    reason: String,
}

fn existing_participant_to_wire(p: &ExistingParticipant) -> PExistingParticipant {
    PExistingParticipant {
        id: p.id.0,
        display_name: p.display_name.clone(),
        creature: p.creature.clone(),
        transform: p.transform.into(),
        volume: quantize_volume_field(p.world_volume),
    }
}

fn existing_participant_from_wire(p: PExistingParticipant) -> ExistingParticipant {
    ExistingParticipant {
        id: ParticipantId(p.id),
        display_name: p.display_name,
        creature: p.creature,
        transform: p.transform.into(),
        world_volume: dequantize_volume_field(p.volume),
    }
}

fn batch_entry_to_wire(e: &BatchEntry) -> PBatchEntry {
    PBatchEntry {
        id: e.id.0,
        transform: e.transform.into(),
        volume: e.volume.map(quantize_volume_field),
    }
}

fn batch_entry_from_wire(e: PBatchEntry) -> BatchEntry {
    BatchEntry {
        id: ParticipantId(e.id),
        transform: e.transform.into(),
        volume: e.volume.map(dequantize_volume_field),
    }
}

/// Encodes a [`Frame`] into `(tag, payload)` bytes. Never fails for a
/// constructed `Frame` — values are already semantic (un-clamped callers
/// should clamp before building a `Frame`, e.g. via [`WorldVolume::clamped`]).
pub fn encode(frame: &Frame) -> Vec<u8> {
    match frame {
        Frame::JoinGame {
            display_name,
            creature,
        } => build(
            tags::JOIN_GAME,
            &PJoinGame {
                display_name: display_name.clone(),
                creature: creature.clone(),
            },
        ),
        Frame::Welcome {
            participant_id,
            room_id,
            world_seed,
            npc_seed,
            dead_npc_ids,
            existing_participants,
            host_id,
            is_host,
        } => build(
            tags::WELCOME,
            &PWelcome {
                participant_id: participant_id.0,
                room_id: room_id.0.clone(),
                world_seed: *world_seed,
                npc_seed: *npc_seed,
                dead_npc_ids: dead_npc_ids.iter().map(|n| n.0).collect(),
                existing_participants: existing_participants
                    .iter()
                    .map(existing_participant_to_wire)
                    .collect(),
                host_id: host_id.0,
                is_host: *is_host,
            },
        ),
        Frame::PlayerJoin {
            participant_id,
            display_name,
            creature,
            transform,
            world_volume,
        } => build(
            tags::PLAYER_JOIN,
            &PPlayerJoin {
                participant_id: participant_id.0,
                display_name: display_name.clone(),
                creature: creature.clone(),
                transform: (*transform).into(),
                volume: quantize_volume_field(*world_volume),
            },
        ),
        Frame::PlayerLeave { participant_id } => build(
            tags::PLAYER_LEAVE,
            &PPlayerLeave {
                participant_id: participant_id.0,
            },
        ),
        Frame::Position { transform, volume } => build(
            tags::POSITION,
            &PPosition {
                transform: (*transform).into(),
                volume: volume.map(quantize_volume_field),
            },
        ),
        Frame::BatchPositions {
            server_time_ms,
            entries,
        } => build(
            tags::BATCH_POSITIONS,
            &PBatchPositions {
                server_time_ms: *server_time_ms,
                entries: entries.iter().map(batch_entry_to_wire).collect(),
            },
        ),
        Frame::CreatureUpdate {
            creature,
            participant_id,
        } => build(
            tags::CREATURE_UPDATE,
            &PCreatureUpdate {
                creature: creature.clone(),
                participant_id: participant_id.map(|p| p.0),
            },
        ),
        Frame::SizeUpdate {
            participant_id,
            scale,
        } => build(
            tags::SIZE_UPDATE,
            &PSizeUpdate {
                participant_id: participant_id.0,
                scale: crate::quantize::quantize_scale(*scale),
            },
        ),
        Frame::Ping { client_time_ms } => build(
            tags::PING,
            &PPing {
                client_time_ms: *client_time_ms,
            },
        ),
        Frame::Pong {
            client_time_ms,
            server_time_ms,
        } => build(
            tags::PONG,
            &PPong {
                client_time_ms: *client_time_ms,
                server_time_ms: *server_time_ms,
            },
        ),
        Frame::NpcSpawn { payload } => build(
            tags::NPC_SPAWN,
            &PNpcSpawn {
                payload: payload.clone(),
            },
        ),
        Frame::NpcDeath { npc_id, eaten_by } => build(
            tags::NPC_DEATH,
            &PNpcDeath {
                npc_id: npc_id.0,
                eaten_by: eaten_by.0,
            },
        ),
        Frame::EatNpc { npc_id } => build(tags::EAT_NPC, &PEatNpc { npc_id: npc_id.0 }),
        Frame::MapChange { seed, requester_id } => build(
            tags::MAP_CHANGE,
            &PMapChange {
                seed: *seed,
                requester_id: requester_id.0,
            },
        ),
        Frame::RequestMapChange => vec![tags::REQUEST_MAP_CHANGE],
        Frame::HostAssigned { is_host } => build(
            tags::HOST_ASSIGNED,
            &PHostAssigned { is_host: *is_host },
        ),
        Frame::HostChanged { host_id } => build(
            tags::HOST_CHANGED,
            &PHostChanged { host_id: host_id.0 },
        ),
        Frame::NpcSnapshot { tick, fish } => build(
            tags::NPC_SNAPSHOT,
            &PNpcSnapshot {
                tick: *tick,
                fish: fish.clone(),
            },
        ),
        Frame::AbilityStart {
            participant_id,
            ability,
            params,
        } => build(
            tags::ABILITY_START,
            &PAbilityEvent {
                participant_id: participant_id.0,
                ability: *ability,
                params: params.clone(),
            },
        ),
        Frame::AbilityStop {
            participant_id,
            ability,
            params,
        } => build(
            tags::ABILITY_STOP,
            &PAbilityEvent {
                participant_id: participant_id.0,
                ability: *ability,
                params: params.clone(),
            },
        ),
        Frame::PrismPlace {
            prism_id,
            placer_id,
            geometry,
        } => build(
            tags::PRISM_PLACE,
            &PPrismPlace {
                prism_id: prism_id.clone(),
                placer_id: placer_id.0,
                geometry: geometry.clone(),
            },
        ),
        Frame::PrismRemove {
            prism_id,
            placer_id,
        } => build(
            tags::PRISM_REMOVE,
            &PPrismRemove {
                prism_id: prism_id.clone(),
                placer_id: placer_id.0,
            },
        ),
        Frame::Chat {
            sender_id,
            text,
            is_emoji,
            show_proximity,
        } => build(
            tags::CHAT,
            &PChat {
                sender_id: sender_id.0,
                text: text.clone(),
                is_emoji: *is_emoji,
                show_proximity: *show_proximity,
            },
        ),
        Frame::CloseReason { reason } => build(
            tags::CLOSE_REASON,
            &PCloseReason {
                reason: reason.clone(),
            },
        ),
        Frame::Passthrough { tag, payload } => {
            let mut out = Vec::with_capacity(1 + payload.len());
            out.push(*tag);
            out.extend_from_slice(payload);
            out
        }
    }
}

/// Decodes `(tag, payload)` bytes into a [`Frame`].
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let Some((&tag, body)) = bytes.split_first() else {
        return Err(DecodeError::TooShort);
    };

    let frame = match tag {
        tags::JOIN_GAME => {
            let p: PJoinGame = parse(tag, body)?;
            Frame::JoinGame {
                display_name: p.display_name,
                creature: p.creature,
            }
        }
        tags::WELCOME => {
            let p: PWelcome = parse(tag, body)?;
            Frame::Welcome {
                participant_id: ParticipantId(p.participant_id),
                room_id: RoomId(p.room_id),
                world_seed: p.world_seed,
                npc_seed: p.npc_seed,
                dead_npc_ids: p.dead_npc_ids.into_iter().map(NpcId).collect(),
                existing_participants: p
                    .existing_participants
                    .into_iter()
                    .map(existing_participant_from_wire)
                    .collect(),
                host_id: ParticipantId(p.host_id),
                is_host: p.is_host,
            }
        }
        tags::PLAYER_JOIN => {
            let p: PPlayerJoin = parse(tag, body)?;
            Frame::PlayerJoin {
                participant_id: ParticipantId(p.participant_id),
                display_name: p.display_name,
                creature: p.creature,
                transform: p.transform.into(),
                world_volume: dequantize_volume_field(p.volume),
            }
        }
        tags::PLAYER_LEAVE => {
            let p: PPlayerLeave = parse(tag, body)?;
            Frame::PlayerLeave {
                participant_id: ParticipantId(p.participant_id),
            }
        }
        tags::POSITION => {
            let p: PPosition = parse(tag, body)?;
            Frame::Position {
                transform: p.transform.into(),
                volume: p.volume.map(dequantize_volume_field),
            }
        }
        tags::BATCH_POSITIONS => {
            let p: PBatchPositions = parse(tag, body)?;
            Frame::BatchPositions {
                server_time_ms: p.server_time_ms,
                entries: p.entries.into_iter().map(batch_entry_from_wire).collect(),
            }
        }
        tags::CREATURE_UPDATE => {
            let p: PCreatureUpdate = parse(tag, body)?;
            Frame::CreatureUpdate {
                creature: p.creature,
                participant_id: p.participant_id.map(ParticipantId),
            }
        }
        tags::SIZE_UPDATE => {
            let p: PSizeUpdate = parse(tag, body)?;
            Frame::SizeUpdate {
                participant_id: ParticipantId(p.participant_id),
                scale: crate::quantize::dequantize_scale(p.scale),
            }
        }
        tags::PING => {
            let p: PPing = parse(tag, body)?;
            Frame::Ping {
                client_time_ms: p.client_time_ms,
            }
        }
        tags::PONG => {
            let p: PPong = parse(tag, body)?;
            Frame::Pong {
                client_time_ms: p.client_time_ms,
                server_time_ms: p.server_time_ms,
            }
        }
        tags::NPC_SPAWN => {
            let p: PNpcSpawn = parse(tag, body)?;
            Frame::NpcSpawn { payload: p.payload }
        }
        tags::NPC_DEATH => {
            let p: PNpcDeath = parse(tag, body)?;
            Frame::NpcDeath {
                npc_id: NpcId(p.npc_id),
                eaten_by: ParticipantId(p.eaten_by),
            }
        }
        tags::EAT_NPC => {
            let p: PEatNpc = parse(tag, body)?;
            Frame::EatNpc {
                npc_id: NpcId(p.npc_id),
            }
        }
        tags::MAP_CHANGE => {
            let p: PMapChange = parse(tag, body)?;
            Frame::MapChange {
                seed: p.seed,
                requester_id: ParticipantId(p.requester_id),
            }
        }
        tags::REQUEST_MAP_CHANGE => Frame::RequestMapChange,
        tags::HOST_ASSIGNED => {
            let p: PHostAssigned = parse(tag, body)?;
            Frame::HostAssigned { is_host: p.is_host }
        }
        tags::HOST_CHANGED => {
            let p: PHostChanged = parse(tag, body)?;
            Frame::HostChanged {
                host_id: ParticipantId(p.host_id),
            }
        }
        tags::NPC_SNAPSHOT => {
            let p: PNpcSnapshot = parse(tag, body)?;
            Frame::NpcSnapshot {
                tick: p.tick,
                fish: p.fish,
            }
        }
        tags::ABILITY_START => {
            let p: PAbilityEvent = parse(tag, body)?;
            Frame::AbilityStart {
                participant_id: ParticipantId(p.participant_id),
                ability: p.ability,
                params: p.params,
            }
        }
        tags::ABILITY_STOP => {
            let p: PAbilityEvent = parse(tag, body)?;
            Frame::AbilityStop {
                participant_id: ParticipantId(p.participant_id),
                ability: p.ability,
                params: p.params,
            }
        }
        tags::PRISM_PLACE => {
            let p: PPrismPlace = parse(tag, body)?;
            Frame::PrismPlace {
                prism_id: p.prism_id,
                placer_id: ParticipantId(p.placer_id),
                geometry: p.geometry,
            }
        }
        tags::PRISM_REMOVE => {
            let p: PPrismRemove = parse(tag, body)?;
            Frame::PrismRemove {
                prism_id: p.prism_id,
                placer_id: ParticipantId(p.placer_id),
            }
        }
        tags::CHAT => {
            let p: PChat = parse(tag, body)?;
            Frame::Chat {
                sender_id: ParticipantId(p.sender_id),
                text: p.text,
                is_emoji: p.is_emoji,
                show_proximity: p.show_proximity,
            }
        }
        tags::CLOSE_REASON => {
            let p: PCloseReason = parse(tag, body)?;
            Frame::CloseReason { reason: p.reason }
        }
        t if t >= tags::EXTENSION_RANGE_START => Frame::Passthrough {
            tag: t,
            payload: body.to_vec(),
        },
        t => return Err(DecodeError::UnknownTag(t)),
    };

    Ok(frame)
}

/// A serde_json-backed text encoding of [`Frame`], for manual debugging
/// only (e.g. logging a frame or pasting one into a terminal). Disabled by
/// default; the server's own read/write loop always goes through
/// [`encode`]/[`decode`].
#[cfg(feature = "debug-text-codec")]
pub mod text {
    use super::Frame;
    use crate::error::TextDecodeError;

    pub fn encode_text(frame: &Frame) -> String {
        serde_json::to_string(frame).expect("Frame has no non-serializable fields")
    }

    pub fn decode_text(s: &str) -> Result<Frame, TextDecodeError> {
        Ok(serde_json::from_str(s)?)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::types::{NpcId, ParticipantId};

        #[test]
        fn eat_npc_round_trips_through_text() {
            let frame = Frame::EatNpc {
                npc_id: NpcId(7),
            };
            let text = encode_text(&frame);
            assert_eq!(decode_text(&text).unwrap(), frame);
        }

        #[test]
        fn garbage_text_is_rejected() {
            assert!(decode_text("not json").is_err());
        }

        #[test]
        fn chat_round_trips_through_text() {
            let frame = Frame::Chat {
                sender_id: ParticipantId(3),
                text: "hello".to_string(),
                is_emoji: false,
                show_proximity: true,
            };
            let text = encode_text(&frame);
            assert_eq!(decode_text(&text).unwrap(), frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Creature, Transform, WorldVolume};

    #[test]
    fn empty_bytes_is_too_short() {
        assert!(matches!(decode(&[]), Err(DecodeError::TooShort)));
    }

    #[test]
    fn unknown_tag_below_extension_range_errors() {
        let bytes = [0x7F, 1, 2, 3];
        assert!(matches!(decode(&bytes), Err(DecodeError::UnknownTag(0x7F))));
    }

    #[test]
    fn extension_range_tag_decodes_to_passthrough() {
        let bytes = [0x90, 1, 2, 3];
        let frame = decode(&bytes).unwrap();
        assert_eq!(
            frame,
            Frame::Passthrough {
                tag: 0x90,
                payload: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn malformed_known_tag_is_malformed_payload_not_panic() {
        let bytes = [tags::JOIN_GAME, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::MalformedPayload { tag, .. }) if tag == tags::JOIN_GAME
        ));
    }

    #[test]
    fn position_round_trips_through_quantization() {
        let frame = Frame::Position {
            transform: Transform {
                pos: [1.005, -2.0, 3.456],
                rot: [0.0, 1.5707, -1.5707],
                visual_scale: 1.25,
            },
            volume: Some(WorldVolume::clamped(42.0)),
        };
        let bytes = encode(&frame);
        let decoded = decode(&bytes).unwrap();
        let Frame::Position { transform, volume } = decoded else {
            panic!("wrong variant");
        };
        assert!((transform.pos[0] - 1.0).abs() < 1e-9 || (transform.pos[0] - 1.01).abs() < 1e-9);
        assert!((volume.unwrap().0 - 42.0).abs() < 1e-6);
    }

    #[test]
    fn request_map_change_has_no_payload() {
        let bytes = encode(&Frame::RequestMapChange);
        assert_eq!(bytes, vec![tags::REQUEST_MAP_CHANGE]);
        assert_eq!(decode(&bytes).unwrap(), Frame::RequestMapChange);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_transform() -> impl Strategy<Value = Transform> {
            (
                -10_000.0f64..10_000.0,
                -10_000.0f64..10_000.0,
                -10_000.0f64..10_000.0,
                -1000.0f64..1000.0,
                -1000.0f64..1000.0,
                -1000.0f64..1000.0,
                0.0f64..100.0,
            )
                .prop_map(|(x, y, z, rx, ry, rz, scale)| Transform {
                    pos: [x, y, z],
                    rot: [rx, ry, rz],
                    visual_scale: scale,
                })
        }

        proptest! {
            /// Testable property 9: `decode(encode(value))` reproduces the
            /// semantic value up to quantization, for arbitrary in-range
            /// positions/volumes.
            #[test]
            fn position_frame_round_trips_for_any_in_range_input(
                transform in arb_transform(),
                volume in 1.0f64..1000.0,
            ) {
                let frame = Frame::Position {
                    transform,
                    volume: Some(WorldVolume::clamped(volume)),
                };
                let decoded = decode(&encode(&frame)).unwrap();
                let Frame::Position { transform: got, volume: got_volume } = decoded else {
                    panic!("wrong variant");
                };
                for axis in 0..3 {
                    prop_assert!((got.pos[axis] - transform.pos[axis]).abs() < 0.01);
                    prop_assert!((got.rot[axis] - transform.rot[axis]).abs() < 0.001);
                }
                prop_assert!((got.visual_scale - transform.visual_scale).abs() < 0.001);
                prop_assert!((got_volume.unwrap().0 - volume).abs() < 0.01);
            }

            #[test]
            fn eat_npc_and_chat_frames_round_trip_exactly(
                npc_id in any::<u32>(),
                sender in any::<u32>(),
                text in "[a-zA-Z0-9 ]{0,64}",
                is_emoji in any::<bool>(),
                show_proximity in any::<bool>(),
            ) {
                let eat = Frame::EatNpc { npc_id: NpcId(npc_id) };
                prop_assert_eq!(decode(&encode(&eat)).unwrap(), eat);

                let chat = Frame::Chat {
                    sender_id: ParticipantId(sender),
                    text,
                    is_emoji,
                    show_proximity,
                };
                prop_assert_eq!(decode(&encode(&chat)).unwrap(), chat);
            }
        }
    }

    #[test]
    fn welcome_round_trips_nested_existing_participants() {
        let frame = Frame::Welcome {
            participant_id: ParticipantId(7),
            room_id: RoomId("abyss#reef".into()),
            world_seed: 0xdead_beef,
            npc_seed: 0x1234,
            dead_npc_ids: vec![NpcId(1), NpcId(2)],
            existing_participants: vec![ExistingParticipant {
                id: ParticipantId(1),
                display_name: "diver".into(),
                creature: Creature {
                    creature_type: "fish".into(),
                    class: "shark".into(),
                    variant_index: 0,
                    seed: 0x12345678,
                },
                transform: Transform::ORIGIN,
                world_volume: WorldVolume::clamped(5.0),
            }],
            host_id: ParticipantId(1),
            is_host: false,
        };
        let bytes = encode(&frame);
        assert_eq!(decode(&bytes).unwrap(), frame);
    }
}

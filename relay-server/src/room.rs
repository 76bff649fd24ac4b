//! Owns all authoritative per-room state. All mutations happen inside the
//! Room's single-writer request loop ([`Room::run`]); Connections submit
//! [`RoomRequest`]s and receive broadcasts through their own outbound
//! channels.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use protocol::types::{
    AbilityKey, AbilityParams, Creature, ExistingParticipant, Geometry, NpcId, ParticipantId,
    RoomId, Transform, WorldVolume,
};
use protocol::Frame;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::interval;

use crate::config::RoomConfig;
use crate::eat_arbiter::{resolve_eat, EatOutcome};
use crate::error::{CapacityError, ProtocolError};

/// A participant's toggled ability state.
#[derive(Debug, Clone, Default)]
pub struct AbilityState {
    pub active: bool,
    pub params: AbilityParams,
}

/// A placed prism structure.
pub struct Prism {
    pub placer_id: ParticipantId,
    pub geometry: Geometry,
}

/// The two outbound channels a Connection's writer task drains. Lifecycle
/// frames (WELCOME, PLAYER_JOIN/LEAVE, HOST_CHANGED, MAP_CHANGE, ...) go
/// through a bounded mpsc queue and are never dropped; BATCH_POSITIONS goes
/// through a `watch` channel, which naturally keeps only the latest value —
/// exactly the "coalesce, never queue stale batches" policy this needs.
#[derive(Clone)]
pub struct Outbound {
    lifecycle: mpsc::Sender<Frame>,
    batch: watch::Sender<Option<Frame>>,
}

pub struct OutboundRx {
    pub lifecycle: mpsc::Receiver<Frame>,
    pub batch: watch::Receiver<Option<Frame>>,
}

pub fn outbound_channel() -> (Outbound, OutboundRx) {
    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
    let (batch_tx, batch_rx) = watch::channel(None);
    (
        Outbound {
            lifecycle: lifecycle_tx,
            batch: batch_tx,
        },
        OutboundRx {
            lifecycle: lifecycle_rx,
            batch: batch_rx,
        },
    )
}

impl Outbound {
    /// Enqueues `frame`, applying the drop/coalesce policy. `BatchPositions`
    /// frames replace whatever was pending; everything else backs up in a
    /// bounded queue and only errors if that queue is saturated (meaning the
    /// peer is catastrophically behind — the caller should close it).
    pub fn send(&self, frame: Frame) -> Result<(), CapacityError> {
        if matches!(frame, Frame::BatchPositions { .. }) {
            // No receiver left just means the participant is gone; that is
            // the write task's problem to notice, not this call's.
            let _ = self.batch.send(Some(frame));
            return Ok(());
        }
        match self.lifecycle.try_send(frame) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(CapacityError::OutboundQueueFull),
        }
    }
}

/// A seated client inside a [`Room`].
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub creature: Creature,
    pub transform: Transform,
    pub world_volume: WorldVolume,
    pub joined_at: Instant,
    pub last_seen_at: Instant,
    /// Monotonic join order, used as the host-fallback tiebreaker.
    pub join_index: u64,
    pub abilities: HashMap<AbilityKey, AbilityState>,
    /// Set by `SubmitTransform`, cleared after being folded into a
    /// `BATCH_POSITIONS` tick.
    pub dirty: bool,
    pub outbound: Outbound,
}

/// One request a Connection submits to its Room. Carries everything the
/// Room needs to act — the Connection itself holds no Room state.
pub enum RoomRequest {
    Join {
        participant_id: ParticipantId,
        display_name: String,
        creature: Creature,
        outbound: Outbound,
        reply: oneshot::Sender<Result<(), CapacityError>>,
    },
    SubmitTransform {
        participant_id: ParticipantId,
        transform: Transform,
        volume: Option<WorldVolume>,
    },
    EatNpc {
        participant_id: ParticipantId,
        npc_id: NpcId,
    },
    AbilityStart {
        participant_id: ParticipantId,
        ability: AbilityKey,
        params: AbilityParams,
    },
    AbilityStop {
        participant_id: ParticipantId,
        ability: AbilityKey,
        params: AbilityParams,
    },
    CreatureUpdate {
        participant_id: ParticipantId,
        creature: Creature,
    },
    PrismPlace {
        participant_id: ParticipantId,
        prism_id: String,
        geometry: Geometry,
    },
    PrismRemove {
        participant_id: ParticipantId,
        prism_id: String,
    },
    Chat {
        participant_id: ParticipantId,
        text: String,
        is_emoji: bool,
        show_proximity: bool,
    },
    RequestMapChange {
        participant_id: ParticipantId,
    },
    NpcSnapshot {
        participant_id: ParticipantId,
        tick: u64,
        fish: Vec<u8>,
    },
    NpcSpawn {
        participant_id: ParticipantId,
        payload: Vec<u8>,
    },
    Ping {
        participant_id: ParticipantId,
        client_time_ms: u64,
    },
    Disconnect {
        participant_id: ParticipantId,
    },
}

/// Derives the room's NPC seed from its world seed. Fixed odd-multiplier
/// plus rotate: cheap, deterministic, and stable across releases.
pub fn derive_npc_seed(world_seed: u32) -> u32 {
    world_seed.wrapping_mul(0x9E37_79B1).rotate_left(13)
}

fn now_ms(epoch: Instant) -> u64 {
    Instant::now().duration_since(epoch).as_millis() as u64
}

/// The authoritative per-room state. Every field here is touched only by
/// the task that owns this value — [`Room::run`] — so no locks are needed
/// internally.
pub struct Room {
    pub id: RoomId,
    pub participants: HashMap<ParticipantId, Participant>,
    pub world_seed: u32,
    pub npc_seed: u32,
    pub dead_npc_ids: HashMap<NpcId, ParticipantId>,
    pub host_id: Option<ParticipantId>,
    pub prisms: HashMap<String, Prism>,
    pub tick: u64,
    pub config: RoomConfig,
    next_join_index: u64,
    epoch: Instant,
    /// Mirrors `participants.len()` into an `Arc` the Hub can read without
    /// round-tripping a request through this room's task.
    participant_count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    /// Set once the first participant is admitted. Guards the empty-room
    /// exit in `run` — a freshly spawned room is empty until its creator's
    /// `Join` arrives, and the periodic ticker must not mistake that startup
    /// gap for "everyone left".
    has_admitted: bool,
}

impl Room {
    pub fn new(id: RoomId, world_seed: u32, config: RoomConfig) -> Self {
        Self::with_participant_count_handle(
            id,
            world_seed,
            config,
            std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        )
    }

    pub fn with_participant_count_handle(
        id: RoomId,
        world_seed: u32,
        config: RoomConfig,
        participant_count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    ) -> Self {
        Room {
            id,
            participants: HashMap::new(),
            world_seed,
            npc_seed: derive_npc_seed(world_seed),
            dead_npc_ids: HashMap::new(),
            host_id: None,
            prisms: HashMap::new(),
            tick: 0,
            config,
            next_join_index: 0,
            epoch: Instant::now(),
            participant_count,
            has_admitted: false,
        }
    }

    fn sync_participant_count(&self) {
        self.participant_count
            .store(self.participants.len(), std::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Lifecycle frames (everything routed through `broadcast_to_others`,
    /// `broadcast_to_all`, and `send_to`) must never be silently dropped —
    /// only `BATCH_POSITIONS` may be coalesced, and that goes through the
    /// `watch` channel in `Outbound::send`, never through these. A full
    /// lifecycle queue means that peer is catastrophically behind, so the
    /// capacity error is treated as this connection's disconnect trigger
    /// rather than a dropped frame.
    fn broadcast_to_others(&mut self, except: ParticipantId, frame: Frame) {
        let mut failed = Vec::new();
        for (id, participant) in &self.participants {
            if *id == except {
                continue;
            }
            if let Err(err) = participant.outbound.send(frame.clone()) {
                tracing::warn!(participant = id.0, %err, "outbound queue full, disconnecting");
                failed.push(*id);
            }
        }
        for id in failed {
            self.handle_disconnect(id);
        }
    }

    fn broadcast_to_all(&mut self, frame: Frame) {
        let mut failed = Vec::new();
        for (id, participant) in &self.participants {
            if let Err(err) = participant.outbound.send(frame.clone()) {
                tracing::warn!(participant = id.0, %err, "outbound queue full, disconnecting");
                failed.push(*id);
            }
        }
        for id in failed {
            self.handle_disconnect(id);
        }
    }

    fn send_to(&mut self, id: ParticipantId, frame: Frame) {
        let Some(participant) = self.participants.get(&id) else {
            return;
        };
        if let Err(err) = participant.outbound.send(frame) {
            tracing::warn!(participant = id.0, %err, "outbound queue full, disconnecting");
            self.handle_disconnect(id);
        }
    }

    fn handle_join(
        &mut self,
        participant_id: ParticipantId,
        display_name: String,
        creature: Creature,
        outbound: Outbound,
        reply: oneshot::Sender<Result<(), CapacityError>>,
    ) {
        if self.participants.len() >= self.config.capacity {
            let _ = reply.send(Err(CapacityError::RoomFull(self.id.0.clone())));
            return;
        }

        let join_index = self.next_join_index;
        self.next_join_index += 1;
        let now = Instant::now();

        let existing_participants: Vec<ExistingParticipant> = self
            .participants
            .values()
            .map(|p| ExistingParticipant {
                id: p.id,
                display_name: p.display_name.clone(),
                creature: p.creature.clone(),
                transform: p.transform,
                world_volume: p.world_volume,
            })
            .collect();

        if self.participants.is_empty() {
            self.host_id = Some(participant_id);
        }
        let host_id = self.host_id.expect("host_id set above when room was empty");
        let is_host = host_id == participant_id;

        let world_volume = WorldVolume::default();
        let transform = Transform::ORIGIN;

        self.broadcast_to_others(
            participant_id,
            Frame::PlayerJoin {
                participant_id,
                display_name: display_name.clone(),
                creature: creature.clone(),
                transform,
                world_volume,
            },
        );

        let participant = Participant {
            id: participant_id,
            display_name: display_name.clone(),
            creature: creature.clone(),
            transform,
            world_volume,
            joined_at: now,
            last_seen_at: now,
            join_index,
            abilities: HashMap::new(),
            dirty: false,
            outbound: outbound.clone(),
        };
        self.participants.insert(participant_id, participant);
        self.has_admitted = true;
        self.sync_participant_count();

        let welcome = Frame::Welcome {
            participant_id,
            room_id: self.id.clone(),
            world_seed: self.world_seed,
            npc_seed: self.npc_seed,
            dead_npc_ids: self.dead_npc_ids.keys().copied().collect(),
            existing_participants,
            host_id,
            is_host,
        };
        if let Err(err) = outbound.send(welcome) {
            tracing::warn!(participant = participant_id.0, %err, "failed to deliver WELCOME");
        }

        let _ = reply.send(Ok(()));
    }

    fn handle_submit_transform(
        &mut self,
        participant_id: ParticipantId,
        transform: Transform,
        volume: Option<WorldVolume>,
    ) {
        let Some(participant) = self.participants.get_mut(&participant_id) else {
            return;
        };
        participant.transform = transform;
        if let Some(v) = volume {
            participant.world_volume = WorldVolume::clamped(v.0);
        }
        participant.last_seen_at = Instant::now();
        participant.dirty = true;
    }

    fn handle_eat_npc(&mut self, participant_id: ParticipantId, npc_id: NpcId) {
        match resolve_eat(self, participant_id, npc_id) {
            EatOutcome::Accepted { eaten_by } => {
                self.broadcast_to_all(Frame::NpcDeath { npc_id, eaten_by });
            }
            EatOutcome::AlreadyDead { eaten_by } => {
                self.send_to(participant_id, Frame::NpcDeath { npc_id, eaten_by });
            }
        }
    }

    fn handle_ability(
        &mut self,
        participant_id: ParticipantId,
        ability: AbilityKey,
        params: AbilityParams,
        starting: bool,
    ) {
        if let Some(participant) = self.participants.get_mut(&participant_id) {
            participant.abilities.insert(
                ability,
                AbilityState {
                    active: starting,
                    params: params.clone(),
                },
            );
        }
        let frame = if starting {
            Frame::AbilityStart {
                participant_id,
                ability,
                params,
            }
        } else {
            Frame::AbilityStop {
                participant_id,
                ability,
                params,
            }
        };
        self.broadcast_to_others(participant_id, frame);
    }

    fn handle_creature_update(&mut self, participant_id: ParticipantId, creature: Creature) {
        if let Some(participant) = self.participants.get_mut(&participant_id) {
            participant.creature = creature.clone();
        }
        self.broadcast_to_others(
            participant_id,
            Frame::CreatureUpdate {
                creature,
                participant_id: Some(participant_id),
            },
        );
    }

    fn handle_prism_place(
        &mut self,
        participant_id: ParticipantId,
        prism_id: String,
        geometry: Geometry,
    ) -> Result<(), ProtocolError> {
        if self.prisms.contains_key(&prism_id) {
            return Err(ProtocolError::DuplicatePrism(prism_id));
        }
        self.prisms.insert(
            prism_id.clone(),
            Prism {
                placer_id: participant_id,
                geometry: geometry.clone(),
            },
        );
        self.broadcast_to_others(
            participant_id,
            Frame::PrismPlace {
                prism_id,
                placer_id: participant_id,
                geometry,
            },
        );
        Ok(())
    }

    fn handle_prism_remove(
        &mut self,
        participant_id: ParticipantId,
        prism_id: String,
    ) -> Result<(), ProtocolError> {
        let Some(prism) = self.prisms.get(&prism_id) else {
            return Err(ProtocolError::NoSuchPrism(prism_id));
        };
        if prism.placer_id != participant_id {
            return Err(ProtocolError::NotPrismOwner(prism_id));
        }
        self.remove_prism(&prism_id, participant_id);
        Ok(())
    }

    fn remove_prism(&mut self, prism_id: &str, placer_id: ParticipantId) {
        if self.prisms.remove(prism_id).is_some() {
            self.broadcast_to_all(Frame::PrismRemove {
                prism_id: prism_id.to_string(),
                placer_id,
            });
        }
    }

    fn handle_chat(
        &mut self,
        participant_id: ParticipantId,
        text: String,
        is_emoji: bool,
        show_proximity: bool,
    ) -> Result<(), ProtocolError> {
        if text.len() > 256 {
            return Err(ProtocolError::ChatTooLong);
        }
        // `showProximity` is forwarded as-is with no server-side distance
        // filter — filtering would need spatial data this Room does not
        // keep (interest management is explicitly out of scope).
        self.broadcast_to_others(
            participant_id,
            Frame::Chat {
                sender_id: participant_id,
                text,
                is_emoji,
                show_proximity,
            },
        );
        Ok(())
    }

    fn handle_request_map_change(&mut self, requester_id: ParticipantId, seed: u32) {
        self.world_seed = seed;
        self.npc_seed = derive_npc_seed(seed);
        self.dead_npc_ids.clear();
        self.broadcast_to_all(Frame::MapChange {
            seed,
            requester_id,
        });
    }

    fn handle_npc_snapshot(&mut self, participant_id: ParticipantId, tick: u64, fish: Vec<u8>) {
        if self.host_id != Some(participant_id) {
            tracing::warn!(
                participant = participant_id.0,
                error = %crate::error::ProtocolError::NotHost,
                "dropping NPC_SNAPSHOT"
            );
            return;
        }
        self.broadcast_to_others(participant_id, Frame::NpcSnapshot { tick, fish });
    }

    fn handle_npc_spawn(&mut self, participant_id: ParticipantId, payload: Vec<u8>) {
        if self.host_id != Some(participant_id) {
            tracing::warn!(
                participant = participant_id.0,
                error = %crate::error::ProtocolError::NotHost,
                "dropping NPC_SPAWN"
            );
            return;
        }
        self.broadcast_to_others(participant_id, Frame::NpcSpawn { payload });
    }

    fn handle_ping(&mut self, participant_id: ParticipantId, client_time_ms: u64) {
        if let Some(participant) = self.participants.get_mut(&participant_id) {
            participant.last_seen_at = Instant::now();
        }
        self.send_to(
            participant_id,
            Frame::Pong {
                client_time_ms,
                server_time_ms: now_ms(self.epoch),
            },
        );
    }

    /// Removes a participant, re-electing the host if necessary. Mirrors
    /// spec.md's Host continuity property: exactly one `HOST_CHANGED` is
    /// broadcast, and only when the departing participant was host.
    pub fn handle_disconnect(&mut self, participant_id: ParticipantId) {
        let Some(_) = self.participants.remove(&participant_id) else {
            return;
        };
        self.sync_participant_count();

        self.broadcast_to_all(Frame::PlayerLeave { participant_id });

        let owned_prisms: Vec<String> = self
            .prisms
            .iter()
            .filter(|(_, prism)| prism.placer_id == participant_id)
            .map(|(id, _)| id.clone())
            .collect();
        for prism_id in owned_prisms {
            self.remove_prism(&prism_id, participant_id);
        }

        if self.host_id == Some(participant_id) {
            self.host_id = self
                .participants
                .values()
                .min_by_key(|p| p.join_index)
                .map(|p| p.id);
            if let Some(new_host) = self.host_id {
                self.broadcast_to_all(Frame::HostChanged { host_id: new_host });
            }
        }
    }

    fn dispatch(&mut self, request: RoomRequest) {
        match request {
            RoomRequest::Join {
                participant_id,
                display_name,
                creature,
                outbound,
                reply,
            } => self.handle_join(participant_id, display_name, creature, outbound, reply),
            RoomRequest::SubmitTransform {
                participant_id,
                transform,
                volume,
            } => self.handle_submit_transform(participant_id, transform, volume),
            RoomRequest::EatNpc {
                participant_id,
                npc_id,
            } => self.handle_eat_npc(participant_id, npc_id),
            RoomRequest::AbilityStart {
                participant_id,
                ability,
                params,
            } => self.handle_ability(participant_id, ability, params, true),
            RoomRequest::AbilityStop {
                participant_id,
                ability,
                params,
            } => self.handle_ability(participant_id, ability, params, false),
            RoomRequest::CreatureUpdate {
                participant_id,
                creature,
            } => self.handle_creature_update(participant_id, creature),
            RoomRequest::PrismPlace {
                participant_id,
                prism_id,
                geometry,
            } => {
                if let Err(err) = self.handle_prism_place(participant_id, prism_id, geometry) {
                    tracing::warn!(participant = participant_id.0, %err, "prism place rejected");
                }
            }
            RoomRequest::PrismRemove {
                participant_id,
                prism_id,
            } => {
                if let Err(err) = self.handle_prism_remove(participant_id, prism_id) {
                    tracing::warn!(participant = participant_id.0, %err, "prism remove rejected");
                }
            }
            RoomRequest::Chat {
                participant_id,
                text,
                is_emoji,
                show_proximity,
            } => {
                if let Err(err) = self.handle_chat(participant_id, text, is_emoji, show_proximity)
                {
                    tracing::warn!(participant = participant_id.0, %err, "chat rejected");
                }
            }
            RoomRequest::RequestMapChange { participant_id } => {
                let seed = rand_seed();
                self.handle_request_map_change(participant_id, seed);
            }
            RoomRequest::NpcSnapshot {
                participant_id,
                tick,
                fish,
            } => self.handle_npc_snapshot(participant_id, tick, fish),
            RoomRequest::NpcSpawn {
                participant_id,
                payload,
            } => self.handle_npc_spawn(participant_id, payload),
            RoomRequest::Ping {
                participant_id,
                client_time_ms,
            } => self.handle_ping(participant_id, client_time_ms),
            RoomRequest::Disconnect { participant_id } => self.handle_disconnect(participant_id),
        }
    }

    /// Self-heals a dangling `host_id` (one that no longer names a seated
    /// participant) by re-electing before the tick fires. This should never
    /// trigger given the disconnect/join paths above keep the two in sync;
    /// it exists so a future bug here degrades into a logged re-election
    /// instead of every participant losing HOST_CHANGED forever.
    fn verify_host_invariant(&mut self) {
        let Some(host_id) = self.host_id else {
            return;
        };
        if self.participants.contains_key(&host_id) {
            return;
        }
        tracing::error!(
            error = %crate::error::InvariantViolation::HostMissing(host_id),
            "repairing dangling host_id"
        );
        self.host_id = self.participants.values().min_by_key(|p| p.join_index).map(|p| p.id);
        if let Some(new_host) = self.host_id {
            self.broadcast_to_all(Frame::HostChanged { host_id: new_host });
        }
    }

    fn emit_batch_tick(&mut self) {
        self.verify_host_invariant();
        self.tick += 1;
        let entries: Vec<protocol::frame::BatchEntry> = self
            .participants
            .values_mut()
            .filter(|p| p.dirty)
            .map(|p| {
                p.dirty = false;
                protocol::frame::BatchEntry {
                    id: p.id,
                    transform: p.transform,
                    volume: Some(p.world_volume),
                }
            })
            .collect();

        self.broadcast_to_all(Frame::BatchPositions {
            server_time_ms: now_ms(self.epoch),
            entries,
        });
    }

    /// The single-writer request loop. Runs until the inbound channel
    /// closes (every Connection referencing this room has dropped its
    /// sender) or the room empties out *after having admitted someone*, at
    /// which point the Hub's directory entry is reclaimed by the dead-room
    /// reaper. A room is empty from the moment it's spawned until its
    /// creator's `Join` is dispatched; `has_admitted` keeps the periodic
    /// ticker from mistaking that startup gap for everyone having left.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<RoomRequest>) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                request = inbound.recv() => {
                    match request {
                        Some(request) => self.dispatch(request),
                        None => {
                            tracing::info!(room = %self.id.0, "inbound channel closed, room task exiting");
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.emit_batch_tick();
                }
            }

            if self.has_admitted && self.is_empty() {
                tracing::info!(room = %self.id.0, "room emptied, room task exiting");
                return;
            }
        }
    }
}

/// Generates a fresh world seed for a map change or room creation. Uses
/// the process-wide RNG rather than a room-local one — seeds need not be
/// reproducible, only uniformly distributed uint32s.
pub fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::types::Creature;

    fn test_config() -> RoomConfig {
        RoomConfig {
            capacity: 32,
            tick_rate_hz: 20,
            bad_frame_threshold: 16,
            bad_frame_window: Duration::from_secs(10),
        }
    }

    fn test_creature() -> Creature {
        Creature {
            creature_type: "fish".into(),
            class: "shark".into(),
            variant_index: 0,
            seed: 0x12345678,
        }
    }

    fn join(room: &mut Room, id: u32, name: &str) -> (OutboundRx, oneshot::Receiver<Result<(), CapacityError>>) {
        let (outbound, outbound_rx) = outbound_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        room.dispatch(RoomRequest::Join {
            participant_id: ParticipantId(id),
            display_name: name.to_string(),
            creature: test_creature(),
            outbound,
            reply: reply_tx,
        });
        (outbound_rx, reply_rx)
    }

    #[tokio::test]
    async fn first_joiner_becomes_host() {
        let mut room = Room::new(RoomId("r#1".into()), 42, test_config());
        let (mut rx, reply) = join(&mut room, 1, "a");
        assert!(reply.await.unwrap().is_ok());
        let welcome = rx.lifecycle.recv().await.unwrap();
        match welcome {
            Frame::Welcome {
                host_id, is_host, ..
            } => {
                assert_eq!(host_id, ParticipantId(1));
                assert!(is_host);
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_joiner_is_not_host_and_sees_existing_participant() {
        let mut room = Room::new(RoomId("r#1".into()), 42, test_config());
        let (_rx_a, _) = join(&mut room, 1, "a");
        let (mut rx_b, _) = join(&mut room, 2, "b");

        let welcome = rx_b.lifecycle.recv().await.unwrap();
        match welcome {
            Frame::Welcome {
                host_id,
                is_host,
                existing_participants,
                ..
            } => {
                assert_eq!(host_id, ParticipantId(1));
                assert!(!is_host);
                assert_eq!(existing_participants.len(), 1);
                assert_eq!(existing_participants[0].id, ParticipantId(1));
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn host_migrates_to_earliest_remaining_joiner_on_disconnect() {
        let mut room = Room::new(RoomId("r#1".into()), 42, test_config());
        let (_rx_a, _) = join(&mut room, 1, "a");
        let (mut rx_b, _) = join(&mut room, 2, "b");
        // Drain b's PLAYER_JOIN-irrelevant WELCOME before disconnect traffic.
        let _ = rx_b.lifecycle.recv().await.unwrap();

        room.handle_disconnect(ParticipantId(1));

        let leave = rx_b.lifecycle.recv().await.unwrap();
        assert_eq!(leave, Frame::PlayerLeave { participant_id: ParticipantId(1) });
        let host_changed = rx_b.lifecycle.recv().await.unwrap();
        assert_eq!(
            host_changed,
            Frame::HostChanged {
                host_id: ParticipantId(2)
            }
        );
        assert_eq!(room.host_id, Some(ParticipantId(2)));
    }

    #[tokio::test]
    async fn no_host_changed_when_non_host_disconnects() {
        let mut room = Room::new(RoomId("r#1".into()), 42, test_config());
        let (_rx_a, _) = join(&mut room, 1, "a");
        let (mut rx_b, _) = join(&mut room, 2, "b");
        let _ = rx_b.lifecycle.recv().await.unwrap();

        room.handle_disconnect(ParticipantId(2));
        let leave = rx_b.lifecycle.recv().await.unwrap();
        assert_eq!(leave, Frame::PlayerLeave { participant_id: ParticipantId(2) });
        assert_eq!(room.host_id, Some(ParticipantId(1)));
    }

    #[tokio::test]
    async fn volume_submitted_out_of_range_is_clamped() {
        let mut room = Room::new(RoomId("r#1".into()), 42, test_config());
        let (_rx, _) = join(&mut room, 1, "a");
        room.handle_submit_transform(ParticipantId(1), Transform::ORIGIN, Some(WorldVolume(5000.0)));
        assert_eq!(room.participants[&ParticipantId(1)].world_volume.0, 1000.0);
    }

    #[test]
    fn room_full_rejects_join() {
        let mut config = test_config();
        config.capacity = 1;
        let mut room = Room::new(RoomId("r#1".into()), 42, config);
        let (outbound1, _rx1) = outbound_channel();
        let (reply1, _reply1_rx) = oneshot::channel();
        room.dispatch(RoomRequest::Join {
            participant_id: ParticipantId(1),
            display_name: "a".into(),
            creature: test_creature(),
            outbound: outbound1,
            reply: reply1,
        });

        let (outbound2, _rx2) = outbound_channel();
        let (reply2, reply2_rx) = oneshot::channel();
        room.dispatch(RoomRequest::Join {
            participant_id: ParticipantId(2),
            display_name: "b".into(),
            creature: test_creature(),
            outbound: outbound2,
            reply: reply2,
        });
        assert!(matches!(
            reply2_rx.try_recv().unwrap(),
            Err(CapacityError::RoomFull(_))
        ));
    }

    #[test]
    fn npc_seed_derivation_is_deterministic() {
        assert_eq!(derive_npc_seed(42), derive_npc_seed(42));
        assert_ne!(derive_npc_seed(42), derive_npc_seed(43));
    }

    /// A lifecycle frame (anything other than BATCH_POSITIONS) must never be
    /// silently dropped on a saturated outbound queue — the peer gets
    /// disconnected instead, per spec.md §7's CapacityError policy.
    #[tokio::test]
    async fn saturated_lifecycle_queue_disconnects_the_participant_instead_of_dropping_the_frame() {
        let mut room = Room::new(RoomId("r#1".into()), 1, test_config());
        let (_rx1, reply1) = join(&mut room, 1, "a");
        assert!(reply1.await.unwrap().is_ok());

        // Seat participant 2 with a lifecycle queue of capacity 1 that's
        // already full, so the next broadcast to it fails immediately.
        let (lifecycle_tx, _lifecycle_rx) = mpsc::channel(1);
        let (batch_tx, _batch_rx) = watch::channel(None);
        lifecycle_tx
            .try_send(Frame::CloseReason {
                reason: "filler".into(),
            })
            .unwrap();
        room.participants.insert(
            ParticipantId(2),
            Participant {
                id: ParticipantId(2),
                display_name: "b".into(),
                creature: test_creature(),
                transform: Transform::ORIGIN,
                world_volume: WorldVolume::default(),
                joined_at: Instant::now(),
                last_seen_at: Instant::now(),
                join_index: 1,
                abilities: HashMap::new(),
                dirty: false,
                outbound: Outbound {
                    lifecycle: lifecycle_tx,
                    batch: batch_tx,
                },
            },
        );

        room.dispatch(RoomRequest::Chat {
            participant_id: ParticipantId(1),
            text: "hi".into(),
            is_emoji: false,
            show_proximity: false,
        });

        assert!(!room.participants.contains_key(&ParticipantId(2)));
    }

    /// S5: BATCH_POSITIONS ticks at the configured rate, each carrying a
    /// `server_time_ms` no earlier than the previous tick. Runs against the
    /// real clock (not `start_paused`) since `server_time_ms` is derived
    /// from `std::time::Instant`, which tokio's virtual clock does not
    /// advance; a fast tick rate keeps the real wall-clock cost small.
    #[tokio::test]
    async fn batch_positions_tick_at_configured_rate_with_monotonic_server_time() {
        let mut config = test_config();
        config.tick_rate_hz = 50; // 20ms interval, keeps this test fast
        let mut room = Room::new(RoomId("r#1".into()), 42, config);
        let (outbound, mut rx) = outbound_channel();
        let (reply_tx, _reply_rx) = oneshot::channel();
        room.dispatch(RoomRequest::Join {
            participant_id: ParticipantId(1),
            display_name: "a".into(),
            creature: test_creature(),
            outbound,
            reply: reply_tx,
        });
        let _ = rx.lifecycle.recv().await.unwrap(); // drain WELCOME

        let (inbound_tx, inbound_rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
        tokio::spawn(Room::run(room, inbound_rx));

        let mut last_server_time = None;
        for i in 0..5 {
            inbound_tx
                .send(RoomRequest::SubmitTransform {
                    participant_id: ParticipantId(1),
                    transform: Transform {
                        pos: [i as f64, 0.0, 0.0],
                        ..Transform::ORIGIN
                    },
                    volume: None,
                })
                .await
                .unwrap();

            rx.batch.changed().await.unwrap();
            let frame = rx.batch.borrow_and_update().clone().unwrap();
            let Frame::BatchPositions { server_time_ms, .. } = frame else {
                panic!("expected BatchPositions");
            };
            if let Some(prev) = last_server_time {
                assert!(server_time_ms >= prev);
            }
            last_server_time = Some(server_time_ms);
        }
    }

    /// A freshly spawned room is empty until its creator's `Join` is
    /// dispatched. A ticker firing in that gap must not read the room as
    /// "everyone left" and exit — otherwise the creator's own `Join`, sent
    /// moments later, finds a closed inbound channel.
    #[tokio::test]
    async fn empty_room_survives_a_tick_before_its_first_join() {
        let mut config = test_config();
        config.tick_rate_hz = 50; // 20ms interval, keeps this test fast
        let room = Room::new(RoomId("r#1".into()), 42, config);
        let (inbound_tx, inbound_rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
        tokio::spawn(Room::run(room, inbound_rx));

        // Give the ticker room to fire at least once against an empty room.
        tokio::time::sleep(Duration::from_millis(60)).await;

        let (outbound, mut rx) = outbound_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        inbound_tx
            .send(RoomRequest::Join {
                participant_id: ParticipantId(1),
                display_name: "a".into(),
                creature: test_creature(),
                outbound,
                reply: reply_tx,
            })
            .await
            .expect("room task must still be alive to admit the first joiner");
        assert!(reply_rx.await.unwrap().is_ok());
        let welcome = rx.lifecycle.recv().await.unwrap();
        assert!(matches!(welcome, Frame::Welcome { .. }));
    }
}

//! Client-side session: owns the socket, the [`NetworkClock`], one
//! [`PositionBuffer`] per remote participant, and the local
//! [`SendScheduler`]. There is no client-hosted game-logic backend to
//! dispatch into here, only server-authoritative state to mirror.

use std::collections::HashMap;

use protocol::types::{AbilityKey, AbilityParams, Creature, Geometry, NpcId, ParticipantId, RoomId, Transform, WorldVolume};
use protocol::Frame;

use crate::clock::NetworkClock;
use crate::position_buffer::{PositionBuffer, Sample};
use crate::send_scheduler::SendScheduler;
use crate::socket::Socket;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    AwaitingWelcome,
    Joined {
        participant_id: ParticipantId,
        room_id: RoomId,
        host_id: ParticipantId,
        is_host: bool,
    },
    Closed {
        reason: String,
    },
}

/// Application-visible effects of frames received since the last poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Welcomed {
        participant_id: ParticipantId,
        room_id: RoomId,
        host_id: ParticipantId,
        is_host: bool,
    },
    PlayerJoined {
        participant_id: ParticipantId,
        display_name: String,
        creature: Creature,
        transform: Transform,
        world_volume: WorldVolume,
    },
    PlayerLeft {
        participant_id: ParticipantId,
    },
    HostChanged {
        host_id: ParticipantId,
    },
    NpcSpawned {
        payload: Vec<u8>,
    },
    NpcDied {
        npc_id: NpcId,
        eaten_by: ParticipantId,
    },
    NpcSnapshot {
        tick: u64,
        fish: Vec<u8>,
    },
    MapChanged {
        seed: u32,
        requester_id: ParticipantId,
    },
    Chat {
        sender_id: ParticipantId,
        text: String,
        is_emoji: bool,
        show_proximity: bool,
    },
    PrismPlaced {
        prism_id: String,
        placer_id: ParticipantId,
        geometry: Geometry,
    },
    PrismRemoved {
        prism_id: String,
        placer_id: ParticipantId,
    },
    AbilityStarted {
        participant_id: ParticipantId,
        ability: AbilityKey,
        params: AbilityParams,
    },
    AbilityStopped {
        participant_id: ParticipantId,
        ability: AbilityKey,
        params: AbilityParams,
    },
    Closed {
        reason: String,
    },
}

pub struct Connection {
    socket: Socket,
    clock: NetworkClock,
    scheduler: SendScheduler,
    remotes: HashMap<ParticipantId, PositionBuffer>,
    state: ConnectionState,
}

impl Connection {
    pub fn connect(
        url: &str,
        display_name: String,
        creature: Creature,
        send_rate_hz: f64,
    ) -> Result<Self, String> {
        let mut socket = Socket::connect(url)?;
        socket.send(&Frame::JoinGame {
            display_name,
            creature,
        });
        Ok(Connection {
            socket,
            clock: NetworkClock::new(),
            scheduler: SendScheduler::new(send_rate_hz),
            remotes: HashMap::new(),
            state: ConnectionState::AwaitingWelcome,
        })
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn clock(&self) -> &NetworkClock {
        &self.clock
    }

    /// Drains the transport and applies every frame received since the last
    /// call, returning the events an application layer should react to.
    pub fn poll(&mut self, now_ms: f64) -> Vec<ConnectionEvent> {
        let frames = match self.socket.poll() {
            Ok(frames) => frames,
            Err(reason) => {
                self.state = ConnectionState::Closed {
                    reason: reason.clone(),
                };
                return vec![ConnectionEvent::Closed { reason }];
            }
        };

        let mut events = Vec::new();
        for frame in frames {
            events.extend(apply_inbound_frame(
                &mut self.state,
                &mut self.clock,
                &mut self.remotes,
                frame,
                now_ms,
            ));
        }
        events
    }

    /// Submits the local transform for send-rate and delta-threshold
    /// gating; sends a POSITION frame only when the scheduler allows it.
    pub fn submit_transform(&mut self, now_ms: f64, transform: Transform, volume: Option<WorldVolume>) {
        if let Some(outgoing) = self.scheduler.maybe_send(now_ms, transform, volume) {
            self.socket.send(&Frame::Position {
                transform: outgoing.transform,
                volume: outgoing.volume,
            });
        }
    }

    pub fn send_ping(&mut self, now_ms: f64) {
        self.socket.send(&Frame::Ping {
            client_time_ms: now_ms as u64,
        });
    }

    pub fn send_eat_npc(&mut self, npc_id: NpcId) {
        self.socket.send(&Frame::EatNpc { npc_id });
    }

    pub fn send_chat(&mut self, sender_id: ParticipantId, text: String, is_emoji: bool, show_proximity: bool) {
        self.socket.send(&Frame::Chat {
            sender_id,
            text,
            is_emoji,
            show_proximity,
        });
    }

    /// Render-time-interpolated transform for a remote participant, or
    /// `None` if no sample has arrived for it yet.
    pub fn sample_remote(&self, participant_id: ParticipantId, now_ms: f64) -> Option<Transform> {
        let render_time_ms = self.clock.render_time_ms(now_ms);
        self.remotes.get(&participant_id)?.sample(render_time_ms)
    }
}

/// Updates connection state and remote position buffers for one inbound
/// frame, returning whatever application-visible events it produced. Kept
/// free of socket I/O so it is directly unit-testable.
fn apply_inbound_frame(
    state: &mut ConnectionState,
    clock: &mut NetworkClock,
    remotes: &mut HashMap<ParticipantId, PositionBuffer>,
    frame: Frame,
    now_ms: f64,
) -> Vec<ConnectionEvent> {
    match frame {
        Frame::Welcome {
            participant_id,
            room_id,
            host_id,
            is_host,
            existing_participants,
            ..
        } => {
            *state = ConnectionState::Joined {
                participant_id,
                room_id: room_id.clone(),
                host_id,
                is_host,
            };
            for existing in &existing_participants {
                remotes.entry(existing.id).or_insert_with(PositionBuffer::new).push(Sample {
                    server_time_ms: now_ms,
                    transform: existing.transform,
                });
            }
            vec![ConnectionEvent::Welcomed {
                participant_id,
                room_id,
                host_id,
                is_host,
            }]
        }
        Frame::PlayerJoin {
            participant_id,
            display_name,
            creature,
            transform,
            world_volume,
        } => {
            remotes.entry(participant_id).or_insert_with(PositionBuffer::new).push(Sample {
                server_time_ms: now_ms,
                transform,
            });
            vec![ConnectionEvent::PlayerJoined {
                participant_id,
                display_name,
                creature,
                transform,
                world_volume,
            }]
        }
        Frame::PlayerLeave { participant_id } => {
            remotes.remove(&participant_id);
            vec![ConnectionEvent::PlayerLeft { participant_id }]
        }
        Frame::BatchPositions { server_time_ms, entries } => {
            for entry in entries {
                remotes.entry(entry.id).or_insert_with(PositionBuffer::new).push(Sample {
                    server_time_ms: server_time_ms as f64,
                    transform: entry.transform,
                });
            }
            Vec::new()
        }
        Frame::Pong {
            client_time_ms,
            server_time_ms,
        } => {
            clock.on_pong(client_time_ms as f64, server_time_ms as f64, now_ms);
            Vec::new()
        }
        Frame::HostChanged { host_id } => {
            if let ConnectionState::Joined { host_id: current, is_host, participant_id, .. } = state {
                *current = host_id;
                *is_host = *participant_id == host_id;
            }
            vec![ConnectionEvent::HostChanged { host_id }]
        }
        Frame::HostAssigned { is_host } => {
            if let ConnectionState::Joined { is_host: current, .. } = state {
                *current = is_host;
            }
            Vec::new()
        }
        Frame::NpcSpawn { payload } => vec![ConnectionEvent::NpcSpawned { payload }],
        Frame::NpcDeath { npc_id, eaten_by } => vec![ConnectionEvent::NpcDied { npc_id, eaten_by }],
        Frame::NpcSnapshot { tick, fish } => vec![ConnectionEvent::NpcSnapshot { tick, fish }],
        Frame::MapChange { seed, requester_id } => vec![ConnectionEvent::MapChanged { seed, requester_id }],
        Frame::Chat {
            sender_id,
            text,
            is_emoji,
            show_proximity,
        } => vec![ConnectionEvent::Chat {
            sender_id,
            text,
            is_emoji,
            show_proximity,
        }],
        Frame::PrismPlace {
            prism_id,
            placer_id,
            geometry,
        } => vec![ConnectionEvent::PrismPlaced {
            prism_id,
            placer_id,
            geometry,
        }],
        Frame::PrismRemove { prism_id, placer_id } => vec![ConnectionEvent::PrismRemoved { prism_id, placer_id }],
        Frame::AbilityStart {
            participant_id,
            ability,
            params,
        } => vec![ConnectionEvent::AbilityStarted {
            participant_id,
            ability,
            params,
        }],
        Frame::AbilityStop {
            participant_id,
            ability,
            params,
        } => vec![ConnectionEvent::AbilityStopped {
            participant_id,
            ability,
            params,
        }],
        Frame::CloseReason { reason } => {
            *state = ConnectionState::Closed {
                reason: reason.clone(),
            };
            vec![ConnectionEvent::Closed { reason }]
        }
        // CreatureUpdate/SizeUpdate/Passthrough and every client-to-server
        // variant carry nothing an application needs to react to here.
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::types::ExistingParticipant;

    fn creature() -> Creature {
        Creature {
            creature_type: "eel".to_string(),
            class: "predator".to_string(),
            variant_index: 0,
            seed: 1,
        }
    }

    #[test]
    fn welcome_transitions_to_joined_and_seeds_remote_buffers() {
        let mut state = ConnectionState::AwaitingWelcome;
        let mut clock = NetworkClock::new();
        let mut remotes = HashMap::new();

        let existing = ExistingParticipant {
            id: ParticipantId(7),
            display_name: "barnacle".to_string(),
            creature: creature(),
            transform: Transform::ORIGIN,
            world_volume: WorldVolume::default(),
        };

        let events = apply_inbound_frame(
            &mut state,
            &mut clock,
            &mut remotes,
            Frame::Welcome {
                participant_id: ParticipantId(1),
                room_id: RoomId("room-1".to_string()),
                world_seed: 42,
                npc_seed: 99,
                dead_npc_ids: Vec::new(),
                existing_participants: vec![existing],
                host_id: ParticipantId(1),
                is_host: true,
            },
            0.0,
        );

        assert!(matches!(state, ConnectionState::Joined { is_host: true, .. }));
        assert_eq!(events.len(), 1);
        assert!(remotes.contains_key(&ParticipantId(7)));
    }

    #[test]
    fn host_changed_updates_is_host_flag() {
        let mut state = ConnectionState::Joined {
            participant_id: ParticipantId(2),
            room_id: RoomId("room-1".to_string()),
            host_id: ParticipantId(1),
            is_host: false,
        };
        let mut clock = NetworkClock::new();
        let mut remotes = HashMap::new();

        apply_inbound_frame(
            &mut state,
            &mut clock,
            &mut remotes,
            Frame::HostChanged {
                host_id: ParticipantId(2),
            },
            0.0,
        );

        assert!(matches!(
            state,
            ConnectionState::Joined { is_host: true, host_id: ParticipantId(2), .. }
        ));
    }

    #[test]
    fn batch_positions_feed_the_matching_remote_buffer() {
        let mut state = ConnectionState::Joined {
            participant_id: ParticipantId(1),
            room_id: RoomId("room-1".to_string()),
            host_id: ParticipantId(1),
            is_host: true,
        };
        let mut clock = NetworkClock::new();
        let mut remotes = HashMap::new();

        apply_inbound_frame(
            &mut state,
            &mut clock,
            &mut remotes,
            Frame::BatchPositions {
                server_time_ms: 1000,
                entries: vec![protocol::frame::BatchEntry {
                    id: ParticipantId(5),
                    transform: Transform::ORIGIN,
                    volume: None,
                }],
            },
            1000.0,
        );

        assert_eq!(remotes.get(&ParticipantId(5)).map(|b| b.len()), Some(1));
    }

    #[test]
    fn pong_feeds_the_clock() {
        let mut state = ConnectionState::AwaitingWelcome;
        let mut clock = NetworkClock::new();
        let mut remotes = HashMap::new();

        apply_inbound_frame(
            &mut state,
            &mut clock,
            &mut remotes,
            Frame::Pong {
                client_time_ms: 1000,
                server_time_ms: 1010,
            },
            1020.0,
        );

        assert!(clock.rtt_ms() > 0.0);
    }

    #[test]
    fn close_reason_transitions_to_closed() {
        let mut state = ConnectionState::AwaitingWelcome;
        let mut clock = NetworkClock::new();
        let mut remotes = HashMap::new();

        let events = apply_inbound_frame(
            &mut state,
            &mut clock,
            &mut remotes,
            Frame::CloseReason {
                reason: "room is full".to_string(),
            },
            0.0,
        );

        assert!(matches!(state, ConnectionState::Closed { .. }));
        assert_eq!(events.len(), 1);
    }
}

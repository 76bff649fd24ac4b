//! Process-wide dispatcher. Accepts new connections, assigns them to
//! [`crate::room::Room`]s, evicts dead rooms, and exposes the `/stats`
//! observability endpoint. A directory of lightweight [`RoomHandle`]s —
//! the Rooms themselves run as detached tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use protocol::types::{ParticipantId, RoomId};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::config::RoomConfig;
use crate::room::{Room, RoomRequest};

/// Participant count kept outside the Room task so the Hub can pick a room
/// with spare capacity without round-tripping a request through it.
#[derive(Clone, Default)]
pub struct RoomStats {
    pub participant_count: Arc<AtomicUsize>,
}

struct RoomHandle {
    sender: mpsc::Sender<RoomRequest>,
    stats: RoomStats,
    created_at: Instant,
}

/// Per-connection counters surfaced at `/stats`, updated by the connection
/// itself as frames arrive. There is no server-side RTT measurement: PING/PONG
/// round trips are observed and consumed entirely on the client, so this
/// only tracks what the server actually knows about a connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    pub messages_received: u64,
}

#[derive(Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub participant_count: usize,
    pub age_secs: u64,
}

#[derive(Serialize)]
pub struct ConnectionSummary {
    pub participant_id: u32,
    pub messages_received: u64,
}

#[derive(Serialize)]
pub struct Stats {
    pub room_count: usize,
    pub rooms: Vec<RoomSummary>,
    pub connections: Vec<ConnectionSummary>,
}

pub struct Hub {
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
    connection_stats: RwLock<HashMap<ParticipantId, ConnectionStats>>,
    next_participant_id: AtomicU32,
    next_room_ordinal: AtomicU32,
    room_config: RoomConfig,
}

impl Hub {
    pub fn new(room_config: RoomConfig) -> Self {
        Hub {
            rooms: Mutex::new(HashMap::new()),
            connection_stats: RwLock::new(HashMap::new()),
            next_participant_id: AtomicU32::new(1),
            next_room_ordinal: AtomicU32::new(1),
            room_config,
        }
    }

    pub fn next_participant_id(&self) -> ParticipantId {
        ParticipantId(self.next_participant_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn room_config(&self) -> RoomConfig {
        self.room_config
    }

    /// Picks an existing room with spare capacity, honoring `room_hint`
    /// first if given and still alive, or spawns a fresh one with a newly
    /// generated world seed.
    pub async fn assign(&self, room_hint: Option<RoomId>) -> (RoomId, mpsc::Sender<RoomRequest>) {
        let mut rooms = self.rooms.lock().await;
        rooms.retain(|id, handle| {
            let alive = !handle.sender.is_closed();
            if !alive {
                tracing::info!(room = %id.0, "pruning dead room from directory");
            }
            alive
        });

        if let Some(hint) = &room_hint {
            if let Some(handle) = rooms.get(hint) {
                return (hint.clone(), handle.sender.clone());
            }
        }

        let capacity = self.room_config.capacity;
        if let Some((id, handle)) = rooms
            .iter()
            .find(|(_, h)| h.stats.participant_count.load(Ordering::Relaxed) < capacity)
        {
            return (id.clone(), handle.sender.clone());
        }

        let room_id = room_hint.unwrap_or_else(|| self.fresh_room_id());
        let world_seed = crate::room::rand_seed();
        let (tx, rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
        let stats = RoomStats::default();
        let room = Room::with_participant_count_handle(
            room_id.clone(),
            world_seed,
            self.room_config,
            stats.participant_count.clone(),
        );
        tokio::spawn(Room::run(room, rx));

        rooms.insert(
            room_id.clone(),
            RoomHandle {
                sender: tx.clone(),
                stats,
                created_at: Instant::now(),
            },
        );
        (room_id, tx)
    }

    fn fresh_room_id(&self) -> RoomId {
        RoomId(format!(
            "room-{}",
            self.next_room_ordinal.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Periodic watchdog: a cheap fallback in case a room task panics
    /// instead of exiting cleanly and closing its sender.
    pub async fn reap_dead_rooms(&self) {
        let mut rooms = self.rooms.lock().await;
        rooms.retain(|id, handle| {
            let alive = !handle.sender.is_closed();
            if !alive {
                tracing::info!(room = %id.0, "watchdog removed dead room");
            }
            alive
        });
    }

    pub async fn record_message(&self, participant_id: ParticipantId) {
        let mut stats = self.connection_stats.write().await;
        let entry = stats.entry(participant_id).or_default();
        entry.messages_received += 1;
    }

    pub async fn forget_connection(&self, participant_id: ParticipantId) {
        self.connection_stats.write().await.remove(&participant_id);
    }

    pub async fn stats(&self) -> Stats {
        let rooms = self.rooms.lock().await;
        let room_summaries = rooms
            .iter()
            .map(|(id, handle)| RoomSummary {
                room_id: id.0.clone(),
                participant_count: handle.stats.participant_count.load(Ordering::Relaxed),
                age_secs: handle.created_at.elapsed().as_secs(),
            })
            .collect();
        let room_count = rooms.len();
        drop(rooms);

        let connections = self
            .connection_stats
            .read()
            .await
            .iter()
            .map(|(id, stats)| ConnectionSummary {
                participant_id: id.0,
                messages_received: stats.messages_received,
            })
            .collect();

        Stats {
            room_count,
            rooms: room_summaries,
            connections,
        }
    }
}

//! Deduplicates concurrent `EAT_NPC` claims. A shared NPC population is
//! simulated on the current host; several clients may independently
//! conclude they ate the same NPC, so the server is the deduplicator.
//!
//! This is a free function rather than its own task: it only touches
//! [`crate::room::Room::dead_npc_ids`], which is already single-writer
//! owned by the Room's request loop, so no extra concurrency primitive is
//! needed.

use protocol::types::{NpcId, ParticipantId};

use crate::room::Room;

/// Outcome of an `EAT_NPC` claim, telling the caller who to notify.
pub enum EatOutcome {
    /// First claim on this NPC. Broadcast `NPC_DEATH{npc_id, eaten_by}` to
    /// every participant, including the eater.
    Accepted { eaten_by: ParticipantId },
    /// `npc_id` was already dead. Reply privately to `eater_id` with the
    /// original eater so its client removes the NPC visually, and do not
    /// broadcast again.
    AlreadyDead { eaten_by: ParticipantId },
}

/// Applies the "first accepted EAT_NPC wins" rule. Must only be called
/// from inside the Room's single-writer request loop.
pub fn resolve_eat(room: &mut Room, eater_id: ParticipantId, npc_id: NpcId) -> EatOutcome {
    if let Some(&previous_eater) = room.dead_npc_ids.get(&npc_id) {
        return EatOutcome::AlreadyDead {
            eaten_by: previous_eater,
        };
    }
    room.dead_npc_ids.insert(npc_id, eater_id);
    EatOutcome::Accepted { eaten_by: eater_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use protocol::types::RoomId;
    use std::time::Duration;

    fn test_room() -> Room {
        Room::new(
            RoomId("test#room".into()),
            1,
            RoomConfig {
                capacity: 32,
                tick_rate_hz: 20,
                bad_frame_threshold: 16,
                bad_frame_window: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn first_claim_wins_subsequent_claims_are_idempotent() {
        let mut room = test_room();
        let npc = NpcId(777);

        let first = resolve_eat(&mut room, ParticipantId(1), npc);
        assert!(matches!(first, EatOutcome::Accepted { eaten_by } if eaten_by == ParticipantId(1)));

        let second = resolve_eat(&mut room, ParticipantId(2), npc);
        assert!(
            matches!(second, EatOutcome::AlreadyDead { eaten_by } if eaten_by == ParticipantId(1))
        );
        assert_eq!(room.dead_npc_ids.len(), 1);
    }

    #[test]
    fn distinct_npcs_are_independent() {
        let mut room = test_room();
        resolve_eat(&mut room, ParticipantId(1), NpcId(1));
        resolve_eat(&mut room, ParticipantId(1), NpcId(2));
        assert_eq!(room.dead_npc_ids.len(), 2);
    }
}

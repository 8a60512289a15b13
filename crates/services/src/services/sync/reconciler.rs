//! Finalizes or undoes an optimistic write once its remote call settles.

use db::models::entity::{Entity, EntityId};
use tracing::{debug, warn};

use super::state::{MutationSeq, Settlement, SyncState, is_newer, is_older};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// The store now reflects the settlement.
    Applied,
    /// The mutation was already settled; the store was left alone.
    Skipped(Settlement),
    /// No pending record matches. Logged as a store inconsistency.
    Missing,
}

struct Released {
    previous_snapshot: Option<Entity>,
    deferred: Option<Entity>,
}

impl SyncState {
    /// Accept a successful write, upserting the server's canonical entity when there is one.
    pub fn finalize(
        &mut self,
        id: &EntityId,
        seq: MutationSeq,
        canonical: Option<Entity>,
    ) -> Settled {
        let released = match self.settle(id, seq, Settlement::Committed) {
            Ok(released) => released,
            Err(skipped) => return skipped,
        };

        match canonical {
            Some(entity) if entity.id == *id => {
                // Another writer may have moved past our write while it was in flight.
                let newer = released
                    .deferred
                    .filter(|deferred| deferred.id == *id && is_newer(deferred, &entity));
                self.store.upsert(entity);
                if let Some(deferred) = newer {
                    debug!(
                        entity_id = %id,
                        seq,
                        revision = ?deferred.revision,
                        "Replaying newer deferred inbound event after commit"
                    );
                    self.store.upsert(deferred);
                }
            }
            Some(entity) => {
                warn!(
                    entity_id = %id,
                    canonical_id = %entity.id,
                    seq,
                    "Store inconsistency: canonical entity has a different id, keeping optimistic value"
                );
            }
            None => {}
        }
        Settled::Applied
    }

    /// Restore the snapshot captured when the mutation started.
    pub fn rollback(&mut self, id: &EntityId, seq: MutationSeq) -> Settled {
        let released = match self.settle(id, seq, Settlement::RolledBack) {
            Ok(released) => released,
            Err(skipped) => return skipped,
        };

        let deferred = released.deferred.filter(|deferred| {
            released
                .previous_snapshot
                .as_ref()
                .is_none_or(|snapshot| !is_older(deferred, snapshot))
        });

        match released.previous_snapshot {
            Some(snapshot) => {
                self.store.upsert(snapshot);
            }
            None => {
                self.store.remove(id.as_str());
            }
        }

        // The server moved on while we were waiting; show its value rather than our snapshot.
        if let Some(deferred) = deferred {
            debug!(entity_id = %id, seq, "Replaying deferred inbound event after rollback");
            self.store.upsert(deferred);
        }
        Settled::Applied
    }

    fn settle(
        &mut self,
        id: &EntityId,
        seq: MutationSeq,
        outcome: Settlement,
    ) -> Result<Released, Settled> {
        if !self.mounted {
            debug!(entity_id = %id, seq, "Session stopped, ignoring settlement");
            return Err(Settled::Skipped(Settlement::Superseded));
        }

        let Some(record) = self.pending.get_mut(&seq) else {
            warn!(entity_id = %id, seq, "Store inconsistency: no pending mutation to settle");
            return Err(Settled::Missing);
        };
        if record.entity_id != *id {
            warn!(
                entity_id = %id,
                recorded_entity_id = %record.entity_id,
                seq,
                "Store inconsistency: pending mutation belongs to another entity"
            );
            return Err(Settled::Missing);
        }
        if record.settlement != Settlement::InFlight {
            debug!(entity_id = %id, seq, settlement = ?record.settlement, "Mutation already settled");
            return Err(Settled::Skipped(record.settlement));
        }

        record.settlement = outcome;
        let released = Released {
            previous_snapshot: record.previous_snapshot.clone(),
            deferred: record.deferred.take(),
        };
        if self.active.get(id) == Some(&seq) {
            self.active.remove(id);
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use db::models::entity::Change;
    use serde_json::json;

    use super::*;
    use crate::services::sync::state::Begun;

    fn entity(id: &str, status: &str) -> Entity {
        Entity::new(id, json!({ "status": status }).as_object().cloned().unwrap())
    }

    fn start(state: &mut SyncState, id: &str, status: &str) -> MutationSeq {
        match state
            .begin(&EntityId::from(id), Change::patch([("status", json!(status))]), 0)
            .unwrap()
        {
            Begun::Started { seq, .. } => seq,
            Begun::Tombstoned => panic!("unexpected tombstone"),
        }
    }

    #[test]
    fn test_finalize_with_canonical_overwrites() {
        let mut state = SyncState::default();
        state.store.upsert(entity("t1", "open"));
        let seq = start(&mut state, "t1", "done");

        let canonical = entity("t1", "done").with_marker(chrono::Utc::now(), 7);
        let id = EntityId::from("t1");
        assert_eq!(state.finalize(&id, seq, Some(canonical.clone())), Settled::Applied);

        assert_eq!(state.store.get("t1"), Some(&canonical));
        assert!(state.in_flight("t1").is_none());
    }

    #[test]
    fn test_finalize_without_canonical_keeps_optimistic() {
        let mut state = SyncState::default();
        state.store.upsert(entity("t1", "open"));
        let seq = start(&mut state, "t1", "done");

        assert_eq!(state.finalize(&EntityId::from("t1"), seq, None), Settled::Applied);
        assert_eq!(state.store.get("t1"), Some(&entity("t1", "done")));
    }

    #[test]
    fn test_rollback_restores_snapshot_or_removes_created() {
        let mut state = SyncState::default();
        state.store.upsert(entity("t1", "open"));
        let update = start(&mut state, "t1", "done");
        let create = start(&mut state, "t2", "open");

        assert_eq!(state.rollback(&EntityId::from("t1"), update), Settled::Applied);
        assert_eq!(state.rollback(&EntityId::from("t2"), create), Settled::Applied);

        assert_eq!(state.store.list(), vec![entity("t1", "open")]);
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let mut state = SyncState::default();
        state.store.upsert(entity("t1", "open"));
        let seq = start(&mut state, "t1", "done");
        let id = EntityId::from("t1");

        assert_eq!(state.rollback(&id, seq), Settled::Applied);
        // a late canonical must not resurrect the rolled back value
        assert_eq!(
            state.finalize(&id, seq, Some(entity("t1", "done"))),
            Settled::Skipped(Settlement::RolledBack)
        );
        assert_eq!(state.rollback(&id, seq), Settled::Skipped(Settlement::RolledBack));
        assert_eq!(state.store.get("t1"), Some(&entity("t1", "open")));

        state.retire(seq);
        assert_eq!(state.rollback(&id, seq), Settled::Missing);
    }

    #[test]
    fn test_canonical_with_foreign_id_is_ignored() {
        let mut state = SyncState::default();
        let seq = start(&mut state, "t1", "open");

        assert_eq!(
            state.finalize(&EntityId::from("t1"), seq, Some(entity("zz", "open"))),
            Settled::Applied
        );
        assert!(state.store.get("zz").is_none());
        assert_eq!(state.store.get("t1"), Some(&entity("t1", "open")));
    }

    #[test]
    fn test_rollback_replays_deferred_event() {
        let mut state = SyncState::default();
        state.store.upsert(entity("t1", "open"));
        let seq = start(&mut state, "t1", "done");
        if let Some(pending) = state.pending.get_mut(&seq) {
            pending.deferred = Some(entity("t1", "blocked"));
        }

        state.rollback(&EntityId::from("t1"), seq);
        assert_eq!(state.store.get("t1"), Some(&entity("t1", "blocked")));
    }

    #[test]
    fn test_rollback_skips_deferred_event_older_than_snapshot() {
        let mut state = SyncState::default();
        let now = chrono::Utc::now();
        state.store.upsert(entity("t1", "open").with_marker(now, 5));
        let seq = start(&mut state, "t1", "done");
        if let Some(pending) = state.pending.get_mut(&seq) {
            pending.deferred = Some(entity("t1", "old").with_marker(now, 2));
        }

        assert_eq!(state.rollback(&EntityId::from("t1"), seq), Settled::Applied);
        assert_eq!(
            state.store.get("t1"),
            Some(&entity("t1", "open").with_marker(now, 5))
        );
    }

    #[test]
    fn test_finalize_replays_newer_deferred_event() {
        let mut state = SyncState::default();
        let now = chrono::Utc::now();
        state.store.upsert(entity("t1", "open").with_marker(now, 1));
        let seq = start(&mut state, "t1", "done");
        if let Some(pending) = state.pending.get_mut(&seq) {
            pending.deferred = Some(entity("t1", "blocked").with_marker(now, 3));
        }

        let canonical = entity("t1", "done").with_marker(now, 2);
        assert_eq!(
            state.finalize(&EntityId::from("t1"), seq, Some(canonical)),
            Settled::Applied
        );
        assert_eq!(
            state.store.get("t1"),
            Some(&entity("t1", "blocked").with_marker(now, 3))
        );
    }

    #[test]
    fn test_finalize_ignores_deferred_echo_of_older_revision() {
        let mut state = SyncState::default();
        let now = chrono::Utc::now();
        state.store.upsert(entity("t1", "open").with_marker(now, 1));
        let seq = start(&mut state, "t1", "done");
        if let Some(pending) = state.pending.get_mut(&seq) {
            pending.deferred = Some(entity("t1", "done").with_marker(now, 2));
        }

        let canonical = entity("t1", "done").with_marker(now, 2);
        state.finalize(&EntityId::from("t1"), seq, Some(canonical.clone()));
        assert_eq!(state.store.get("t1"), Some(&canonical));
    }

    #[test]
    fn test_settlement_after_unmount_is_noop() {
        let mut state = SyncState::default();
        state.store.upsert(entity("t1", "open"));
        let seq = start(&mut state, "t1", "done");
        state.unmount();

        assert_eq!(
            state.rollback(&EntityId::from("t1"), seq),
            Settled::Skipped(Settlement::Superseded)
        );
        assert!(state.store.is_empty());
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use db::models::entity::{Change, Entity, EntityId, Fields};
use tracing::debug;

use super::{error::SyncError, store::LocalEntityStore};

/// Value of the local mutation counter. Strictly increasing per session.
pub type MutationSeq = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    InFlight,
    Committed,
    RolledBack,
    /// Invalidated by a remote delete, a newer local mutation or session teardown.
    Superseded,
}

/// Bookkeeping for one optimistic write until its remote call settles.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub entity_id: EntityId,
    pub previous_snapshot: Option<Entity>,
    pub desired_change: Change,
    pub submitted_at: DateTime<Utc>,
    pub seq: MutationSeq,
    pub settlement: Settlement,
    /// Latest inbound upsert held back while this mutation was in flight.
    pub deferred: Option<Entity>,
}

/// True when both carry a server revision and `incoming`'s is strictly older.
pub(super) fn is_older(incoming: &Entity, current: &Entity) -> bool {
    matches!((incoming.revision, current.revision), (Some(incoming), Some(have)) if incoming < have)
}

/// True when both carry a server revision and `incoming`'s is strictly newer.
pub(super) fn is_newer(incoming: &Entity, current: &Entity) -> bool {
    matches!((incoming.revision, current.revision), (Some(incoming), Some(have)) if incoming > have)
}

/// The remote call a mutation turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteWrite {
    Create(Fields),
    Update(Fields),
    Delete,
}

#[derive(Debug)]
pub enum Begun {
    Started {
        seq: MutationSeq,
        write: RemoteWrite,
    },
    /// The entity was deleted remotely while this mutation waited its turn.
    Tombstoned,
}

/// Everything the synchronizer mutates, guarded by one lock.
#[derive(Debug)]
pub struct SyncState {
    pub(super) store: LocalEntityStore,
    pub(super) pending: HashMap<MutationSeq, PendingMutation>,
    /// The in-flight mutation of each entity, at most one.
    pub(super) active: HashMap<EntityId, MutationSeq>,
    /// Mutations registered per entity, in flight or queued.
    pub(super) interest: HashMap<EntityId, usize>,
    /// Clock value of the last remote delete of an entity with registered mutations.
    pub(super) tombstones: HashMap<EntityId, u64>,
    pub(super) clock: u64,
    pub(super) mounted: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            store: LocalEntityStore::new(),
            pending: HashMap::new(),
            active: HashMap::new(),
            interest: HashMap::new(),
            tombstones: HashMap::new(),
            clock: 0,
            mounted: true,
        }
    }
}

impl SyncState {
    pub fn store(&self) -> &LocalEntityStore {
        &self.store
    }

    pub fn in_flight(&self, id: &str) -> Option<&PendingMutation> {
        self.active.get(id).and_then(|seq| self.pending.get(seq))
    }

    pub fn pending_count(&self) -> usize {
        self.active.len()
    }

    /// Record that a mutation on `id` was requested; returns its ticket.
    pub(super) fn register_interest(&mut self, id: &EntityId) -> u64 {
        *self.interest.entry(id.clone()).or_insert(0) += 1;
        self.clock
    }

    pub(super) fn release_interest(&mut self, id: &EntityId) {
        if let Some(count) = self.interest.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.interest.remove(id);
                self.tombstones.remove(id);
            }
        }
    }

    pub(super) fn note_remote_delete(&mut self, id: &EntityId) {
        self.clock += 1;
        if self.interest.contains_key(id) {
            self.tombstones.insert(id.clone(), self.clock);
        }
    }

    /// Capture the snapshot, apply the change optimistically and register the pending mutation.
    pub(super) fn begin(
        &mut self,
        id: &EntityId,
        change: Change,
        ticket: u64,
    ) -> Result<Begun, SyncError> {
        if !self.mounted {
            return Err(SyncError::Stopped);
        }
        if self.tombstones.get(id).is_some_and(|deleted_at| *deleted_at > ticket) {
            return Ok(Begun::Tombstoned);
        }

        let previous_snapshot = self.store.get(id.as_str()).cloned();
        let write = match (&change, &previous_snapshot) {
            (Change::Delete, None) => return Err(SyncError::EntityNotFound(id.clone())),
            (Change::Delete, Some(_)) => {
                self.store.remove(id.as_str());
                RemoteWrite::Delete
            }
            (Change::Patch(fields), Some(previous)) => {
                self.store.upsert(previous.patched(fields));
                RemoteWrite::Update(fields.clone())
            }
            (Change::Patch(fields), None) => {
                self.store.upsert(Entity::new(id.clone(), fields.clone()));
                RemoteWrite::Create(fields.clone())
            }
        };

        self.clock += 1;
        let seq = self.clock;

        let mut deferred = None;
        if let Some(displaced) = self.active.remove(id) {
            if let Some(old) = self.pending.get_mut(&displaced) {
                old.settlement = Settlement::Superseded;
                deferred = old.deferred.take();
            }
            debug!(entity_id = %id, old_seq = displaced, seq, "Superseded in-flight mutation");
        }

        self.pending.insert(
            seq,
            PendingMutation {
                entity_id: id.clone(),
                previous_snapshot,
                desired_change: change,
                submitted_at: Utc::now(),
                seq,
                settlement: Settlement::InFlight,
                deferred,
            },
        );
        self.active.insert(id.clone(), seq);

        Ok(Begun::Started { seq, write })
    }

    /// Drop the record of a mutation whose dispatcher has finished with it.
    pub(super) fn retire(&mut self, seq: MutationSeq) -> Option<PendingMutation> {
        let record = self.pending.remove(&seq)?;
        if self.active.get(&record.entity_id) == Some(&seq) {
            self.active.remove(&record.entity_id);
        }
        Some(record)
    }

    /// Tear down: every pending mutation becomes superseded and the store empties.
    pub(super) fn unmount(&mut self) -> usize {
        self.mounted = false;
        let mut superseded = 0;
        for record in self.pending.values_mut() {
            if record.settlement == Settlement::InFlight {
                record.settlement = Settlement::Superseded;
                superseded += 1;
            }
        }
        self.active.clear();
        self.tombstones.clear();
        self.store.clear();
        superseded
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn patch(status: &str) -> Change {
        Change::patch([("status", json!(status))])
    }

    #[test]
    fn test_begin_create_and_update() {
        let mut state = SyncState::default();
        let id = EntityId::from("t1");

        let Begun::Started { seq: first, write } = state.begin(&id, patch("open"), 0).unwrap()
        else {
            panic!("expected start");
        };
        assert!(matches!(write, RemoteWrite::Create(_)));
        assert!(state.in_flight("t1").unwrap().previous_snapshot.is_none());
        state.retire(first);
        assert!(state.in_flight("t1").is_none());

        let Begun::Started { seq: second, write } = state.begin(&id, patch("done"), 0).unwrap()
        else {
            panic!("expected start");
        };
        assert!(second > first);
        assert!(matches!(write, RemoteWrite::Update(_)));
        let pending = state.in_flight("t1").unwrap();
        assert_eq!(
            pending.previous_snapshot.as_ref().and_then(|e| e.field("status")),
            Some(&json!("open"))
        );
        assert_eq!(
            state.store().get("t1").and_then(|e| e.field("status")),
            Some(&json!("done"))
        );
    }

    #[test]
    fn test_delete_of_absent_entity_is_rejected() {
        let mut state = SyncState::default();
        let err = state.begin(&EntityId::from("t9"), Change::Delete, 0).unwrap_err();
        assert!(matches!(err, SyncError::EntityNotFound(_)));
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_tombstone_only_blocks_older_tickets() {
        let mut state = SyncState::default();
        let id = EntityId::from("t1");
        let ticket = state.register_interest(&id);
        state.note_remote_delete(&id);

        assert!(matches!(
            state.begin(&id, patch("done"), ticket).unwrap(),
            Begun::Tombstoned
        ));

        let later_ticket = state.register_interest(&id);
        assert!(matches!(
            state.begin(&id, patch("done"), later_ticket).unwrap(),
            Begun::Started { .. }
        ));

        state.release_interest(&id);
        state.release_interest(&id);
        assert!(state.tombstones.is_empty());
        assert!(state.interest.is_empty());
    }

    #[test]
    fn test_remote_delete_without_interest_leaves_no_tombstone() {
        let mut state = SyncState::default();
        state.note_remote_delete(&EntityId::from("t1"));
        assert!(state.tombstones.is_empty());
    }

    #[test]
    fn test_unmount_supersedes_everything() {
        let mut state = SyncState::default();
        let id = EntityId::from("t1");
        let Begun::Started { seq, .. } = state.begin(&id, patch("open"), 0).unwrap() else {
            panic!("expected start");
        };

        assert_eq!(state.unmount(), 1);
        assert!(state.store().is_empty());
        assert_eq!(state.pending[&seq].settlement, Settlement::Superseded);
        assert!(matches!(
            state.begin(&id, patch("x"), 0),
            Err(SyncError::Stopped)
        ));
    }
}

//! Merges remote-originated change events into the local store.

use std::collections::HashSet;

use db::models::entity::{ChangeEvent, Entity, EntityId};
use tracing::{debug, trace};

use super::state::{MutationSeq, Settlement, SyncState, is_older};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merged {
    Applied,
    /// Held back because a newer local write on the entity is still in flight.
    Deferred(MutationSeq),
    /// Older than the revision already in the store.
    Stale,
    Removed {
        /// The in-flight mutation the delete invalidated.
        superseded: Option<MutationSeq>,
    },
    Ignored,
}

/// Summary of a full reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reloaded {
    pub upserted: usize,
    pub removed: usize,
    pub deferred: usize,
}

impl SyncState {
    pub fn merge_event(&mut self, event: ChangeEvent) -> Merged {
        if !self.mounted {
            return Merged::Ignored;
        }
        match event {
            ChangeEvent::Inserted(entity) | ChangeEvent::Updated(entity) => self.merge_upsert(entity),
            ChangeEvent::Deleted(id) => self.merge_delete(&id),
        }
    }

    fn merge_upsert(&mut self, entity: Entity) -> Merged {
        // Every in-flight seq is newer than anything the server has acknowledged for
        // this entity, so the unsettled local edit wins until it settles.
        if let Some(&seq) = self.active.get(&entity.id)
            && let Some(pending) = self.pending.get_mut(&seq)
            && pending.settlement == Settlement::InFlight
        {
            trace!(entity_id = %entity.id, seq, "Deferring inbound event behind local mutation");
            pending.deferred = Some(entity);
            return Merged::Deferred(seq);
        }

        if let Some(current) = self.store.get(entity.id.as_str())
            && is_older(&entity, current)
        {
            debug!(
                entity_id = %entity.id,
                have = ?current.revision,
                incoming = ?entity.revision,
                "Dropping stale inbound event"
            );
            return Merged::Stale;
        }

        self.store.upsert(entity);
        Merged::Applied
    }

    fn merge_delete(&mut self, id: &EntityId) -> Merged {
        self.store.remove(id.as_str());
        self.note_remote_delete(id);

        let superseded = self.active.remove(id);
        if let Some(seq) = superseded {
            if let Some(pending) = self.pending.get_mut(&seq) {
                pending.settlement = Settlement::Superseded;
                pending.deferred = None;
            }
            debug!(entity_id = %id, seq, "Remote delete superseded in-flight mutation");
        }
        Merged::Removed { superseded }
    }

    /// Bring the store in line with a full listing of the remote collection.
    ///
    /// Entities with an in-flight mutation keep their optimistic value; the
    /// listed value is deferred for them like any inbound event.
    pub fn reload(&mut self, entities: Vec<Entity>) -> Reloaded {
        let mut summary = Reloaded::default();
        if !self.mounted {
            return summary;
        }

        let listed: HashSet<EntityId> = entities.iter().map(|e| e.id.clone()).collect();
        for entity in entities {
            match self.merge_upsert(entity) {
                Merged::Applied => summary.upserted += 1,
                Merged::Deferred(_) => summary.deferred += 1,
                _ => {}
            }
        }

        let missing: Vec<EntityId> = self
            .store
            .ids()
            .into_iter()
            .filter(|id| !listed.contains(id) && !self.active.contains_key(id))
            .collect();
        for id in missing {
            self.store.remove(id.as_str());
            summary.removed += 1;
        }
        summary
    }
}

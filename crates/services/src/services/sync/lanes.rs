//! Per-entity FIFO lanes that serialize remote writes on the same id.

use std::sync::Arc;

use dashmap::DashMap;
use db::models::entity::EntityId;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct Lanes {
    lanes: DashMap<EntityId, Arc<Mutex<()>>>,
}

/// Held while a mutation owns its entity's lane. Dropping it lets the next one in.
pub struct LaneGuard<'a> {
    lanes: &'a Lanes,
    id: EntityId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Lanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for every earlier mutation on `id` to finish. Waiters are served in arrival order.
    pub async fn acquire(&self, id: &EntityId) -> LaneGuard<'_> {
        let lane = self
            .lanes
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Armed before waiting, so a waiter cancelled mid-queue still cleans up the lane.
        let mut held = LaneGuard {
            lanes: self,
            id: id.clone(),
            guard: None,
        };
        held.guard = Some(lane.lock_owned().await);
        held
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map still holds the lane once nobody is queued on it.
        self.lanes
            .lanes
            .remove_if(&self.id, |_, lane| Arc::strong_count(lane) == 1);
    }
}

//! A synchronizer session for one remote collection.

use std::{
    cmp::Ordering,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use db::models::entity::{ChangeEvent, CollectionName, Entity, ListQuery};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    error::SyncError,
    lanes::Lanes,
    merger::{Merged, Reloaded},
    state::SyncState,
};
use crate::services::remote::{RemoteCollection, Subscription};

/// What happens when a mutation targets an entity that already has one in flight.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OverlapPolicy {
    /// Wait for the earlier mutation to settle, in arrival order.
    #[default]
    Queue,
    /// Take over immediately; the earlier mutation's settlement no longer touches the store.
    Supersede,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub overlap_policy: OverlapPolicy,
    /// Remote writes that take longer fail with [`RemoteError::Timeout`](crate::services::remote::RemoteError::Timeout).
    pub remote_timeout: Option<Duration>,
    /// Filter and ordering used for the initial load and every resync.
    pub list_query: ListQuery,
}

enum Phase {
    Idle,
    Starting,
    Running(JoinHandle<()>),
    Stopped,
}

pub(super) struct Inner {
    pub(super) collection: CollectionName,
    pub(super) remote: Arc<dyn RemoteCollection>,
    pub(super) options: SyncOptions,
    pub(super) lanes: Lanes,
    state: Mutex<SyncState>,
    phase: Mutex<Phase>,
}

impl Inner {
    // The state is never left half-updated by a panic, so a poisoned lock is still usable.
    pub(super) fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resync(&self) -> Result<Reloaded, SyncError> {
        let entities = self
            .remote
            .list(&self.collection, &self.options.list_query)
            .await
            .map_err(SyncError::Load)?;
        let summary = self.state().reload(entities);
        info!(
            collection = %self.collection,
            upserted = summary.upserted,
            removed = summary.removed,
            deferred = summary.deferred,
            "Collection reloaded"
        );
        Ok(summary)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let phase = self.phase.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Phase::Running(handle) = phase {
            handle.abort();
        }
    }
}

/// Local mirror of one remote collection, kept current by optimistic
/// mutations and the collection's change feed.
///
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct EntitySync {
    pub(super) inner: Arc<Inner>,
}

impl EntitySync {
    pub fn new(
        collection: impl Into<CollectionName>,
        remote: Arc<dyn RemoteCollection>,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                collection: collection.into(),
                remote,
                options,
                lanes: Lanes::new(),
                state: Mutex::new(SyncState::default()),
                phase: Mutex::new(Phase::Idle),
            }),
        }
    }

    pub fn collection(&self) -> &CollectionName {
        &self.inner.collection
    }

    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    pub fn get(&self, id: &str) -> Option<Entity> {
        self.inner.state().store().get(id).cloned()
    }

    /// Snapshot of the store in insertion order.
    pub fn list(&self) -> Vec<Entity> {
        self.inner.state().store().list()
    }

    pub fn list_by<F>(&self, compare: F) -> Vec<Entity>
    where
        F: FnMut(&Entity, &Entity) -> Ordering,
    {
        self.inner.state().store().list_by(compare)
    }

    /// Mutations whose remote call has not settled yet.
    pub fn pending_count(&self) -> usize {
        self.inner.state().pending_count()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.inner.phase(), Phase::Running(_))
    }

    /// Merge one remote-originated change into the store.
    pub fn on_event(&self, event: ChangeEvent) -> Merged {
        let entity_id = event.entity_id().clone();
        let merged = self.inner.state().merge_event(event);
        debug!(collection = %self.inner.collection, entity_id = %entity_id, merged = ?merged, "Merged inbound event");
        merged
    }

    /// Subscribe to the collection, load it and start forwarding change events.
    ///
    /// Returns the number of entities in the store after the load.
    pub async fn start(&self) -> Result<usize, SyncError> {
        {
            let mut phase = self.inner.phase();
            match *phase {
                Phase::Idle => *phase = Phase::Starting,
                Phase::Stopped => return Err(SyncError::Stopped),
                Phase::Starting | Phase::Running(_) => return Err(SyncError::AlreadyStarted),
            }
        }

        let subscription = match self.subscribe_and_load().await {
            Ok(subscription) => subscription,
            Err(e) => {
                let mut phase = self.inner.phase();
                if matches!(*phase, Phase::Starting) {
                    *phase = Phase::Idle;
                }
                return Err(e);
            }
        };

        let mut phase = self.inner.phase();
        if !matches!(*phase, Phase::Starting) {
            // stopped while loading
            return Err(SyncError::Stopped);
        }
        let handle = tokio::spawn(forward_events(Arc::downgrade(&self.inner), subscription));
        *phase = Phase::Running(handle);
        drop(phase);

        let loaded = self.inner.state().store().len();
        info!(collection = %self.inner.collection, loaded, "Sync session started");
        Ok(loaded)
    }

    async fn subscribe_and_load(&self) -> Result<Subscription, SyncError> {
        // Subscribe before listing so nothing written in between is missed.
        let subscription = self
            .inner
            .remote
            .subscribe(&self.inner.collection)
            .await
            .map_err(SyncError::Subscribe)?;
        self.inner.resync().await?;
        Ok(subscription)
    }

    /// Reload the whole collection, keeping entities with an in-flight mutation as they are.
    pub async fn resync(&self) -> Result<Reloaded, SyncError> {
        if !self.is_running() {
            return Err(SyncError::Stopped);
        }
        self.inner.resync().await
    }

    /// Tear the session down. In-flight mutations resolve as superseded and the store is emptied.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.inner.phase(), Phase::Stopped);
        if matches!(previous, Phase::Stopped) {
            return;
        }
        if let Phase::Running(handle) = previous {
            handle.abort();
        }
        let superseded = self.inner.state().unmount();
        info!(collection = %self.inner.collection, superseded, "Sync session stopped");
    }
}

async fn forward_events(inner: Weak<Inner>, mut subscription: Subscription) {
    while let Some(item) = subscription.next().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match item {
            Ok(event) => {
                let entity_id = event.entity_id().clone();
                let merged = inner.state().merge_event(event);
                debug!(collection = %inner.collection, entity_id = %entity_id, merged = ?merged, "Merged inbound event");
            }
            Err(lag) => {
                warn!(
                    collection = %inner.collection,
                    missed = lag.missed,
                    "Change feed lagged, reloading collection"
                );
                if let Err(e) = inner.resync().await {
                    error!(collection = %inner.collection, error = %e, "Failed to reload collection after lag");
                }
            }
        }
    }
    debug!("Change feed closed");
}

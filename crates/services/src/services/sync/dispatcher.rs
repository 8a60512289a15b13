use db::models::entity::{Change, Entity, EntityId};
use tracing::{debug, warn};

use super::{
    error::{MutationOutcome, SyncError},
    reconciler::Settled,
    session::{EntitySync, Inner, OverlapPolicy},
    state::{Begun, MutationSeq, RemoteWrite},
};
use crate::services::remote::RemoteError;

/// Keeps the entity's registered-mutation count up for as long as the mutation lives.
struct Interest<'a> {
    inner: &'a Inner,
    id: &'a EntityId,
    ticket: u64,
}

impl<'a> Interest<'a> {
    fn register(inner: &'a Inner, id: &'a EntityId) -> Self {
        let ticket = inner.state().register_interest(id);
        Self { inner, id, ticket }
    }
}

impl Drop for Interest<'_> {
    fn drop(&mut self) {
        self.inner.state().release_interest(self.id);
    }
}

/// Rolls the optimistic change back if the mutation is dropped before its remote call settles.
struct InFlight<'a> {
    inner: &'a Inner,
    id: &'a EntityId,
    seq: MutationSeq,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state();
        state.rollback(self.id, self.seq);
        state.retire(self.seq);
        debug!(entity_id = %self.id, seq = self.seq, "Mutation cancelled, optimistic change rolled back");
    }
}

impl EntitySync {
    /// Apply `change` to the store at once, then write it to the remote collection.
    ///
    /// On a remote failure the store is rolled back to the snapshot taken
    /// before the change and [`SyncError::RemoteWriteFailed`] is returned.
    /// A change on an absent entity is a create.
    pub async fn mutate(
        &self,
        entity_id: impl Into<EntityId>,
        change: Change,
    ) -> Result<MutationOutcome, SyncError> {
        let id = entity_id.into();
        let inner = self.inner.as_ref();

        let interest = Interest::register(inner, &id);
        let _lane = match inner.options.overlap_policy {
            OverlapPolicy::Queue => Some(inner.lanes.acquire(&id).await),
            OverlapPolicy::Supersede => None,
        };

        let begun = inner.state().begin(&id, change, interest.ticket)?;
        let (seq, write) = match begun {
            Begun::Started { seq, write } => (seq, write),
            Begun::Tombstoned => {
                debug!(entity_id = %id, "Entity deleted remotely while mutation was queued");
                return Ok(MutationOutcome::Superseded);
            }
        };
        let is_delete = write == RemoteWrite::Delete;
        debug!(collection = %inner.collection, entity_id = %id, seq, "Applied optimistic change");

        let mut in_flight = InFlight {
            inner,
            id: &id,
            seq,
            armed: true,
        };
        let result = remote_write(inner, &id, write).await;
        in_flight.armed = false;

        let mut state = inner.state();
        let outcome = match result {
            Ok(canonical) => match state.finalize(&id, seq, canonical) {
                Settled::Applied => {
                    let entity = if is_delete {
                        None
                    } else {
                        state.store().get(id.as_str()).cloned()
                    };
                    Ok(MutationOutcome::Committed(entity))
                }
                Settled::Skipped(_) | Settled::Missing => Ok(MutationOutcome::Superseded),
            },
            Err(source) => match state.rollback(&id, seq) {
                Settled::Applied => Err(SyncError::RemoteWriteFailed {
                    entity_id: id.clone(),
                    source,
                }),
                Settled::Skipped(_) | Settled::Missing => {
                    debug!(entity_id = %id, seq, error = %source, "Remote write failed after mutation was superseded");
                    Ok(MutationOutcome::Superseded)
                }
            },
        };
        state.retire(seq);
        drop(state);

        match &outcome {
            Ok(MutationOutcome::Committed(_)) => {
                debug!(entity_id = %id, seq, "Mutation committed");
            }
            Ok(MutationOutcome::Superseded) => {
                debug!(entity_id = %id, seq, "Mutation superseded");
            }
            Err(e) => {
                warn!(collection = %inner.collection, entity_id = %id, seq, error = %e, "Mutation rolled back");
            }
        }
        outcome
    }
}

async fn remote_write(
    inner: &Inner,
    id: &EntityId,
    write: RemoteWrite,
) -> Result<Option<Entity>, RemoteError> {
    let call = async {
        match &write {
            RemoteWrite::Create(fields) => inner.remote.create(&inner.collection, id, fields).await,
            RemoteWrite::Update(fields) => inner.remote.update(&inner.collection, id, fields).await,
            RemoteWrite::Delete => inner.remote.delete(&inner.collection, id).await.map(|()| None),
        }
    };
    match inner.options.remote_timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| RemoteError::Timeout(limit))?,
        None => call.await,
    }
}

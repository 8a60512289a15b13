use db::models::entity::{Entity, EntityId};
use thiserror::Error;

use crate::services::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The optimistic change was rolled back before this error was returned.
    #[error("remote write for {entity_id} failed: {source}")]
    RemoteWriteFailed {
        entity_id: EntityId,
        #[source]
        source: RemoteError,
    },
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error("sync session already started")]
    AlreadyStarted,
    #[error("sync session stopped")]
    Stopped,
    #[error("failed to load collection: {0}")]
    Load(#[source] RemoteError),
    #[error("failed to subscribe to collection: {0}")]
    Subscribe(#[source] RemoteError),
}

/// How a mutation ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The remote accepted the write. Holds the stored entity, `None` after a delete.
    Committed(Option<Entity>),
    /// A remote delete, a newer local mutation or session teardown took over.
    /// The store already reflects whatever replaced it.
    Superseded,
}

impl MutationOutcome {
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Committed(entity) => entity.as_ref(),
            Self::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }
}

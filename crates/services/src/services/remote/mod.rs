//! Seam between the synchronizer and whatever backend hosts the collections.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use db::models::{
    entity::{ChangeEvent, CollectionName, Entity, EntityId, Fields, ListQuery},
    entity_record::EntityRecordError,
};
use futures::{Stream, StreamExt, stream::BoxStream};
use thiserror::Error;

pub mod sqlite;

#[cfg(test)]
pub(crate) mod scripted;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("storage error: {0}")]
    Storage(#[from] EntityRecordError),
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
}

/// The subscriber fell behind and `missed` events were dropped by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("subscription lagged, {missed} events missed")]
pub struct SubscriptionLag {
    pub missed: u64,
}

pub type SubscriptionItem = Result<ChangeEvent, SubscriptionLag>;

/// Live feed of change events for one collection. Dropping it unsubscribes.
pub struct Subscription {
    events: BoxStream<'static, SubscriptionItem>,
}

impl Subscription {
    pub fn new(events: impl Stream<Item = SubscriptionItem> + Send + 'static) -> Self {
        Self {
            events: events.boxed(),
        }
    }

    /// Next event in arrival order, `None` once the channel closes.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        self.events.next().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// A hosted collection API: CRUD plus a realtime change feed.
///
/// Writes return the backend's canonical entity when it has one (server
/// assigned timestamps, revisions); `None` means the caller's view is already
/// correct.
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    async fn create(
        &self,
        collection: &CollectionName,
        id: &EntityId,
        fields: &Fields,
    ) -> Result<Option<Entity>, RemoteError>;

    async fn update(
        &self,
        collection: &CollectionName,
        id: &EntityId,
        fields: &Fields,
    ) -> Result<Option<Entity>, RemoteError>;

    async fn delete(&self, collection: &CollectionName, id: &EntityId) -> Result<(), RemoteError>;

    async fn list(
        &self,
        collection: &CollectionName,
        query: &ListQuery,
    ) -> Result<Vec<Entity>, RemoteError>;

    async fn subscribe(&self, collection: &CollectionName) -> Result<Subscription, RemoteError>;
}

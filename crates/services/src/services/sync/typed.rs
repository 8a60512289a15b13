//! Typed front end over [`EntitySync`] for the domain records.

use std::{cmp::Ordering, marker::PhantomData, sync::Arc};

use db::models::{
    entity::{Change, EntityId},
    record::{Payload, Record, ValidationError},
};
use thiserror::Error;
use tracing::{debug, warn};
use utils::ids::new_entity_id;

use super::{
    error::{MutationOutcome, SyncError},
    session::{EntitySync, SyncOptions},
};
use crate::services::remote::RemoteCollection;

#[derive(Debug, Error)]
pub enum TypedSyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub struct TypedSync<R> {
    sync: EntitySync,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for TypedSync<R> {
    fn clone(&self) -> Self {
        Self {
            sync: self.sync.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> TypedSync<R> {
    pub fn new(remote: Arc<dyn RemoteCollection>, options: SyncOptions) -> Self {
        Self::from_sync(EntitySync::new(R::COLLECTION, remote, options))
    }

    pub fn from_sync(sync: EntitySync) -> Self {
        Self {
            sync,
            _record: PhantomData,
        }
    }

    pub fn sync(&self) -> &EntitySync {
        &self.sync
    }

    pub async fn start(&self) -> Result<usize, TypedSyncError> {
        Ok(self.sync.start().await?)
    }

    pub fn stop(&self) {
        self.sync.stop();
    }

    /// Every record in the store. Entities that do not decode are skipped.
    pub fn list(&self) -> Vec<R> {
        self.sync
            .list()
            .iter()
            .filter_map(|entity| match R::from_entity(entity) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(collection = R::COLLECTION, entity_id = %entity.id, error = %e, "Skipping malformed entity");
                    None
                }
            })
            .collect()
    }

    pub fn list_by<F>(&self, mut compare: F) -> Vec<R>
    where
        F: FnMut(&R, &R) -> Ordering,
    {
        let mut records = self.list();
        records.sort_by(|a, b| compare(a, b));
        records
    }

    pub fn get(&self, id: &str) -> Result<Option<R>, TypedSyncError> {
        match self.sync.get(id) {
            Some(entity) => Ok(Some(R::from_entity(&entity)?)),
            None => Ok(None),
        }
    }

    /// Validate and create a record under a fresh id.
    ///
    /// `Ok(None)` means the new record was deleted remotely before the write settled.
    pub async fn create(&self, payload: R::Create) -> Result<Option<R>, TypedSyncError> {
        let change = payload.into_change()?;
        let id = EntityId::new(new_entity_id());
        let outcome = self.sync.mutate(id, change).await?;
        let created = self.decode(outcome)?;
        if let Some(record) = &created {
            debug!(collection = R::COLLECTION, entity_id = record.id(), "Record created");
        }
        Ok(created)
    }

    /// Validate and apply an update to an existing record.
    pub async fn update(&self, id: &str, payload: R::Update) -> Result<Option<R>, TypedSyncError> {
        let change = payload.into_change()?;
        if self.sync.get(id).is_none() {
            return Err(SyncError::EntityNotFound(EntityId::from(id)).into());
        }
        let outcome = self.sync.mutate(id, change).await?;
        self.decode(outcome)
    }

    pub async fn delete(&self, id: &str) -> Result<MutationOutcome, TypedSyncError> {
        Ok(self.sync.mutate(id, Change::Delete).await?)
    }

    fn decode(&self, outcome: MutationOutcome) -> Result<Option<R>, TypedSyncError> {
        match outcome.entity() {
            Some(entity) => Ok(Some(R::from_entity(entity)?)),
            None => Ok(None),
        }
    }
}

//! Remote collections served from the local SQLite database.
//!
//! Every committed write is published on a broadcast channel, which is what
//! subscribers see as the realtime change feed.

use async_trait::async_trait;
use db::{
    DBService,
    models::{
        entity::{ChangeEvent, CollectionName, Entity, EntityId, Fields, ListQuery},
        entity_record::{EntityRecord, EntityRecordError},
    },
};
use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, info};

use super::{RemoteCollection, RemoteError, Subscription, SubscriptionLag};
use crate::services::{
    config::SyncConfig,
    database_validator::{DatabaseValidationError, DatabaseValidator},
};

const REQUIRED_TABLES: &[&str] = &["entities"];

#[derive(Clone)]
pub struct SqliteCollection {
    db: DBService,
    events: broadcast::Sender<(CollectionName, ChangeEvent)>,
}

impl SqliteCollection {
    pub fn new(db: DBService, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self { db, events }
    }

    /// Open the configured database and check its schema before serving it.
    pub async fn open(config: &SyncConfig) -> Result<Self, DatabaseValidationError> {
        let db = DBService::new(&config.database_url).await?;
        DatabaseValidator::new(db.pool.clone())
            .ensure_ready(REQUIRED_TABLES)
            .await?;
        info!(database_url = %config.database_url, "SQLite collections ready");
        Ok(Self::new(db, config.event_buffer))
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    fn publish(&self, collection: &CollectionName, event: ChangeEvent) {
        // No receivers is fine; nobody is watching this collection yet.
        if self.events.send((collection.clone(), event)).is_err() {
            debug!(collection = %collection, "No subscribers for change event");
        }
    }
}

fn not_found_as_remote(id: &EntityId, err: EntityRecordError) -> RemoteError {
    match err {
        EntityRecordError::NotFound(_) => RemoteError::NotFound(id.clone()),
        other => RemoteError::Storage(other),
    }
}

#[async_trait]
impl RemoteCollection for SqliteCollection {
    async fn create(
        &self,
        collection: &CollectionName,
        id: &EntityId,
        fields: &Fields,
    ) -> Result<Option<Entity>, RemoteError> {
        let record = EntityRecord::create(&self.db.pool, collection.as_str(), id.as_str(), fields)
            .await?;
        let entity = record.into_entity().map_err(EntityRecordError::from)?;
        self.publish(collection, ChangeEvent::Inserted(entity.clone()));
        Ok(Some(entity))
    }

    async fn update(
        &self,
        collection: &CollectionName,
        id: &EntityId,
        fields: &Fields,
    ) -> Result<Option<Entity>, RemoteError> {
        let record = EntityRecord::update(&self.db.pool, collection.as_str(), id.as_str(), fields)
            .await
            .map_err(|e| not_found_as_remote(id, e))?;
        let entity = record.into_entity().map_err(EntityRecordError::from)?;
        self.publish(collection, ChangeEvent::Updated(entity.clone()));
        Ok(Some(entity))
    }

    async fn delete(&self, collection: &CollectionName, id: &EntityId) -> Result<(), RemoteError> {
        let rows = EntityRecord::delete(&self.db.pool, collection.as_str(), id.as_str())
            .await
            .map_err(EntityRecordError::from)?;
        if rows == 0 {
            return Err(RemoteError::NotFound(id.clone()));
        }
        self.publish(collection, ChangeEvent::Deleted(id.clone()));
        Ok(())
    }

    async fn list(
        &self,
        collection: &CollectionName,
        query: &ListQuery,
    ) -> Result<Vec<Entity>, RemoteError> {
        let records = EntityRecord::find_all(&self.db.pool, collection.as_str(), query)
            .await
            .map_err(EntityRecordError::from)?;
        records
            .into_iter()
            .map(|record| {
                record
                    .into_entity()
                    .map_err(|e| RemoteError::Storage(e.into()))
            })
            .collect()
    }

    async fn subscribe(&self, collection: &CollectionName) -> Result<Subscription, RemoteError> {
        let wanted = collection.clone();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let item = match item {
                Ok((name, event)) if name == wanted => Some(Ok(event)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => Some(Err(SubscriptionLag { missed })),
            };
            future::ready(item)
        });
        Ok(Subscription::new(stream))
    }
}

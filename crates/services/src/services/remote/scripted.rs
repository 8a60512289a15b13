//! Test remote whose writes stay open until the test settles them by hand.

use std::sync::Mutex;

use async_trait::async_trait;
use db::models::entity::{ChangeEvent, CollectionName, Entity, EntityId, Fields, ListQuery};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{RemoteCollection, RemoteError, Subscription, SubscriptionItem, SubscriptionLag};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RemoteOp {
    Create(EntityId, Fields),
    Update(EntityId, Fields),
    Delete(EntityId),
}

/// A remote write waiting for the test to answer it.
pub(crate) struct ScriptedCall {
    pub op: RemoteOp,
    reply: oneshot::Sender<Result<Option<Entity>, RemoteError>>,
}

impl ScriptedCall {
    pub fn succeed(self, canonical: Option<Entity>) {
        let _ = self.reply.send(Ok(canonical));
    }

    pub fn fail(self, reason: &str) {
        let _ = self.reply.send(Err(RemoteError::Rejected(reason.to_string())));
    }
}

/// Handle used by tests to push realtime events into the subscription.
#[derive(Clone)]
pub(crate) struct EventFeed {
    tx: mpsc::UnboundedSender<SubscriptionItem>,
}

impl EventFeed {
    pub fn push(&self, event: ChangeEvent) {
        let _ = self.tx.send(Ok(event));
    }

    pub fn lag(&self, missed: u64) {
        let _ = self.tx.send(Err(SubscriptionLag { missed }));
    }
}

pub(crate) struct ScriptedRemote {
    calls: mpsc::UnboundedSender<ScriptedCall>,
    listing: Mutex<Vec<Entity>>,
    feed: Mutex<Option<mpsc::UnboundedReceiver<SubscriptionItem>>>,
}

impl ScriptedRemote {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScriptedCall>, EventFeed) {
        let (calls, call_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let remote = Self {
            calls,
            listing: Mutex::new(Vec::new()),
            feed: Mutex::new(Some(event_rx)),
        };
        (remote, call_rx, EventFeed { tx: event_tx })
    }

    /// What `list` returns from now on.
    pub fn set_listing(&self, entities: Vec<Entity>) {
        *self.listing.lock().unwrap() = entities;
    }

    async fn call(&self, op: RemoteOp) -> Result<Option<Entity>, RemoteError> {
        let (reply, rx) = oneshot::channel();
        self.calls
            .send(ScriptedCall { op, reply })
            .map_err(|_| RemoteError::Rejected("test dropped the call receiver".to_string()))?;
        rx.await
            .map_err(|_| RemoteError::Rejected("test dropped the call".to_string()))?
    }
}

#[async_trait]
impl RemoteCollection for ScriptedRemote {
    async fn create(
        &self,
        _collection: &CollectionName,
        id: &EntityId,
        fields: &Fields,
    ) -> Result<Option<Entity>, RemoteError> {
        self.call(RemoteOp::Create(id.clone(), fields.clone())).await
    }

    async fn update(
        &self,
        _collection: &CollectionName,
        id: &EntityId,
        fields: &Fields,
    ) -> Result<Option<Entity>, RemoteError> {
        self.call(RemoteOp::Update(id.clone(), fields.clone())).await
    }

    async fn delete(&self, _collection: &CollectionName, id: &EntityId) -> Result<(), RemoteError> {
        self.call(RemoteOp::Delete(id.clone())).await.map(|_| ())
    }

    async fn list(
        &self,
        _collection: &CollectionName,
        _query: &ListQuery,
    ) -> Result<Vec<Entity>, RemoteError> {
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn subscribe(&self, _collection: &CollectionName) -> Result<Subscription, RemoteError> {
        let rx = self
            .feed
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RemoteError::Rejected("already subscribed".to_string()))?;
        Ok(Subscription::new(UnboundedReceiverStream::new(rx)))
    }
}

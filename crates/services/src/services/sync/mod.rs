//! Optimistic synchronization of a local entity store with a remote collection.
//!
//! Mutations land in the [`LocalEntityStore`] immediately and are then written
//! to the [`RemoteCollection`](crate::services::remote::RemoteCollection).
//! The store is finalized with the server's answer or rolled back to the
//! snapshot taken before the change. Change events from the collection's
//! realtime feed are merged into the same store.

mod dispatcher;
pub mod error;
pub mod lanes;
pub mod merger;
pub mod reconciler;
pub mod session;
pub mod state;
pub mod store;
pub mod typed;

pub use error::{MutationOutcome, SyncError};
pub use merger::{Merged, Reloaded};
pub use session::{EntitySync, OverlapPolicy, SyncOptions};
pub use store::LocalEntityStore;
pub use typed::{TypedSync, TypedSyncError};

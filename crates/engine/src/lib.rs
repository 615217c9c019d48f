//! Offline-first sync engine.
//!
//! Wires the local record store, the remote store adapter, the status
//! observer and the connectivity signal into one engine instance. Local
//! writes land immediately and queue for sync; passes drain the queue when
//! connectivity allows, with bounded retries and a dead-letter state.

pub mod background;
pub mod connectivity;
pub mod context;
mod cycle;
pub mod hydrate;
pub mod status;

pub use background::{task_entity, SYNC_TASK_HEALTH_RECORDS, SYNC_TASK_TREE_UPDATES};
pub use connectivity::ConnectivityMonitor;
pub use context::{SyncEngine, SyncRuntimeState};
pub use hydrate::hydrate;
pub use status::{StatusSubscription, SyncStatusObserver};

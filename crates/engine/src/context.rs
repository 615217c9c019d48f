//! Engine context: shared handles and runtime task slots.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use grovesync_core::errors::Result;
use grovesync_core::sync::{SyncEntity, SyncPassOutcome, SyncStatus};
use grovesync_remote::RemoteStore;
use grovesync_storage_sqlite::RecordStore;

use crate::background::{self, BackgroundSyncRegistry};
use crate::connectivity::ConnectivityMonitor;
use crate::cycle;
use crate::status::SyncStatusObserver;

/// Mutable runtime state owned by one engine instance.
///
/// The cycle mutex serializes sync passes; the task slots hold the spawned
/// background loop, replay worker and status poller so stop can abort them.
pub struct SyncRuntimeState {
    pub cycle_mutex: Mutex<()>,
    pub auto_task: Mutex<Option<JoinHandle<()>>>,
    pub replay_task: Mutex<Option<JoinHandle<()>>>,
    pub poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncRuntimeState {
    pub fn new() -> Self {
        Self {
            cycle_mutex: Mutex::new(()),
            auto_task: Mutex::new(None),
            replay_task: Mutex::new(None),
            poll_task: Mutex::new(None),
        }
    }
}

impl Default for SyncRuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

/// The sync engine. One instance per open database; never a global.
pub struct SyncEngine {
    store: Arc<RecordStore>,
    remote: Arc<dyn RemoteStore>,
    observer: Arc<SyncStatusObserver>,
    connectivity: ConnectivityMonitor,
    registry: BackgroundSyncRegistry,
    runtime: SyncRuntimeState,
}

impl SyncEngine {
    pub fn new(store: Arc<RecordStore>, remote: Arc<dyn RemoteStore>) -> Arc<Self> {
        Self::with_parts(
            store,
            remote,
            SyncStatusObserver::new(),
            ConnectivityMonitor::default(),
        )
    }

    /// Build an engine around caller-supplied observer and connectivity
    /// handles, e.g. when they are shared with a UI layer.
    pub fn with_parts(
        store: Arc<RecordStore>,
        remote: Arc<dyn RemoteStore>,
        observer: Arc<SyncStatusObserver>,
        connectivity: ConnectivityMonitor,
    ) -> Arc<Self> {
        observer.set_connectivity(connectivity.current());
        Arc::new(Self {
            store,
            remote,
            observer,
            connectivity,
            registry: BackgroundSyncRegistry::new(),
            runtime: SyncRuntimeState::new(),
        })
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub(crate) fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn observer(&self) -> &Arc<SyncStatusObserver> {
        &self.observer
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub(crate) fn registry(&self) -> &BackgroundSyncRegistry {
        &self.registry
    }

    pub(crate) fn runtime(&self) -> &SyncRuntimeState {
        &self.runtime
    }

    pub fn status(&self) -> SyncStatus {
        self.observer.snapshot()
    }

    /// Run one sync pass right now. A pass already in flight makes this a
    /// no-op reported as a "busy" outcome.
    pub async fn force_sync_now(&self) -> Result<SyncPassOutcome> {
        cycle::run_sync_pass(self, None).await
    }

    /// Run one sync pass scoped to a single entity stream.
    pub async fn sync_entity_now(&self, entity: SyncEntity) -> Result<SyncPassOutcome> {
        cycle::run_sync_pass(self, Some(entity)).await
    }

    /// Start the periodic background loop, the connectivity replay worker
    /// and the status poller. Safe to call repeatedly.
    pub async fn start_auto_sync(self: &Arc<Self>) {
        background::ensure_auto_sync_started(Arc::clone(self)).await;
        background::ensure_replay_worker_started(Arc::clone(self)).await;
        background::ensure_status_poller_started(Arc::clone(self)).await;
    }

    /// Stop every background task started by [`start_auto_sync`].
    ///
    /// [`start_auto_sync`]: SyncEngine::start_auto_sync
    pub async fn stop_auto_sync(&self) {
        for slot in [
            &self.runtime.auto_task,
            &self.runtime.replay_task,
            &self.runtime.poll_task,
        ] {
            if let Some(handle) = slot.lock().await.take() {
                handle.abort();
            }
        }
    }

    /// Register a named background replay task. Unknown names are rejected.
    pub fn register_background_task(&self, tag: &str) -> Result<()> {
        self.registry.register(tag)
    }

    pub fn registered_background_tasks(&self) -> Vec<String> {
        self.registry.registered()
    }
}

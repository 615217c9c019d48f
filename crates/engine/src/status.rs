//! Sync status observer: a process-wide snapshot of connectivity, activity
//! and queue depth, with change notifications.
//!
//! The observer owns no global state; each engine instance holds its own
//! `Arc<SyncStatusObserver>`, so tests can run observers side by side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use log::debug;

use grovesync_core::sync::{ConnectivityState, SyncStatus};

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
}

/// Observable sync status. Listeners fire only on actual changes.
pub struct SyncStatusObserver {
    status: Mutex<SyncStatus>,
    table: Mutex<ListenerTable>,
}

impl SyncStatusObserver {
    pub fn new() -> Arc<Self> {
        Self::with_status(SyncStatus::default())
    }

    /// Start from a known status, e.g. rebuilt from the store on load.
    pub fn with_status(status: SyncStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            table: Mutex::new(ListenerTable::default()),
        })
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.status.lock().expect("status lock poisoned").clone()
    }

    /// Register a listener. It fires immediately with the current status,
    /// then on every change until the returned guard is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let current = self.snapshot();
        listener(&current);

        let id = {
            let mut table = self.table.lock().expect("listener lock poisoned");
            let id = table.next_id;
            table.next_id += 1;
            table.listeners.insert(id, Arc::new(listener));
            id
        };
        StatusSubscription {
            observer: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut table = self.table.lock().expect("listener lock poisoned");
        table.listeners.remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.table
            .lock()
            .expect("listener lock poisoned")
            .listeners
            .len()
    }

    /// The table lock is released before any listener runs, so a listener may
    /// call back into the observer (subscribe, snapshot, counts) freely.
    fn notify(&self, status: &SyncStatus) {
        let listeners: Vec<Listener> = {
            let table = self.table.lock().expect("listener lock poisoned");
            table.listeners.values().cloned().collect()
        };
        for listener in listeners {
            listener(status);
        }
    }

    /// Apply a mutation; listeners fire only if the status changed.
    fn mutate(&self, apply: impl FnOnce(&mut SyncStatus)) {
        let changed = {
            let mut status = self.status.lock().expect("status lock poisoned");
            let before = status.clone();
            apply(&mut status);
            if *status == before {
                None
            } else {
                Some(status.clone())
            }
        };
        if let Some(status) = changed {
            debug!(
                "[SyncStatus] connectivity={:?} syncing={} pending={}",
                status.connectivity, status.syncing, status.pending_count
            );
            self.notify(&status);
        }
    }

    pub fn set_connectivity(&self, connectivity: ConnectivityState) {
        self.mutate(|s| s.connectivity = connectivity);
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.mutate(|s| s.syncing = syncing);
    }

    pub fn set_pending_count(&self, pending_count: i64) {
        self.mutate(|s| s.pending_count = pending_count);
    }

    pub fn set_last_sync(&self, last_sync_at: Option<String>) {
        self.mutate(|s| s.last_sync_at = last_sync_at);
    }
}

/// Guard for a registered listener. Dropping it unsubscribes.
pub struct StatusSubscription {
    observer: Weak<SyncStatusObserver>,
    id: u64,
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.upgrade() {
            observer.unsubscribe(self.id);
        }
    }
}

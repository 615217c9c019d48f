//! Background sync: the periodic loop, the named replay tasks and the
//! status poller.
//!
//! Replay tasks run in a worker task separate from the foreground engine.
//! The worker shares only the store handles and the connectivity channel;
//! when connectivity returns it replays each registered task as an
//! entity-scoped pass, then clears the registration.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, info, warn};

use grovesync_core::errors::{Error, Result};
use grovesync_core::sync::{
    millis_until_rfc3339, SyncEntity, STATUS_POLL_INTERVAL_SECS, SYNC_AUTO_INTERVAL_SECS,
    SYNC_INTERVAL_JITTER_SECS,
};

use crate::context::SyncEngine;
use crate::cycle;

/// Replay task name for the health record stream.
pub const SYNC_TASK_HEALTH_RECORDS: &str = "sync-health-records";
/// Replay task name for the tree update stream.
pub const SYNC_TASK_TREE_UPDATES: &str = "sync-tree-updates";

/// Resolve a replay task name to its entity stream.
pub fn task_entity(tag: &str) -> Option<SyncEntity> {
    match tag {
        SYNC_TASK_HEALTH_RECORDS => Some(SyncEntity::HealthRecord),
        SYNC_TASK_TREE_UPDATES => Some(SyncEntity::TreeUpdate),
        _ => None,
    }
}

/// Named one-shot replay registrations. Registering an already registered
/// task is a no-op; a task clears once its replay pass completes.
pub struct BackgroundSyncRegistry {
    tags: Mutex<BTreeSet<String>>,
}

impl BackgroundSyncRegistry {
    pub fn new() -> Self {
        Self {
            tags: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn register(&self, tag: &str) -> Result<()> {
        if task_entity(tag).is_none() {
            return Err(Error::validation(format!(
                "Unknown background sync task '{}'",
                tag
            )));
        }
        self.tags
            .lock()
            .expect("registry lock poisoned")
            .insert(tag.to_string());
        Ok(())
    }

    pub fn registered(&self) -> Vec<String> {
        self.tags
            .lock()
            .expect("registry lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    fn clear(&self, tag: &str) {
        self.tags.lock().expect("registry lock poisoned").remove(tag);
    }
}

impl Default for BackgroundSyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Timestamp-derived jitter so multiple processes spread their cycles.
fn jitter_ms() -> u64 {
    let bound = SYNC_INTERVAL_JITTER_SECS.saturating_mul(1000);
    if bound > 0 {
        Utc::now().timestamp_millis().unsigned_abs() % bound
    } else {
        0
    }
}

/// Spawn the periodic sync loop if it is not already running.
pub(crate) async fn ensure_auto_sync_started(engine: Arc<SyncEngine>) {
    let mut guard = engine.runtime().auto_task.lock().await;
    if let Some(handle) = guard.as_ref() {
        if !handle.is_finished() {
            return;
        }
        guard.take();
    }

    let loop_engine = Arc::clone(&engine);
    let handle = tokio::spawn(async move {
        loop {
            if loop_engine.connectivity().is_online() {
                match cycle::run_sync_pass(loop_engine.as_ref(), None).await {
                    Ok(outcome) => debug!(
                        "[SyncEngine] Auto pass status={} succeeded={} failed={}",
                        outcome.status, outcome.succeeded, outcome.failed
                    ),
                    Err(err) => warn!("[SyncEngine] Auto pass failed: {}", err),
                }
            }

            let jitter = jitter_ms();
            let mut delay_ms = SYNC_AUTO_INTERVAL_SECS.saturating_mul(1000) + jitter;

            // Engine-level backoff wins over the regular cadence.
            if let Ok(engine_status) = loop_engine.store().get_engine_status() {
                if let Some(next_retry_at) = engine_status.next_retry_at.as_deref() {
                    if let Some(wait_ms) = millis_until_rfc3339(next_retry_at) {
                        delay_ms = wait_ms.saturating_add(jitter).max(1_000);
                    }
                }
            }

            // Fresh pending work shortens the wait.
            if let Ok(pending) = loop_engine.store().list_pending(None, 1) {
                if !pending.is_empty() {
                    delay_ms = delay_ms.min(2_000 + (jitter % 500));
                }
            }

            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
    });
    *guard = Some(handle);
}

/// Spawn the replay worker if it is not already running.
pub(crate) async fn ensure_replay_worker_started(engine: Arc<SyncEngine>) {
    let mut guard = engine.runtime().replay_task.lock().await;
    if let Some(handle) = guard.as_ref() {
        if !handle.is_finished() {
            return;
        }
        guard.take();
    }

    let worker_engine = Arc::clone(&engine);
    // Subscribe before spawning so a transition fired right after startup
    // is not missed.
    let mut rx = engine.connectivity().subscribe();
    let mut was_online = engine.connectivity().is_online();
    let handle = tokio::spawn(async move {
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let online = rx.borrow_and_update().is_online();
            worker_engine.observer().set_connectivity(if online {
                grovesync_core::sync::ConnectivityState::Online
            } else {
                grovesync_core::sync::ConnectivityState::Offline
            });

            let came_online = online && !was_online;
            was_online = online;
            if !came_online {
                continue;
            }

            for tag in worker_engine.registry().registered() {
                let Some(entity) = task_entity(&tag) else {
                    continue;
                };
                info!("[SyncEngine] Replaying background task '{}'", tag);
                match cycle::run_sync_pass(worker_engine.as_ref(), Some(entity)).await {
                    Ok(outcome) if outcome.status == "completed" => {
                        worker_engine.registry().clear(&tag);
                    }
                    Ok(outcome) => debug!(
                        "[SyncEngine] Replay '{}' kept registered (status={})",
                        tag, outcome.status
                    ),
                    Err(err) => warn!("[SyncEngine] Replay '{}' failed: {}", tag, err),
                }
            }
        }
    });
    *guard = Some(handle);
}

/// Spawn the status poller if it is not already running. It keeps the
/// pending count and last-sync fields of the snapshot fresh between passes.
pub(crate) async fn ensure_status_poller_started(engine: Arc<SyncEngine>) {
    let mut guard = engine.runtime().poll_task.lock().await;
    if let Some(handle) = guard.as_ref() {
        if !handle.is_finished() {
            return;
        }
        guard.take();
    }

    let poll_engine = Arc::clone(&engine);
    let handle = tokio::spawn(async move {
        loop {
            cycle::refresh_observer(poll_engine.as_ref());
            tokio::time::sleep(std::time::Duration::from_secs(STATUS_POLL_INTERVAL_SECS)).await;
        }
    });
    *guard = Some(handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_task_names_resolve_to_entities() {
        assert_eq!(
            task_entity(SYNC_TASK_HEALTH_RECORDS),
            Some(SyncEntity::HealthRecord)
        );
        assert_eq!(
            task_entity(SYNC_TASK_TREE_UPDATES),
            Some(SyncEntity::TreeUpdate)
        );
        assert_eq!(task_entity("sync-fruit-counts"), None);
    }

    #[test]
    fn registry_rejects_unknown_tags_and_deduplicates() {
        let registry = BackgroundSyncRegistry::new();
        registry.register(SYNC_TASK_HEALTH_RECORDS).unwrap();
        registry.register(SYNC_TASK_HEALTH_RECORDS).unwrap();
        assert_eq!(registry.registered(), vec![SYNC_TASK_HEALTH_RECORDS]);

        assert!(registry.register("sync-fruit-counts").is_err());
    }
}

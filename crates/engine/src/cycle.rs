//! Sync pass engine: drain the pending queue against the remote store.

use chrono::Utc;
use log::{debug, warn};

use grovesync_core::errors::Result;
use grovesync_core::sync::{
    backoff_seconds, SyncEntity, SyncPassOutcome, SyncRecord, SyncRetryClass, SyncSubmission,
    MAX_SYNC_ATTEMPTS, SYNC_BATCH_LIMIT,
};

use crate::context::SyncEngine;

/// Delay before retrying after an auth failure; long enough for a token
/// refresh to land.
const REAUTH_RETRY_SECS: i64 = 30;

/// Counts accumulated while draining one pass.
#[derive(Default)]
struct PassProgress {
    succeeded: usize,
    failed: usize,
    dead_lettered: usize,
    max_retry_count: i32,
}

/// Runs one sync pass over the pending queue, optionally scoped to a single
/// entity stream.
///
/// Only one pass runs at a time; a caller arriving while another pass holds
/// the cycle lock gets a "busy" outcome instead of queueing up. An offline
/// pass is skipped without touching the checkpoint. Otherwise the pass
/// drains pending records oldest first, isolating per-record failures, and
/// always stamps the checkpoint when it completes.
pub(crate) async fn run_sync_pass(
    engine: &SyncEngine,
    scope: Option<SyncEntity>,
) -> Result<SyncPassOutcome> {
    let Ok(_cycle_guard) = engine.runtime().cycle_mutex.try_lock() else {
        debug!("[SyncEngine] Pass already in flight; skipping");
        return Ok(SyncPassOutcome::skipped("busy"));
    };

    if !engine.connectivity().is_online() {
        debug!("[SyncEngine] Offline; pass skipped");
        return Ok(SyncPassOutcome::skipped("offline"));
    }

    let started_at = std::time::Instant::now();
    let pending = engine.store().list_pending(scope, SYNC_BATCH_LIMIT)?;
    if pending.is_empty() {
        // Nothing due. Stamp the checkpoint without flickering the
        // syncing flag.
        engine
            .store()
            .mark_cycle_outcome(
                "completed".to_string(),
                started_at.elapsed().as_millis() as i64,
                None,
            )
            .await?;
        refresh_observer(engine);
        return Ok(SyncPassOutcome::skipped("completed"));
    }

    engine.observer().set_syncing(true);
    let drained = drain_pending(engine, pending).await;
    engine.observer().set_syncing(false);

    let progress = match drained {
        Ok(progress) => progress,
        Err(err) => {
            engine.store().mark_engine_error(err.to_string()).await?;
            let retry_at = (Utc::now() + chrono::Duration::seconds(backoff_seconds(0))).to_rfc3339();
            engine
                .store()
                .mark_cycle_outcome(
                    "error".to_string(),
                    started_at.elapsed().as_millis() as i64,
                    Some(retry_at),
                )
                .await?;
            refresh_observer(engine);
            return Err(err);
        }
    };

    let status = if progress.failed == 0 {
        engine.store().mark_pass_clean().await?;
        "completed"
    } else {
        engine
            .store()
            .mark_engine_error(format!("{} record(s) failed to sync", progress.failed))
            .await?;
        "partial"
    };

    let next_retry_at = if progress.failed > 0 {
        let backoff = backoff_seconds(progress.max_retry_count);
        Some((Utc::now() + chrono::Duration::seconds(backoff)).to_rfc3339())
    } else {
        None
    };

    engine
        .store()
        .mark_cycle_outcome(
            status.to_string(),
            started_at.elapsed().as_millis() as i64,
            next_retry_at,
        )
        .await?;
    refresh_observer(engine);

    debug!(
        "[SyncEngine] Pass complete status={} succeeded={} failed={} dead={}",
        status, progress.succeeded, progress.failed, progress.dead_lettered
    );

    Ok(SyncPassOutcome {
        status: status.to_string(),
        succeeded: progress.succeeded,
        failed: progress.failed,
        dead_lettered: progress.dead_lettered,
    })
}

/// Submit due pending records oldest first. One record failing never stops
/// the rest of the pass.
async fn drain_pending(engine: &SyncEngine, pending: Vec<SyncRecord>) -> Result<PassProgress> {
    let mut progress = PassProgress::default();

    for record in pending {
        let submission = SyncSubmission::from(&record);
        match engine.remote().submit(&submission).await {
            Ok(()) => {
                engine
                    .store()
                    .mark_synced(record.entity, record.record_id, record.revision_id)
                    .await?;
                progress.succeeded += 1;
            }
            Err(err) => {
                progress.failed += 1;
                progress.max_retry_count = progress.max_retry_count.max(record.retry_count);
                let retry_class = err.retry_class();
                let err_str = err.to_string();
                warn!(
                    "[SyncEngine] Submit failed for {} {}: {} ({})",
                    record.entity.name(),
                    record.record_id,
                    err_str,
                    retry_class.code()
                );

                let attempts_exhausted = record.retry_count + 1 >= MAX_SYNC_ATTEMPTS;
                if retry_class == SyncRetryClass::Permanent || attempts_exhausted {
                    engine
                        .store()
                        .mark_dead(
                            record.entity,
                            record.record_id,
                            record.revision_id,
                            Some(err_str),
                            Some(retry_class.code().to_string()),
                        )
                        .await?;
                    progress.dead_lettered += 1;
                    continue;
                }

                let backoff = match retry_class {
                    SyncRetryClass::ReauthRequired => REAUTH_RETRY_SECS,
                    _ => backoff_seconds(record.retry_count),
                };
                engine
                    .store()
                    .schedule_retry(
                        record.entity,
                        record.record_id,
                        backoff,
                        Some(err_str),
                        Some(retry_class.code().to_string()),
                    )
                    .await?;
            }
        }
    }

    Ok(progress)
}

/// Push the store-derived fields of the status snapshot.
pub(crate) fn refresh_observer(engine: &SyncEngine) {
    if let Ok(count) = engine.store().pending_count() {
        engine.observer().set_pending_count(count);
    }
    if let Ok(engine_status) = engine.store().get_engine_status() {
        engine.observer().set_last_sync(engine_status.last_sync_at);
    }
}

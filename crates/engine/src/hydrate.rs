//! Network-first reads with local fallback.

use log::{debug, warn};

use grovesync_core::errors::Result;
use grovesync_core::sync::{SyncEntity, SyncRecord};

use crate::context::SyncEngine;

/// Fetch the latest remote collection for one entity stream, merge it into
/// the local store, and return the local view.
///
/// Any fetch failure (offline included) degrades to the local copy; the
/// caller cannot tell a fresh read from a fallback except through logs.
/// Tombstones awaiting sync are filtered out of the returned list.
pub async fn hydrate(engine: &SyncEngine, entity: SyncEntity) -> Result<Vec<SyncRecord>> {
    if engine.connectivity().is_online() {
        match engine.remote().fetch_all(entity).await {
            Ok(remote_records) => {
                let mut applied = 0usize;
                for remote in remote_records {
                    if engine.store().apply_remote_record(entity, remote).await? {
                        applied += 1;
                    }
                }
                debug!(
                    "[SyncEngine] Hydrated {} ({} record(s) applied)",
                    entity.name(),
                    applied
                );
            }
            Err(err) => {
                warn!(
                    "[SyncEngine] Hydrate fetch failed for {}; serving local copy: {}",
                    entity.name(),
                    err
                );
            }
        }
    } else {
        debug!(
            "[SyncEngine] Offline; serving local copy of {}",
            entity.name()
        );
    }

    let records = engine.store().get_all(entity)?;
    Ok(records.into_iter().filter(|r| !r.is_tombstone()).collect())
}

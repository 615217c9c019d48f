//! Repository for the local record store and engine checkpoint state.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use grovesync_core::errors::{Error, Result};
use grovesync_core::sync::{
    merge_payload, new_revision_id, should_apply_lww, RemoteRecord, SyncEngineStatus, SyncEntity,
    SyncOperation, SyncRecord, SyncRecordStatus,
};

use crate::db::{get_connection, write_actor::WriteHandle, DbPool};
use crate::errors::StorageError;
use crate::schema::{sync_engine_state, sync_records};

use super::model::{SyncEngineStateDB, SyncRecordDB};

fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

fn to_record(row: SyncRecordDB) -> Result<SyncRecord> {
    Ok(SyncRecord {
        entity: enum_from_db(&row.entity)?,
        record_id: row.record_id,
        payload: serde_json::from_str(&row.payload)?,
        op: enum_from_db(&row.op)?,
        pending_sync: row.pending_sync != 0,
        status: enum_from_db(&row.status)?,
        revision_id: row.revision_id,
        retry_count: row.retry_count,
        next_retry_at: row.next_retry_at,
        last_error: row.last_error,
        last_error_code: row.last_error_code,
        last_synced_at: row.last_synced_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn find_row(
    conn: &mut SqliteConnection,
    entity_db: &str,
    record_id_value: &str,
) -> Result<Option<SyncRecordDB>> {
    let row = sync_records::table
        .find((entity_db, record_id_value))
        .first::<SyncRecordDB>(conn)
        .optional()
        .map_err(StorageError::from)?;
    Ok(row)
}

/// Local persistence store for syncable records, plus the engine checkpoint
/// row. All mutations funnel through the writer actor; reads use the pool.
pub struct RecordStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl RecordStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Insert a new record, marked pending. Fails on a duplicate id.
    pub async fn save(
        &self,
        entity: SyncEntity,
        record_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<String> {
        let entity_db = enum_to_db(&entity)?;
        let record_id_value = record_id.into();
        let revision = new_revision_id();
        let revision_out = revision.clone();

        self.writer
            .exec(move |conn| {
                if find_row(conn, &entity_db, &record_id_value)?.is_some() {
                    return Err(Error::already_exists(format!(
                        "{} '{}' already exists locally",
                        entity_db, record_id_value
                    )));
                }

                let now = Utc::now().to_rfc3339();
                let row = SyncRecordDB {
                    entity: entity_db,
                    record_id: record_id_value,
                    payload: serde_json::to_string(&payload)?,
                    op: enum_to_db(&SyncOperation::Create)?,
                    pending_sync: 1,
                    status: enum_to_db(&SyncRecordStatus::Pending)?,
                    revision_id: revision,
                    retry_count: 0,
                    next_retry_at: None,
                    last_error: None,
                    last_error_code: None,
                    last_synced_at: None,
                    created_at: now.clone(),
                    updated_at: now,
                };

                diesel::insert_into(sync_records::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;

        Ok(revision_out)
    }

    /// Merge a partial payload into an existing record and re-mark it
    /// pending. An update always requires re-sync, so the retry budget and
    /// schedule reset with the fresh content.
    pub async fn update(
        &self,
        entity: SyncEntity,
        record_id: impl Into<String>,
        partial: serde_json::Value,
    ) -> Result<String> {
        let entity_db = enum_to_db(&entity)?;
        let record_id_value = record_id.into();
        let revision = new_revision_id();
        let revision_out = revision.clone();

        self.writer
            .exec(move |conn| {
                let row = find_row(conn, &entity_db, &record_id_value)?.ok_or_else(|| {
                    Error::not_found(format!("{} '{}'", entity_db, record_id_value))
                })?;
                if row.op == enum_to_db(&SyncOperation::Delete)? {
                    return Err(Error::not_found(format!(
                        "{} '{}' is deleted",
                        entity_db, record_id_value
                    )));
                }

                let existing: serde_json::Value = serde_json::from_str(&row.payload)?;
                let merged = merge_payload(&existing, &partial);

                // A never-synced insert stays a create; the remote store has
                // not seen the record yet.
                let op = if row.last_synced_at.is_none()
                    && row.op == enum_to_db(&SyncOperation::Create)?
                {
                    SyncOperation::Create
                } else {
                    SyncOperation::Update
                };

                diesel::update(sync_records::table.find((&row.entity, &row.record_id)))
                    .set((
                        sync_records::payload.eq(serde_json::to_string(&merged)?),
                        sync_records::op.eq(enum_to_db(&op)?),
                        sync_records::pending_sync.eq(1),
                        sync_records::status.eq(enum_to_db(&SyncRecordStatus::Pending)?),
                        sync_records::revision_id.eq(revision),
                        sync_records::retry_count.eq(0),
                        sync_records::next_retry_at.eq::<Option<String>>(None),
                        sync_records::last_error.eq::<Option<String>>(None),
                        sync_records::last_error_code.eq::<Option<String>>(None),
                        sync_records::updated_at.eq(Utc::now().to_rfc3339()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;

        Ok(revision_out)
    }

    /// Delete a record. A record the remote store has acknowledged becomes a
    /// pending remote-delete (tombstone) so the deletion propagates; a
    /// never-synced record is removed outright.
    pub async fn delete(&self, entity: SyncEntity, record_id: impl Into<String>) -> Result<()> {
        let entity_db = enum_to_db(&entity)?;
        let record_id_value = record_id.into();

        self.writer
            .exec(move |conn| {
                let row = find_row(conn, &entity_db, &record_id_value)?.ok_or_else(|| {
                    Error::not_found(format!("{} '{}'", entity_db, record_id_value))
                })?;

                if row.last_synced_at.is_none() {
                    diesel::delete(sync_records::table.find((&row.entity, &row.record_id)))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                    return Ok(());
                }

                diesel::update(sync_records::table.find((&row.entity, &row.record_id)))
                    .set((
                        sync_records::op.eq(enum_to_db(&SyncOperation::Delete)?),
                        sync_records::payload.eq("{}"),
                        sync_records::pending_sync.eq(1),
                        sync_records::status.eq(enum_to_db(&SyncRecordStatus::Pending)?),
                        sync_records::revision_id.eq(new_revision_id()),
                        sync_records::retry_count.eq(0),
                        sync_records::next_retry_at.eq::<Option<String>>(None),
                        sync_records::last_error.eq::<Option<String>>(None),
                        sync_records::last_error_code.eq::<Option<String>>(None),
                        sync_records::updated_at.eq(Utc::now().to_rfc3339()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    pub fn get(&self, entity: SyncEntity, record_id: &str) -> Result<Option<SyncRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let entity_db = enum_to_db(&entity)?;
        let row = find_row(&mut conn, &entity_db, record_id)?;
        row.map(to_record).transpose()
    }

    /// All records of one entity stream (tombstones included), creation order.
    pub fn get_all(&self, entity: SyncEntity) -> Result<Vec<SyncRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_records::table
            .filter(sync_records::entity.eq(enum_to_db(&entity)?))
            .order(sync_records::created_at.asc())
            .load::<SyncRecordDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_record).collect()
    }

    /// Exact count of records awaiting sync across all entity streams.
    pub fn pending_count(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let count = sync_records::table
            .filter(sync_records::status.eq(enum_to_db(&SyncRecordStatus::Pending)?))
            .filter(sync_records::pending_sync.eq(1))
            .count()
            .get_result::<i64>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(count)
    }

    /// Pending records due for submission, oldest first. Records waiting on
    /// a scheduled retry are excluded until their `next_retry_at` passes.
    pub fn list_pending(
        &self,
        scope: Option<SyncEntity>,
        limit_value: i64,
    ) -> Result<Vec<SyncRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();

        let mut query = sync_records::table
            .filter(
                sync_records::status
                    .eq(enum_to_db(&SyncRecordStatus::Pending)?)
                    .and(sync_records::pending_sync.eq(1)),
            )
            .filter(
                sync_records::next_retry_at
                    .is_null()
                    .or(sync_records::next_retry_at.le(now)),
            )
            .into_boxed();
        if let Some(entity) = scope {
            query = query.filter(sync_records::entity.eq(enum_to_db(&entity)?));
        }

        let rows = query
            .order(sync_records::created_at.asc())
            .limit(limit_value)
            .load::<SyncRecordDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_record).collect()
    }

    /// Record a remote acknowledgement for one submitted revision: clear the
    /// pending flag, or purge the row entirely when the acknowledged
    /// operation was a tombstone.
    ///
    /// The acknowledgement only lands if the row still carries the submitted
    /// revision. A local edit during the in-flight submission swaps in a new
    /// revision id, and the stale acknowledgement must not un-queue it.
    pub async fn mark_synced(
        &self,
        entity: SyncEntity,
        record_id: impl Into<String>,
        revision_id: impl Into<String>,
    ) -> Result<()> {
        let entity_db = enum_to_db(&entity)?;
        let record_id_value = record_id.into();
        let revision_value = revision_id.into();

        self.writer
            .exec(move |conn| {
                let row = find_row(conn, &entity_db, &record_id_value)?.ok_or_else(|| {
                    Error::not_found(format!("{} '{}'", entity_db, record_id_value))
                })?;
                if row.revision_id != revision_value {
                    return Ok(());
                }

                if row.op == enum_to_db(&SyncOperation::Delete)? {
                    diesel::delete(sync_records::table.find((&row.entity, &row.record_id)))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                    return Ok(());
                }

                diesel::update(sync_records::table.find((&row.entity, &row.record_id)))
                    .set((
                        sync_records::pending_sync.eq(0),
                        sync_records::status.eq(enum_to_db(&SyncRecordStatus::Synced)?),
                        sync_records::retry_count.eq(0),
                        sync_records::next_retry_at.eq::<Option<String>>(None),
                        sync_records::last_error.eq::<Option<String>>(None),
                        sync_records::last_error_code.eq::<Option<String>>(None),
                        sync_records::last_synced_at.eq(Some(Utc::now().to_rfc3339())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Defer a failed record: bump the attempt count and schedule the next
    /// try. The record stays pending.
    pub async fn schedule_retry(
        &self,
        entity: SyncEntity,
        record_id: impl Into<String>,
        backoff_seconds: i64,
        last_error: Option<String>,
        last_error_code: Option<String>,
    ) -> Result<()> {
        let entity_db = enum_to_db(&entity)?;
        let record_id_value = record_id.into();

        self.writer
            .exec(move |conn| {
                let retry_at = (Utc::now() + Duration::seconds(backoff_seconds)).to_rfc3339();
                let updated = diesel::update(
                    sync_records::table.find((&entity_db, &record_id_value)),
                )
                .set((
                    sync_records::retry_count.eq(sync_records::retry_count + 1),
                    sync_records::next_retry_at.eq(Some(retry_at)),
                    sync_records::status.eq(enum_to_db(&SyncRecordStatus::Pending)?),
                    sync_records::last_error.eq(last_error),
                    sync_records::last_error_code.eq(last_error_code),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                if updated == 0 {
                    return Err(Error::not_found(format!(
                        "{} '{}'",
                        entity_db, record_id_value
                    )));
                }
                Ok(())
            })
            .await
    }

    /// Move a record to the dead-letter state. It leaves the pending queue
    /// but is never silently dropped; operators list and requeue dead letters.
    ///
    /// Guarded by the same revision check as [`mark_synced`]: a record edited
    /// while its old revision was in flight stays queued with a fresh budget.
    ///
    /// [`mark_synced`]: RecordStore::mark_synced
    pub async fn mark_dead(
        &self,
        entity: SyncEntity,
        record_id: impl Into<String>,
        revision_id: impl Into<String>,
        last_error: Option<String>,
        last_error_code: Option<String>,
    ) -> Result<()> {
        let entity_db = enum_to_db(&entity)?;
        let record_id_value = record_id.into();
        let revision_value = revision_id.into();

        self.writer
            .exec(move |conn| {
                let row = find_row(conn, &entity_db, &record_id_value)?.ok_or_else(|| {
                    Error::not_found(format!("{} '{}'", entity_db, record_id_value))
                })?;
                if row.revision_id != revision_value {
                    return Ok(());
                }

                diesel::update(sync_records::table.find((&row.entity, &row.record_id)))
                    .set((
                        sync_records::pending_sync.eq(0),
                        sync_records::status.eq(enum_to_db(&SyncRecordStatus::Dead)?),
                        sync_records::next_retry_at.eq::<Option<String>>(None),
                        sync_records::last_error.eq(last_error),
                        sync_records::last_error_code.eq(last_error_code),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    pub fn list_dead_letters(&self) -> Result<Vec<SyncRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_records::table
            .filter(sync_records::status.eq(enum_to_db(&SyncRecordStatus::Dead)?))
            .order(sync_records::created_at.asc())
            .load::<SyncRecordDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_record).collect()
    }

    /// Put a dead letter back in the queue with a fresh attempt budget.
    pub async fn requeue_dead_letter(
        &self,
        entity: SyncEntity,
        record_id: impl Into<String>,
    ) -> Result<()> {
        let entity_db = enum_to_db(&entity)?;
        let record_id_value = record_id.into();

        self.writer
            .exec(move |conn| {
                let updated = diesel::update(
                    sync_records::table.find((&entity_db, &record_id_value)),
                )
                .set((
                    sync_records::pending_sync.eq(1),
                    sync_records::status.eq(enum_to_db(&SyncRecordStatus::Pending)?),
                    sync_records::retry_count.eq(0),
                    sync_records::next_retry_at.eq::<Option<String>>(None),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                if updated == 0 {
                    return Err(Error::not_found(format!(
                        "{} '{}'",
                        entity_db, record_id_value
                    )));
                }
                Ok(())
            })
            .await
    }

    /// Idempotent last-write-wins merge of a remotely fetched record.
    ///
    /// A locally pending row always wins — its state has not been pushed yet.
    /// Otherwise the newer client timestamp wins, revision id breaking ties.
    /// Re-applying the same remote record is a no-op. Returns whether the
    /// local row changed.
    pub async fn apply_remote_record(
        &self,
        entity: SyncEntity,
        remote: RemoteRecord,
    ) -> Result<bool> {
        let entity_db = enum_to_db(&entity)?;

        self.writer
            .exec(move |conn| {
                let local = find_row(conn, &entity_db, &remote.record_id)?;

                let Some(local) = local else {
                    let now = Utc::now().to_rfc3339();
                    let row = SyncRecordDB {
                        entity: entity_db,
                        record_id: remote.record_id,
                        payload: serde_json::to_string(&remote.payload)?,
                        op: enum_to_db(&SyncOperation::Create)?,
                        pending_sync: 0,
                        status: enum_to_db(&SyncRecordStatus::Synced)?,
                        revision_id: remote.revision_id,
                        retry_count: 0,
                        next_retry_at: None,
                        last_error: None,
                        last_error_code: None,
                        last_synced_at: Some(now.clone()),
                        created_at: remote.client_timestamp.clone(),
                        updated_at: remote.client_timestamp,
                    };
                    diesel::insert_into(sync_records::table)
                        .values(&row)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                    return Ok(true);
                };

                if local.pending_sync != 0 {
                    return Ok(false);
                }
                if !should_apply_lww(
                    &local.updated_at,
                    &local.revision_id,
                    &remote.client_timestamp,
                    &remote.revision_id,
                ) {
                    return Ok(false);
                }

                diesel::update(sync_records::table.find((&local.entity, &local.record_id)))
                    .set((
                        sync_records::payload.eq(serde_json::to_string(&remote.payload)?),
                        sync_records::revision_id.eq(remote.revision_id),
                        sync_records::updated_at.eq(remote.client_timestamp),
                        sync_records::status.eq(enum_to_db(&SyncRecordStatus::Synced)?),
                        sync_records::last_synced_at.eq(Some(Utc::now().to_rfc3339())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(true)
            })
            .await
    }

    // ── Engine checkpoint state ──────────────────────────────────────────

    pub fn get_engine_status(&self) -> Result<SyncEngineStatus> {
        let mut conn = get_connection(&self.pool)?;
        let state = sync_engine_state::table
            .find(1)
            .first::<SyncEngineStateDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        Ok(SyncEngineStatus {
            last_sync_at: state.as_ref().and_then(|s| s.last_sync_at.clone()),
            last_error: state.as_ref().and_then(|s| s.last_error.clone()),
            consecutive_failures: state.as_ref().map(|s| s.consecutive_failures).unwrap_or(0),
            next_retry_at: state.as_ref().and_then(|s| s.next_retry_at.clone()),
            last_cycle_status: state.as_ref().and_then(|s| s.last_cycle_status.clone()),
            last_cycle_duration_ms: state.and_then(|s| s.last_cycle_duration_ms),
        })
    }

    /// Stamp the checkpoint for a completed pass. `last_sync_at` advances on
    /// every completed pass, whatever the per-record outcomes were.
    pub async fn mark_cycle_outcome(
        &self,
        status_value: String,
        duration_ms_value: i64,
        next_retry_at_value: Option<String>,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                diesel::insert_into(sync_engine_state::table)
                    .values(SyncEngineStateDB {
                        id: 1,
                        last_sync_at: Some(now.clone()),
                        last_error: None,
                        consecutive_failures: 0,
                        next_retry_at: next_retry_at_value.clone(),
                        last_cycle_status: Some(status_value.clone()),
                        last_cycle_duration_ms: Some(duration_ms_value),
                    })
                    .on_conflict(sync_engine_state::id)
                    .do_update()
                    .set((
                        sync_engine_state::last_sync_at.eq(Some(now)),
                        sync_engine_state::last_cycle_status.eq(Some(status_value)),
                        sync_engine_state::last_cycle_duration_ms.eq(Some(duration_ms_value)),
                        sync_engine_state::next_retry_at.eq(next_retry_at_value),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Reset the failure streak after a pass with no failed submissions.
    pub async fn mark_pass_clean(&self) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::insert_into(sync_engine_state::table)
                    .values(SyncEngineStateDB {
                        id: 1,
                        last_sync_at: None,
                        last_error: None,
                        consecutive_failures: 0,
                        next_retry_at: None,
                        last_cycle_status: None,
                        last_cycle_duration_ms: None,
                    })
                    .on_conflict(sync_engine_state::id)
                    .do_update()
                    .set((
                        sync_engine_state::last_error.eq::<Option<String>>(None),
                        sync_engine_state::consecutive_failures.eq(0),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn mark_engine_error(&self, error_message: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::insert_into(sync_engine_state::table)
                    .values(SyncEngineStateDB {
                        id: 1,
                        last_sync_at: None,
                        last_error: Some(error_message.clone()),
                        consecutive_failures: 1,
                        next_retry_at: None,
                        last_cycle_status: Some("error".to_string()),
                        last_cycle_duration_ms: None,
                    })
                    .on_conflict(sync_engine_state::id)
                    .do_update()
                    .set((
                        sync_engine_state::last_error.eq(Some(error_message)),
                        sync_engine_state::consecutive_failures
                            .eq(sync_engine_state::consecutive_failures + 1),
                        sync_engine_state::last_cycle_status.eq(Some("error".to_string())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, write_actor::spawn_writer};
    use serde_json::json;

    fn setup_store() -> (RecordStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let db_path = init(tmp.path().to_str().unwrap()).expect("init db path");
        run_migrations(&db_path).expect("migrations");
        let pool = create_pool(&db_path).expect("pool");
        let writer = spawn_writer(pool.as_ref().clone());
        (RecordStore::new(pool, writer), tmp)
    }

    #[tokio::test]
    async fn save_marks_record_pending() {
        let (store, _tmp) = setup_store();

        let revision = store
            .save(SyncEntity::HealthRecord, "hr-1", json!({"tree_id": "t-9"}))
            .await
            .unwrap();
        assert!(!revision.is_empty());

        let record = store
            .get(SyncEntity::HealthRecord, "hr-1")
            .unwrap()
            .expect("record saved");
        assert!(record.pending_sync);
        assert_eq!(record.status, SyncRecordStatus::Pending);
        assert_eq!(record.op, SyncOperation::Create);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn save_rejects_duplicate_id() {
        let (store, _tmp) = setup_store();

        store
            .save(SyncEntity::HealthRecord, "hr-1", json!({"a": 1}))
            .await
            .unwrap();
        let err = store
            .save(SyncEntity::HealthRecord, "hr-1", json!({"a": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn writer_rolls_back_failed_job() {
        let (store, _tmp) = setup_store();
        let entity_db = enum_to_db(&SyncEntity::TreeUpdate).unwrap();

        let result: Result<()> = store
            .writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                let row = SyncRecordDB {
                    entity: entity_db,
                    record_id: "tu-rollback".to_string(),
                    payload: "{}".to_string(),
                    op: "create".to_string(),
                    pending_sync: 1,
                    status: "pending".to_string(),
                    revision_id: new_revision_id(),
                    retry_count: 0,
                    next_retry_at: None,
                    last_error: None,
                    last_error_code: None,
                    last_synced_at: None,
                    created_at: now.clone(),
                    updated_at: now,
                };
                diesel::insert_into(sync_records::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Err(Error::validation("forced failure after insert"))
            })
            .await;

        assert!(result.is_err());
        assert!(store
            .get(SyncEntity::TreeUpdate, "tu-rollback")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_merges_partial_payload() {
        let (store, _tmp) = setup_store();

        store
            .save(
                SyncEntity::TreeUpdate,
                "tu-1",
                json!({"height_cm": 120, "notes": "healthy"}),
            )
            .await
            .unwrap();
        store
            .update(SyncEntity::TreeUpdate, "tu-1", json!({"height_cm": 130}))
            .await
            .unwrap();
        // Applying the same partial again changes nothing but the revision.
        store
            .update(SyncEntity::TreeUpdate, "tu-1", json!({"height_cm": 130}))
            .await
            .unwrap();

        let record = store.get(SyncEntity::TreeUpdate, "tu-1").unwrap().unwrap();
        assert_eq!(record.payload, json!({"height_cm": 130, "notes": "healthy"}));
        // Never synced, so the pending write is still a remote create.
        assert_eq!(record.op, SyncOperation::Create);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn update_after_sync_becomes_remote_update() {
        let (store, _tmp) = setup_store();

        let revision = store
            .save(SyncEntity::HealthRecord, "hr-1", json!({"v": 1}))
            .await
            .unwrap();
        store
            .mark_synced(SyncEntity::HealthRecord, "hr-1", revision)
            .await
            .unwrap();
        assert_eq!(store.pending_count().unwrap(), 0);

        store
            .update(SyncEntity::HealthRecord, "hr-1", json!({"v": 2}))
            .await
            .unwrap();
        let record = store.get(SyncEntity::HealthRecord, "hr-1").unwrap().unwrap();
        assert_eq!(record.op, SyncOperation::Update);
        assert!(record.pending_sync);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_acknowledgement_leaves_edited_record_pending() {
        let (store, _tmp) = setup_store();

        let submitted = store
            .save(SyncEntity::HealthRecord, "hr-1", json!({"severity": "low"}))
            .await
            .unwrap();
        // An edit lands while the first revision is still in flight.
        let edited = store
            .update(SyncEntity::HealthRecord, "hr-1", json!({"severity": "high"}))
            .await
            .unwrap();

        // The acknowledgement for the superseded revision must not un-queue
        // the edit.
        store
            .mark_synced(SyncEntity::HealthRecord, "hr-1", submitted)
            .await
            .unwrap();
        let record = store.get(SyncEntity::HealthRecord, "hr-1").unwrap().unwrap();
        assert!(record.pending_sync);
        assert_eq!(record.status, SyncRecordStatus::Pending);
        assert_eq!(record.payload, json!({"severity": "high"}));
        assert_eq!(store.pending_count().unwrap(), 1);

        // Acknowledging the current revision clears the queue as usual.
        store
            .mark_synced(SyncEntity::HealthRecord, "hr-1", edited)
            .await
            .unwrap();
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_acknowledgement_never_purges_replaced_tombstone() {
        let (store, _tmp) = setup_store();

        let revision = store
            .save(SyncEntity::TreeUpdate, "tu-1", json!({"a": 1}))
            .await
            .unwrap();
        store
            .mark_synced(SyncEntity::TreeUpdate, "tu-1", revision.clone())
            .await
            .unwrap();
        store.delete(SyncEntity::TreeUpdate, "tu-1").await.unwrap();

        // The tombstone carries its own revision; an acknowledgement for the
        // old create must leave it queued for the remote delete.
        store
            .mark_synced(SyncEntity::TreeUpdate, "tu-1", revision)
            .await
            .unwrap();
        let record = store.get(SyncEntity::TreeUpdate, "tu-1").unwrap().unwrap();
        assert!(record.is_tombstone());
        assert!(record.pending_sync);
    }

    #[tokio::test]
    async fn stale_dead_letter_leaves_edited_record_pending() {
        let (store, _tmp) = setup_store();

        let submitted = store
            .save(SyncEntity::HealthRecord, "hr-1", json!({"v": 1}))
            .await
            .unwrap();
        store
            .update(SyncEntity::HealthRecord, "hr-1", json!({"v": 2}))
            .await
            .unwrap();

        store
            .mark_dead(
                SyncEntity::HealthRecord,
                "hr-1",
                submitted,
                Some("remote 400".to_string()),
                Some("permanent".to_string()),
            )
            .await
            .unwrap();

        assert!(store.list_dead_letters().unwrap().is_empty());
        let record = store.get(SyncEntity::HealthRecord, "hr-1").unwrap().unwrap();
        assert!(record.pending_sync);
        assert_eq!(record.status, SyncRecordStatus::Pending);
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let (store, _tmp) = setup_store();
        let err = store
            .update(SyncEntity::HealthRecord, "absent", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_unsynced_record_removes_row() {
        let (store, _tmp) = setup_store();

        store
            .save(SyncEntity::TreeUpdate, "tu-1", json!({"a": 1}))
            .await
            .unwrap();
        store.delete(SyncEntity::TreeUpdate, "tu-1").await.unwrap();

        assert!(store.get(SyncEntity::TreeUpdate, "tu-1").unwrap().is_none());
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_synced_record_leaves_tombstone_then_purges() {
        let (store, _tmp) = setup_store();

        let revision = store
            .save(SyncEntity::TreeUpdate, "tu-1", json!({"a": 1}))
            .await
            .unwrap();
        store
            .mark_synced(SyncEntity::TreeUpdate, "tu-1", revision)
            .await
            .unwrap();
        store.delete(SyncEntity::TreeUpdate, "tu-1").await.unwrap();

        let record = store.get(SyncEntity::TreeUpdate, "tu-1").unwrap().unwrap();
        assert!(record.is_tombstone());
        assert!(record.pending_sync);
        assert_eq!(store.pending_count().unwrap(), 1);

        // Acknowledging the tombstone removes the row for good.
        store
            .mark_synced(SyncEntity::TreeUpdate, "tu-1", record.revision_id)
            .await
            .unwrap();
        assert!(store.get(SyncEntity::TreeUpdate, "tu-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn list_pending_is_fifo_and_scoped() {
        let (store, _tmp) = setup_store();

        store
            .save(SyncEntity::HealthRecord, "hr-1", json!({}))
            .await
            .unwrap();
        store
            .save(SyncEntity::TreeUpdate, "tu-1", json!({}))
            .await
            .unwrap();
        store
            .save(SyncEntity::HealthRecord, "hr-2", json!({}))
            .await
            .unwrap();

        let all = store.list_pending(None, 500).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["hr-1", "tu-1", "hr-2"]);

        let scoped = store
            .list_pending(Some(SyncEntity::HealthRecord), 500)
            .unwrap();
        let ids: Vec<&str> = scoped.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["hr-1", "hr-2"]);
    }

    #[tokio::test]
    async fn schedule_retry_defers_until_due() {
        let (store, _tmp) = setup_store();

        store
            .save(SyncEntity::HealthRecord, "hr-1", json!({}))
            .await
            .unwrap();
        store
            .schedule_retry(
                SyncEntity::HealthRecord,
                "hr-1",
                3600,
                Some("remote 503".to_string()),
                Some("retryable".to_string()),
            )
            .await
            .unwrap();

        // Still pending, but not due for an hour.
        assert_eq!(store.pending_count().unwrap(), 1);
        assert!(store.list_pending(None, 500).unwrap().is_empty());

        let record = store.get(SyncEntity::HealthRecord, "hr-1").unwrap().unwrap();
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.last_error.as_deref(), Some("remote 503"));

        // A backoff in the past makes the record due again.
        store
            .schedule_retry(SyncEntity::HealthRecord, "hr-1", -60, None, None)
            .await
            .unwrap();
        assert_eq!(store.list_pending(None, 500).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dead_letter_and_requeue() {
        let (store, _tmp) = setup_store();

        let revision = store
            .save(SyncEntity::TreeUpdate, "tu-1", json!({}))
            .await
            .unwrap();
        store
            .mark_dead(
                SyncEntity::TreeUpdate,
                "tu-1",
                revision,
                Some("remote 400".to_string()),
                Some("permanent".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(store.pending_count().unwrap(), 0);
        assert!(store.list_pending(None, 500).unwrap().is_empty());
        let dead = store.list_dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].status, SyncRecordStatus::Dead);
        assert_eq!(dead[0].last_error_code.as_deref(), Some("permanent"));

        store
            .requeue_dead_letter(SyncEntity::TreeUpdate, "tu-1")
            .await
            .unwrap();
        let record = store.get(SyncEntity::TreeUpdate, "tu-1").unwrap().unwrap();
        assert_eq!(record.status, SyncRecordStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn apply_remote_record_inserts_and_respects_lww() {
        let (store, _tmp) = setup_store();

        let remote = RemoteRecord {
            record_id: "hr-1".to_string(),
            revision_id: new_revision_id(),
            client_timestamp: "2026-03-14T10:00:00+00:00".to_string(),
            payload: json!({"v": 1}),
        };
        assert!(store
            .apply_remote_record(SyncEntity::HealthRecord, remote.clone())
            .await
            .unwrap());

        // Re-applying the same record changes nothing.
        assert!(!store
            .apply_remote_record(SyncEntity::HealthRecord, remote)
            .await
            .unwrap());

        // A newer remote revision wins over the synced local copy.
        let newer = RemoteRecord {
            record_id: "hr-1".to_string(),
            revision_id: new_revision_id(),
            client_timestamp: "2026-03-14T11:00:00+00:00".to_string(),
            payload: json!({"v": 2}),
        };
        assert!(store
            .apply_remote_record(SyncEntity::HealthRecord, newer)
            .await
            .unwrap());
        let record = store.get(SyncEntity::HealthRecord, "hr-1").unwrap().unwrap();
        assert_eq!(record.payload, json!({"v": 2}));
        assert!(!record.pending_sync);
    }

    #[tokio::test]
    async fn apply_remote_record_never_overwrites_local_pending() {
        let (store, _tmp) = setup_store();

        store
            .save(SyncEntity::HealthRecord, "hr-1", json!({"v": "local"}))
            .await
            .unwrap();

        let remote = RemoteRecord {
            record_id: "hr-1".to_string(),
            revision_id: new_revision_id(),
            client_timestamp: "2099-01-01T00:00:00+00:00".to_string(),
            payload: json!({"v": "remote"}),
        };
        assert!(!store
            .apply_remote_record(SyncEntity::HealthRecord, remote)
            .await
            .unwrap());

        let record = store.get(SyncEntity::HealthRecord, "hr-1").unwrap().unwrap();
        assert_eq!(record.payload, json!({"v": "local"}));
        assert!(record.pending_sync);
    }

    #[tokio::test]
    async fn cycle_outcome_always_stamps_last_sync() {
        let (store, _tmp) = setup_store();
        assert!(store.get_engine_status().unwrap().last_sync_at.is_none());

        store
            .mark_cycle_outcome("completed".to_string(), 42, None)
            .await
            .unwrap();
        let status = store.get_engine_status().unwrap();
        assert!(status.last_sync_at.is_some());
        assert_eq!(status.last_cycle_status.as_deref(), Some("completed"));
        assert_eq!(status.last_cycle_duration_ms, Some(42));
    }

    #[tokio::test]
    async fn engine_error_streak_counts_and_clears() {
        let (store, _tmp) = setup_store();

        store.mark_engine_error("boom".to_string()).await.unwrap();
        store.mark_engine_error("boom again".to_string()).await.unwrap();
        let status = store.get_engine_status().unwrap();
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_error.as_deref(), Some("boom again"));

        store.mark_pass_clean().await.unwrap();
        let status = store.get_engine_status().unwrap();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
    }
}

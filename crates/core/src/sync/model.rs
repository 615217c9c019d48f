//! Sync domain models and the LWW merge rule.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::errors::Result;

/// Entity streams that participate in offline-first sync. Each stream is
/// replayed FIFO on its own; there is no ordering guarantee across streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    HealthRecord,
    TreeUpdate,
}

/// Canonical list of syncable entity streams.
pub const SYNC_ENTITIES: [SyncEntity; 2] = [SyncEntity::HealthRecord, SyncEntity::TreeUpdate];

impl SyncEntity {
    /// Stable wire/storage name, matching the serde encoding.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEntity::HealthRecord => "health_record",
            SyncEntity::TreeUpdate => "tree_update",
        }
    }
}

/// Pending operation carried by a record envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn name(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

/// Local lifecycle status of a record envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRecordStatus {
    Pending,
    Synced,
    Dead,
}

/// A locally stored record envelope. The domain payload is opaque JSON; the
/// sync layer only reads the envelope fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub entity: SyncEntity,
    pub record_id: String,
    pub payload: serde_json::Value,
    pub op: SyncOperation,
    pub pending_sync: bool,
    pub status: SyncRecordStatus,
    /// New UUIDv7 per local mutation; LWW tie-breaker.
    pub revision_id: String,
    pub retry_count: i32,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub last_error_code: Option<String>,
    pub last_synced_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SyncRecord {
    /// True once the remote store has acknowledged this record at least once.
    pub fn has_synced_remotely(&self) -> bool {
        self.last_synced_at.is_some()
    }

    /// True for a queued remote-delete (tombstone) envelope.
    pub fn is_tombstone(&self) -> bool {
        self.op == SyncOperation::Delete
    }
}

/// Typed view over a record payload. The sync layer never inspects `T`;
/// callers convert at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncableRecord<T> {
    pub record_id: String,
    pub payload: T,
}

impl<T: Serialize> SyncableRecord<T> {
    pub fn new(record_id: impl Into<String>, payload: T) -> Self {
        Self {
            record_id: record_id.into(),
            payload,
        }
    }

    /// Opaque JSON form handed to the store.
    pub fn payload_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.payload)?)
    }
}

impl<T: DeserializeOwned> SyncableRecord<T> {
    /// Decode a stored envelope back into the typed view.
    pub fn from_record(record: &SyncRecord) -> Result<Self> {
        Ok(Self {
            record_id: record.record_id.clone(),
            payload: serde_json::from_value(record.payload.clone())?,
        })
    }
}

/// One pending envelope as submitted to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSubmission {
    pub entity: SyncEntity,
    pub record_id: String,
    pub op: SyncOperation,
    pub revision_id: String,
    pub client_timestamp: String,
    pub payload: serde_json::Value,
}

impl From<&SyncRecord> for SyncSubmission {
    fn from(record: &SyncRecord) -> Self {
        Self {
            entity: record.entity,
            record_id: record.record_id.clone(),
            op: record.op,
            revision_id: record.revision_id.clone(),
            client_timestamp: record.updated_at.clone(),
            payload: record.payload.clone(),
        }
    }
}

/// A record as fetched from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub record_id: String,
    pub revision_id: String,
    pub client_timestamp: String,
    pub payload: serde_json::Value,
}

/// Connectivity as reported by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

/// Process-wide sync state snapshot, derived from the store and the engine.
/// Rebuilt on load; never persisted itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub connectivity: ConnectivityState,
    pub syncing: bool,
    pub pending_count: i64,
    pub last_sync_at: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            connectivity: ConnectivityState::Online,
            syncing: false,
            pending_count: 0,
            last_sync_at: None,
        }
    }
}

/// Persisted engine checkpoint state, reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEngineStatus {
    /// When a pass last ran to completion. Records "when we last attempted",
    /// not "when we last fully succeeded".
    pub last_sync_at: Option<String>,
    pub last_error: Option<String>,
    pub consecutive_failures: i32,
    pub next_retry_at: Option<String>,
    pub last_cycle_status: Option<String>,
    pub last_cycle_duration_ms: Option<i64>,
}

/// Result of one sync pass, for caller-visible reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPassOutcome {
    pub status: String,
    pub succeeded: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl SyncPassOutcome {
    pub fn skipped(status: &str) -> Self {
        Self {
            status: status.to_string(),
            succeeded: 0,
            failed: 0,
            dead_lettered: 0,
        }
    }
}

/// Fresh revision id for a local mutation. UUIDv7 so ids from one process
/// also sort by creation time.
pub fn new_revision_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Determines whether an incoming remote revision should overwrite local state.
///
/// Rule:
/// 1. higher client timestamp wins
/// 2. if equal, lexicographically greater revision_id wins
pub fn should_apply_lww(
    local_client_timestamp: &str,
    local_revision_id: &str,
    remote_client_timestamp: &str,
    remote_revision_id: &str,
) -> bool {
    let local_parsed = chrono::DateTime::parse_from_rfc3339(local_client_timestamp)
        .map(|dt| dt.timestamp_millis());
    let remote_parsed = chrono::DateTime::parse_from_rfc3339(remote_client_timestamp)
        .map(|dt| dt.timestamp_millis());

    if let (Ok(local_ts), Ok(remote_ts)) = (local_parsed, remote_parsed) {
        if remote_ts > local_ts {
            return true;
        }
        if remote_ts == local_ts {
            return remote_revision_id > local_revision_id;
        }
        return false;
    }

    // Fallback to lexical ordering when one/both timestamps are non-RFC3339.
    if remote_client_timestamp > local_client_timestamp {
        return true;
    }
    if remote_client_timestamp == local_client_timestamp {
        return remote_revision_id > local_revision_id;
    }
    false
}

/// Shallow JSON-object merge used by `update`: keys in `partial` overwrite
/// keys in `existing`; a non-object partial replaces the payload wholesale.
/// Applying the same partial twice yields the same result.
pub fn merge_payload(existing: &serde_json::Value, partial: &serde_json::Value) -> serde_json::Value {
    match (existing.as_object(), partial.as_object()) {
        (Some(base), Some(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => partial.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lww_newer_timestamp_wins() {
        assert!(should_apply_lww(
            "2026-01-01T00:00:00.000Z",
            "a",
            "2026-01-01T00:00:01.000Z",
            "b"
        ));
    }

    #[test]
    fn lww_revision_id_tiebreaker() {
        assert!(should_apply_lww(
            "2026-01-01T00:00:00.000Z",
            "0001",
            "2026-01-01T00:00:00.000Z",
            "0002"
        ));
        assert!(!should_apply_lww(
            "2026-01-01T00:00:00.000Z",
            "0002",
            "2026-01-01T00:00:00.000Z",
            "0001"
        ));
    }

    #[test]
    fn lww_uses_timestamp_value_not_lexical_format() {
        assert!(should_apply_lww(
            "2026-01-01T01:00:00+01:00",
            "0001",
            "2026-01-01T00:00:00Z",
            "0002"
        ));
    }

    #[test]
    fn entity_serialization_matches_backend_contract() {
        let actual = SYNC_ENTITIES
            .iter()
            .map(|entity| serde_json::to_string(entity).expect("serialize entity"))
            .collect::<Vec<_>>();
        assert_eq!(actual, vec!["\"health_record\"", "\"tree_update\""]);
    }

    #[test]
    fn merge_payload_is_shallow_and_idempotent() {
        let base = serde_json::json!({"treeId": "T-12", "severity": "low", "notes": "ok"});
        let partial = serde_json::json!({"severity": "high"});

        let once = merge_payload(&base, &partial);
        let twice = merge_payload(&once, &partial);

        assert_eq!(once["severity"], "high");
        assert_eq!(once["treeId"], "T-12");
        assert_eq!(once["notes"], "ok");
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_payload_non_object_replaces() {
        let base = serde_json::json!({"a": 1});
        let partial = serde_json::json!("tombstoned");
        assert_eq!(merge_payload(&base, &partial), partial);
    }

    #[test]
    fn typed_envelope_round_trips_through_json_value() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct HealthInspection {
            tree_id: String,
            severity: String,
        }

        let typed = SyncableRecord::new(
            "hr-1",
            HealthInspection {
                tree_id: "T-7".to_string(),
                severity: "medium".to_string(),
            },
        );
        let value = typed.payload_value().expect("to value");
        assert_eq!(value["tree_id"], "T-7");
    }
}

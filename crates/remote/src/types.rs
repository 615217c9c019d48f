//! Remote store contract and wire types.

use async_trait::async_trait;
use serde::Deserialize;

use grovesync_core::sync::{RemoteRecord, SyncEntity, SyncSubmission};

use crate::error::Result;

/// Error envelope returned by the remote API on failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
}

/// The contract the sync engine holds against the remote store.
///
/// `submit` must be idempotent per revision id: re-sending the same
/// submission after an ambiguous failure may not duplicate the record.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Push one pending record envelope.
    async fn submit(&self, submission: &SyncSubmission) -> Result<()>;

    /// Fetch the full remote collection for one entity stream.
    async fn fetch_all(&self, entity: SyncEntity) -> Result<Vec<RemoteRecord>>;
}

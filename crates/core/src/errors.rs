//! Error taxonomy shared across the grovesync crates.

use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Database-layer failure detail.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Top-level error for local sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local persistence failure (quota, corruption, schema drift).
    /// Surfaced to the caller; never retried at the storage layer.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record lookup missed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Insert collided with an existing record id
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Caller handed us something unusable
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

//! Error types for the remote store adapter.

use thiserror::Error;

use grovesync_core::sync::{classify_http_status, SyncRetryClass};

/// Result type alias for remote store operations.
pub type Result<T> = std::result::Result<T, RemoteStoreError>;

/// Errors that can occur while talking to the remote store.
#[derive(Debug, Error)]
pub enum RemoteStoreError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the remote service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or invalid token)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The host reported no connectivity before a request was attempted
    #[error("Offline: {0}")]
    Offline(String),
}

impl RemoteStoreError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify this failure for the sync retry policy.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(_) => SyncRetryClass::Retryable,
            Self::Offline(_) => SyncRetryClass::Retryable,
            Self::Json(_) => SyncRetryClass::Permanent,
            Self::InvalidRequest(_) => SyncRetryClass::Permanent,
            Self::Auth(_) => SyncRetryClass::ReauthRequired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_auth_status_is_reauth() {
        let err = RemoteStoreError::api(401, "unauthorized");
        assert_eq!(err.retry_class(), SyncRetryClass::ReauthRequired);
    }

    #[test]
    fn retry_class_for_server_error_is_retryable() {
        let err = RemoteStoreError::api(503, "maintenance");
        assert_eq!(err.retry_class(), SyncRetryClass::Retryable);
    }

    #[test]
    fn retry_class_for_validation_failure_is_permanent() {
        let err = RemoteStoreError::api(422, "bad payload");
        assert_eq!(err.retry_class(), SyncRetryClass::Permanent);
    }

    #[test]
    fn offline_is_retryable() {
        let err = RemoteStoreError::Offline("no link".to_string());
        assert_eq!(err.retry_class(), SyncRetryClass::Retryable);
    }
}

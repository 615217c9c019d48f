//! Remote store configuration.

use crate::error::{RemoteStoreError, Result};

pub const ENV_API_URL: &str = "GROVESYNC_API_URL";
pub const ENV_API_TOKEN: &str = "GROVESYNC_API_TOKEN";

const DEFAULT_BASE_URL: &str = "https://api.grovesync.app";

/// Connection settings for the farm cloud API.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
        }
    }
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(RemoteStoreError::invalid_request("Empty API base URL"));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Read settings from the environment, falling back to the public API URL.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var(ENV_API_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let token = std::env::var(ENV_API_TOKEN).ok().filter(|t| !t.is_empty());
        Self::new(base_url, token)
    }
}

//! HTTP remote store client.
//!
//! Talks to the farm cloud REST API. One endpoint family per entity stream,
//! named by the entity's stable wire name.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

use grovesync_core::sync::{RemoteRecord, SyncEntity, SyncSubmission};

use crate::config::RemoteConfig;
use crate::error::{RemoteStoreError, Result};
use crate::types::{ApiErrorResponse, RemoteStore};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Client for the farm cloud sync API.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteStore {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the cloud API (e.g., "https://api.grovesync.app")
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(&config.base_url, config.token.clone())
    }

    fn records_url(&self, entity: SyncEntity) -> String {
        format!("{}/api/v1/sync/{}/records", self.base_url, entity.name())
    }

    /// Create headers for an API request.
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| RemoteStoreError::auth("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(RemoteStoreError::api(
                    status.as_u16(),
                    format!("{}: {}", error.code, error.message),
                ));
            }
            return Err(RemoteStoreError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            RemoteStoreError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Check a response where only the status matters.
    async fn check_response(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            debug!("API response status: {}", status);
            return Ok(());
        }

        let body = response.text().await?;
        Self::log_response(status, &body);
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
            return Err(RemoteStoreError::api(
                status.as_u16(),
                format!("{}: {}", error.code, error.message),
            ));
        }
        Err(RemoteStoreError::api(
            status.as_u16(),
            format!("Request failed: {}", body),
        ))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    /// Push one pending record envelope.
    ///
    /// POST /api/v1/sync/{entity}/records
    async fn submit(&self, submission: &SyncSubmission) -> Result<()> {
        let url = self.records_url(submission.entity);
        debug!(
            "[Remote] submit {} {} op={}",
            submission.entity.name(),
            submission.record_id,
            submission.op.name()
        );

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(submission)
            .send()
            .await?;

        Self::check_response(response).await
    }

    /// Fetch the full remote collection for one entity stream.
    ///
    /// GET /api/v1/sync/{entity}/records
    async fn fetch_all(&self, entity: SyncEntity) -> Result<Vec<RemoteRecord>> {
        let url = self.records_url(entity);

        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

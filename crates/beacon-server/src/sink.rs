//! Sync sinks used by the server.
//!
//! - [`HttpSink`] POSTs each record as JSON to a configured endpoint, such as
//!   a spreadsheet bridge, optionally with a bearer token. It can be paused,
//!   which keeps records queued.
//! - [`LogSink`] writes records to the log when no endpoint is configured.

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{SyncError, SyncRecord, SyncSink};
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

/// Delivers records to an HTTP endpoint.
#[derive(Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: String,
    timeout: Duration,
    api_key: Option<String>,
    enabled: bool,
}

impl std::fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSink")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl HttpSink {
    /// Create a sink posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("beacon-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            api_key: None,
            enabled: true,
        })
    }

    /// Send `api_key` as a bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Pause (`false`) or resume delivery.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Classify a non-success response.
fn classify_status(status: StatusCode, body: &str) -> SyncError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        SyncError::Unavailable(message)
    } else {
        SyncError::Rejected(message)
    }
}

#[async_trait]
impl SyncSink for HttpSink {
    async fn append(&self, record: &SyncRecord) -> Result<(), SyncError> {
        let mut request = self.client.post(&self.endpoint).json(record);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::Timeout(self.timeout)
                } else {
                    SyncError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(device_id = %record.device_id, status = %status, "Record delivered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body.trim()))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Writes records to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl SyncSink for LogSink {
    async fn append(&self, record: &SyncRecord) -> Result<(), SyncError> {
        info!(
            device_id = %record.device_id,
            device_name = %record.device_name,
            event = %record.event,
            geofence = ?record.geofence_name,
            timestamp = %record.timestamp,
            "History record"
        );
        Ok(())
    }
}

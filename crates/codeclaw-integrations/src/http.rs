//! Dataset host client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use codeclaw_storage::ExportSnapshot;
use reqwest::StatusCode;

use crate::traits::{PublishError, PushReceipt, Publisher};

/// Map an HTTP status to the publish outcome it implies
///
/// # Errors
///
/// Returns the [`PublishError`] a non-success status stands for
pub fn classify_status(status: StatusCode, body: &str) -> Result<(), PublishError> {
    if status.is_success() {
        return Ok(());
    }
    let detail = format!("dataset host returned {status}: {}", body.trim());
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(PublishError::Retryable(detail))
        }
        s if s.is_server_error() => Err(PublishError::Retryable(detail)),
        // 401/403/404/422 and every other client error need a human
        _ => Err(PublishError::Fatal(detail)),
    }
}

/// Uploads snapshot bodies to a dataset host over HTTP
pub struct HttpPublisher {
    api_key: String,
    repo: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpPublisher {
    /// Create a new dataset host client
    ///
    /// # Arguments
    /// * `endpoint` - Base URL of the dataset host
    /// * `repo` - Dataset repository, e.g. `alice/coding-sessions`
    /// * `api_key` - Write token for the repository
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(endpoint: &str, repo: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            repo,
            base_url: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn build_url(&self, fingerprint: &str) -> String {
        format!(
            "{}/api/datasets/{}/snapshots/{}",
            self.base_url, self.repo, fingerprint
        )
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    fn name(&self) -> &str {
        &self.repo
    }

    async fn upload(&self, snapshot: &ExportSnapshot) -> Result<PushReceipt, PublishError> {
        let body = snapshot
            .to_jsonl()
            .map_err(|e| PublishError::Fatal(format!("snapshot not serializable: {e}")))?;
        let url = self.build_url(&snapshot.fingerprint);
        log::debug!("PUT {url}");

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            classify_status(status, &text)?;
        }

        log::info!(
            "Uploaded snapshot {} ({} sessions) to {}",
            snapshot.short_fingerprint(),
            snapshot.len(),
            self.repo
        );
        Ok(PushReceipt::for_snapshot(self.repo.clone(), snapshot))
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codeclaw_storage::ExportSnapshot;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an upload did not go through
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Transient failure; the same snapshot may be retried later
    #[error("Retryable publish failure: {0}")]
    Retryable(String),

    /// Permanent failure (bad credentials, missing repo, rejected payload)
    #[error("Fatal publish failure: {0}")]
    Fatal(String),
}

impl PublishError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg,
        }
    }
}

/// Acknowledgement of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReceipt {
    pub destination: String,
    pub fingerprint: String,
    pub sessions: usize,
    pub uploaded_at: DateTime<Utc>,
}

impl PushReceipt {
    #[must_use]
    pub fn for_snapshot(destination: impl Into<String>, snapshot: &ExportSnapshot) -> Self {
        Self {
            destination: destination.into(),
            fingerprint: snapshot.fingerprint.clone(),
            sessions: snapshot.len(),
            uploaded_at: Utc::now(),
        }
    }
}

/// Boundary to a dataset host
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Destination name, used to key retry state
    fn name(&self) -> &str;

    /// Upload one snapshot
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Retryable`] for transient failures and
    /// [`PublishError::Fatal`] when retrying cannot help
    async fn upload(&self, snapshot: &ExportSnapshot) -> Result<PushReceipt, PublishError>;
}

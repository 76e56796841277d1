//! Publisher that writes into a local dataset checkout.

use async_trait::async_trait;
use chrono::Utc;
use codeclaw_storage::ExportSnapshot;
use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::traits::{PublishError, PushReceipt, Publisher};

/// Lay out a snapshot as `data/<project>/train-<ts>-<id>.jsonl` files plus
/// a `metadata.json` at the dataset root.
pub struct DirectoryPublisher {
    root: PathBuf,
    name: String,
}

impl DirectoryPublisher {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = format!("file://{}", root.display());
        Self { root, name }
    }

    /// Accept `file:///abs/path` or a plain path
    #[must_use]
    pub fn from_endpoint(endpoint: &str) -> Self {
        Self::new(endpoint.strip_prefix("file://").unwrap_or(endpoint))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Directory-safe project name: lowercase, runs of unsafe characters become `-`
#[must_use]
pub fn safe_project_name(name: &str) -> String {
    static UNSAFE: OnceLock<Option<Regex>> = OnceLock::new();
    let lowered = name.trim().to_lowercase();
    let replaced = match UNSAFE.get_or_init(|| Regex::new(r"[^a-z0-9._-]+").ok()) {
        Some(re) => re.replace_all(&lowered, "-").into_owned(),
        None => lowered,
    };
    let safe = replaced.trim_matches('-');
    if safe.is_empty() {
        "unknown".to_string()
    } else {
        safe.to_string()
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> PublishError {
    // Disk full and friends may clear up, permissions usually do not
    let detail = format!("{}: {e}", path.display());
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        PublishError::Fatal(detail)
    } else {
        PublishError::Retryable(detail)
    }
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, snapshot: &ExportSnapshot) -> Result<PushReceipt, PublishError> {
        let ts = Utc::now().format("%Y%m%d-%H%M%S");

        for record in &snapshot.records {
            let project_dir = self.root.join("data").join(safe_project_name(&record.project));
            tokio::fs::create_dir_all(&project_dir)
                .await
                .map_err(|e| io_error(&project_dir, &e))?;

            let short_id: String = record.session_id.chars().take(8).collect();
            let path = project_dir.join(format!("train-{ts}-{short_id}.jsonl"));
            let mut line = record
                .to_line()
                .map_err(|e| PublishError::Fatal(format!("record not serializable: {e}")))?;
            line.push('\n');
            tokio::fs::write(&path, line)
                .await
                .map_err(|e| io_error(&path, &e))?;
        }

        let metadata = json!({
            "fingerprint": snapshot.fingerprint,
            "sessions": snapshot.len(),
            "trajectory_types": snapshot.label_breakdown(),
            "total_redactions": snapshot.total_redactions(),
            "exported_session_ids": snapshot.session_ids(),
            "updated_at": Utc::now().to_rfc3339(),
        });
        let metadata_path = self.root.join("metadata.json");
        let body = serde_json::to_string_pretty(&metadata)
            .map_err(|e| PublishError::Fatal(format!("metadata not serializable: {e}")))?;
        tokio::fs::write(&metadata_path, body)
            .await
            .map_err(|e| io_error(&metadata_path, &e))?;

        log::info!(
            "Wrote snapshot {} ({} sessions) to {}",
            snapshot.short_fingerprint(),
            snapshot.len(),
            self.root.display()
        );
        Ok(PushReceipt::for_snapshot(self.name.clone(), snapshot))
    }
}

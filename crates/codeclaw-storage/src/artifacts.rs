//! File artifacts that live next to the database.
//!
//! Snapshots and the summaries are replaced atomically (write to a temp
//! file, then rename). The quarantine store and the rejects log are
//! append-only JSONL files. With encryption on, snapshot bodies and every
//! quarantine and reject line are sealed with the local key; summaries hold
//! counts only and stay readable.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cipher::{is_sealed, ArtifactCipher};
use crate::models::{ExportSnapshot, ExportSummary, QuarantineRecord, RejectRecord, SessionRecord};
use crate::salt::restrict_to_owner;

const EXPORTS_DIR: &str = "exports";
const SUMMARY_FILE: &str = "summary.json";
const DAEMON_SUMMARY_FILE: &str = "daemon-summary.json";
const QUARANTINE_FILE: &str = "quarantine.jsonl";
const REJECTS_FILE: &str = "rejects.jsonl";
const KEY_FILE: &str = "encryption.key";

/// Snapshot fingerprints are lowercase SHA-256 hex; anything else never
/// names a file under `exports/`
fn check_fingerprint(fingerprint: &str) -> Result<()> {
    let valid = !fingerprint.is_empty()
        && fingerprint.len() <= 64
        && fingerprint.bytes().all(|b| b.is_ascii_hexdigit());
    if !valid {
        bail!("Invalid snapshot fingerprint: {fingerprint:?}");
    }
    Ok(())
}

/// Reader/writer for everything the export path leaves on disk
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    cipher: Option<ArtifactCipher>,
    seal_writes: bool,
}

impl ArtifactStore {
    /// Plaintext store with no key
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cipher: None,
            seal_writes: false,
        }
    }

    /// Store rooted at the data directory. With `encrypt` the key is created
    /// on first use and new artifacts are sealed; without it an existing key
    /// is still loaded so earlier sealed artifacts stay readable.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file cannot be read or created
    pub fn open(root: impl Into<PathBuf>, encrypt: bool) -> Result<Self> {
        let root = root.into();
        let key_path = root.join(KEY_FILE);
        let cipher = if encrypt {
            Some(ArtifactCipher::load_or_create(&key_path)?)
        } else {
            ArtifactCipher::load(&key_path)?
        };
        Ok(Self {
            root,
            cipher,
            seal_writes: encrypt,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.root.join(KEY_FILE)
    }

    /// New artifacts are written sealed
    #[must_use]
    pub fn is_encrypting(&self) -> bool {
        self.seal_writes
    }

    fn seal(&self, text: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) if self.seal_writes => cipher.seal(text),
            _ => Ok(text.to_string()),
        }
    }

    fn open_text(&self, text: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher.open(text),
            None if is_sealed(text) => bail!(
                "Artifact is encrypted but no key was found at {}",
                self.key_path().display()
            ),
            None => Ok(text.to_string()),
        }
    }

    #[must_use]
    pub fn exports_dir(&self) -> PathBuf {
        self.root.join(EXPORTS_DIR)
    }

    #[must_use]
    pub fn snapshot_path(&self, fingerprint: &str) -> PathBuf {
        self.exports_dir().join(format!("{fingerprint}.jsonl"))
    }

    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.exports_dir().join(SUMMARY_FILE)
    }

    /// Summary of the daemon's pending batch, kept apart from the summary of
    /// the reviewer's export
    #[must_use]
    pub fn daemon_summary_path(&self) -> PathBuf {
        self.exports_dir().join(DAEMON_SUMMARY_FILE)
    }

    #[must_use]
    pub fn quarantine_path(&self) -> PathBuf {
        self.root.join(QUARANTINE_FILE)
    }

    #[must_use]
    pub fn rejects_path(&self) -> PathBuf {
        self.root.join(REJECTS_FILE)
    }

    /// Write the snapshot body and refresh the export summary.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails
    pub fn write_snapshot(&self, snapshot: &ExportSnapshot, quarantined: usize) -> Result<PathBuf> {
        let path = self.write_snapshot_body(snapshot)?;
        write_summary(&self.summary_path(), snapshot, quarantined)?;
        Ok(path)
    }

    /// Write a daemon batch. The reviewer's `summary.json` is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails
    pub fn write_daemon_batch(
        &self,
        snapshot: &ExportSnapshot,
        quarantined: usize,
    ) -> Result<PathBuf> {
        let path = self.write_snapshot_body(snapshot)?;
        write_summary(&self.daemon_summary_path(), snapshot, quarantined)?;
        Ok(path)
    }

    /// Snapshots are content-addressed, so rewriting one is harmless
    fn write_snapshot_body(&self, snapshot: &ExportSnapshot) -> Result<PathBuf> {
        let path = self.snapshot_path(&snapshot.fingerprint);
        let body = self.seal(&snapshot.to_jsonl()?)?;
        write_atomic(&path, body.as_bytes())?;

        log::info!(
            "Snapshot {} written ({} sessions{})",
            snapshot.short_fingerprint(),
            snapshot.len(),
            if self.seal_writes { ", encrypted" } else { "" }
        );
        Ok(path)
    }

    /// Raw JSONL body of a previously written snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if no snapshot with this fingerprint exists
    pub fn read_snapshot_body(&self, fingerprint: &str) -> Result<String> {
        check_fingerprint(fingerprint)?;
        let path = self.snapshot_path(fingerprint);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("No export snapshot at {}", path.display()))?;
        self.open_text(&raw)
    }

    /// Reload a snapshot for publishing. The body is re-fingerprinted, so a
    /// file edited after review is refused.
    ///
    /// # Errors
    ///
    /// Returns an error if the fingerprint is not hex, or the snapshot is
    /// missing, unparseable or modified
    pub fn read_snapshot(&self, fingerprint: &str) -> Result<ExportSnapshot> {
        let body = self.read_snapshot_body(fingerprint)?;
        let mut records = Vec::new();
        for (idx, line) in body.lines().enumerate() {
            let record: SessionRecord = serde_json::from_str(line)
                .with_context(|| format!("Corrupt line {} in snapshot {fingerprint}", idx + 1))?;
            records.push(record);
        }
        let created_at = self
            .read_summary()?
            .filter(|s| s.fingerprint == fingerprint)
            .map_or_else(chrono::Utc::now, |s| s.last_updated);

        let snapshot = ExportSnapshot::new(records, created_at)?;
        if snapshot.fingerprint != fingerprint {
            bail!(
                "Snapshot {} changed on disk since it was exported; run `codeclaw export` again",
                &fingerprint[..fingerprint.len().min(12)]
            );
        }
        Ok(snapshot)
    }

    /// Latest summary, if any export ran yet
    ///
    /// # Errors
    ///
    /// Returns an error if the summary exists but cannot be parsed
    pub fn read_summary(&self) -> Result<Option<ExportSummary>> {
        read_summary(&self.summary_path())
    }

    /// Summary of the daemon's last batch
    ///
    /// # Errors
    ///
    /// Returns an error if the summary exists but cannot be parsed
    pub fn read_daemon_summary(&self) -> Result<Option<ExportSummary>> {
        read_summary(&self.daemon_summary_path())
    }

    /// # Errors
    ///
    /// Returns an error if the quarantine store cannot be written
    pub fn append_quarantine(&self, record: &QuarantineRecord) -> Result<()> {
        self.append_line(&self.quarantine_path(), record)
    }

    /// # Errors
    ///
    /// Returns an error if the quarantine store exists but cannot be read
    pub fn read_quarantine(&self) -> Result<Vec<QuarantineRecord>> {
        self.read_lines(&self.quarantine_path())
    }

    /// # Errors
    ///
    /// Returns an error if the rejects log cannot be written
    pub fn append_reject(&self, record: &RejectRecord) -> Result<()> {
        self.append_line(&self.rejects_path(), record)
    }

    /// # Errors
    ///
    /// Returns an error if the rejects log exists but cannot be read
    pub fn read_rejects(&self) -> Result<Vec<RejectRecord>> {
        self.read_lines(&self.rejects_path())
    }

    fn append_line<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = self.seal(&serde_json::to_string(value)?)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        restrict_to_owner(path)?;
        Ok(())
    }

    fn read_lines<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = self
                .open_text(line)
                .and_then(|text| serde_json::from_str(&text).map_err(anyhow::Error::from));
            match parsed {
                Ok(entry) => entries.push(entry),
                // A torn final line from an interrupted append is skipped, not fatal
                Err(e) => log::warn!("Skipping line {} of {}: {e}", idx + 1, path.display()),
            }
        }
        Ok(entries)
    }
}

fn write_summary(path: &Path, snapshot: &ExportSnapshot, quarantined: usize) -> Result<()> {
    let summary = ExportSummary::for_snapshot(snapshot, quarantined);
    write_atomic(path, serde_json::to_string_pretty(&summary)?.as_bytes())
}

fn read_summary(path: &Path) -> Result<Option<ExportSummary>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw).with_context(|| {
        format!("Corrupt export summary at {}", path.display())
    })?))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    restrict_to_owner(&temp_path)?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

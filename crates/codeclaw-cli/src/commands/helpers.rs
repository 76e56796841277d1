//! Helper utility functions for CLI commands

use anyhow::{Context, Result};
use codeclaw_core::{config::Paths, GateController};
use codeclaw_storage::{load_or_create_salt, ArtifactStore, Database};
use std::sync::Arc;

/// Everything a command needs from the data directory
pub struct Workspace {
    pub paths: Paths,
    pub db: Arc<Database>,
}

impl Workspace {
    /// Open (and create) the data directory at `paths`
    pub fn at(paths: Paths) -> Result<Self> {
        std::fs::create_dir_all(paths.root())
            .with_context(|| format!("Failed to create {}", paths.root().display()))?;
        let db = Arc::new(Database::open(&paths.database())?);
        Ok(Self { paths, db })
    }

    pub fn gate(&self) -> GateController {
        GateController::new(self.db.clone())
    }

    /// Artifact store honoring the `encrypt_artifacts` setting
    pub fn artifacts(&self) -> Result<ArtifactStore> {
        let settings = self.db.get_settings()?;
        ArtifactStore::open(self.paths.root(), settings.encrypt_artifacts)
    }

    pub fn salt(&self) -> Result<String> {
        load_or_create_salt(&self.paths.salt())
    }
}

/// Safely truncate a string to a maximum number of characters (not bytes).
/// This avoids panics when slicing multi-byte UTF-8 characters.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count > max_chars {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        s.to_string()
    }
}

/// Show only the first few characters of a credential or redaction string
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(not set)".to_string();
    }
    let visible: String = s.chars().take(4).collect();
    format!("{visible}***")
}

pub fn print_heading(title: &str) {
    println!("\n{title}");
    println!("{}", "\u{2550}".repeat(title.chars().count().max(12)));
}

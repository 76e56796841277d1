use anyhow::Result;
use std::path::{Path, PathBuf};

/// Get the local data directory for codeclaw.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("codeclaw");
    Ok(path)
}

/// Well-known files under the data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths rooted at [`get_data_dir`]
    ///
    /// # Errors
    ///
    /// Returns an error if the local data directory cannot be determined.
    pub fn from_data_dir() -> Result<Self> {
        Ok(Self::new(get_data_dir()?))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.root.join("codeclaw.db")
    }

    #[must_use]
    pub fn salt(&self) -> PathBuf {
        self.root.join(".salt")
    }

    #[must_use]
    pub fn socket(&self) -> PathBuf {
        self.root.join("codeclaw.sock")
    }

    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.root.join("codeclaw.pid")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.root.join("codeclaw.log")
    }
}

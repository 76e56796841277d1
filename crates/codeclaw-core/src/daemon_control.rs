use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::config::Paths;

/// Pid file bookkeeping for the detached daemon process
#[derive(Debug, Clone)]
pub struct DaemonControl {
    pid_file: PathBuf,
}

impl DaemonControl {
    #[must_use]
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
        }
    }

    #[must_use]
    pub fn for_paths(paths: &Paths) -> Self {
        Self::new(paths.pid_file())
    }

    #[must_use]
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Pid of the daemon, if a pid file exists
    ///
    /// # Errors
    ///
    /// Returns an error if the pid file exists but cannot be read or parsed
    pub fn get_pid(&self) -> anyhow::Result<Option<u32>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.pid_file)
            .with_context(|| format!("Failed to read {}", self.pid_file.display()))?;
        let pid = contents
            .trim()
            .parse::<u32>()
            .with_context(|| format!("Corrupt pid file {}", self.pid_file.display()))?;
        Ok(Some(pid))
    }

    /// # Errors
    ///
    /// Returns an error if the pid file cannot be written
    pub fn write_pid(&self, pid: u32) -> anyhow::Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.pid_file, pid.to_string())?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the pid file exists and cannot be removed
    pub fn remove_pid(&self) -> anyhow::Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)?;
        }
        Ok(())
    }
}

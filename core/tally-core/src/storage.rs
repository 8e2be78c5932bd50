//! Storage configuration and path management for Tally.
//!
//! All on-disk locations are decided here so the CLI, the engine and tests
//! agree on layout. Tests inject a temp root with [`StorageConfig::with_root`].

use std::path::{Path, PathBuf};

use crate::error::{Result, TallyError};

/// Central configuration for all Tally storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for Tally data (default: ~/.tally)
    root: PathBuf,
    /// Directory standing in for the platform app-group container that the
    /// app and its passive surfaces share (default: <root>/group)
    shared_dir: PathBuf,
}

impl StorageConfig {
    /// Resolves the default layout under the user's home directory.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(TallyError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(".tally")))
    }

    pub fn with_root(root: PathBuf) -> Self {
        let shared_dir = root.join("group");
        Self { root, shared_dir }
    }

    /// Overrides the shared container location (config `[mirror] shared_region_dir`).
    pub fn with_shared_dir(mut self, shared_dir: PathBuf) -> Self {
        self.shared_dir = shared_dir;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Shared key/value region read by widgets and complications.
    pub fn region_file(&self) -> PathBuf {
        self.shared_dir.join("mirror.json")
    }

    /// Durable session records (receiving device).
    pub fn sessions_db(&self) -> PathBuf {
        self.root.join("sessions.db")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

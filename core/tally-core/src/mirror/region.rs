//! Key/value region shared between the app and its passive surfaces.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "counterValue": 3,
//!     "mistakeTimeline": "[\"2026-01-30T09:01:00Z\", ...]"
//!   }
//! }
//! ```
//!
//! # Atomic Writes
//!
//! Every commit rewrites the whole file through a temp file + rename, so a
//! reader in another process sees either the old entries or the new ones,
//! never a mix. Multi-key updates go through one [`SharedRegion::commit`].
//!
//! # Tolerant Reads
//!
//! An empty, corrupt or future-version file reads as an empty region (logged);
//! the next commit replaces it.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::RegionError;

const REGION_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionEntry {
    Int(i64),
    Blob(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionWrite {
    SetInt(String, i64),
    SetBlob(String, String),
    Remove(String),
}

impl RegionWrite {
    pub fn int(key: &str, value: i64) -> Self {
        RegionWrite::SetInt(key.to_string(), value)
    }

    pub fn blob(key: &str, value: impl Into<String>) -> Self {
        RegionWrite::SetBlob(key.to_string(), value.into())
    }

    pub fn remove(key: &str) -> Self {
        RegionWrite::Remove(key.to_string())
    }
}

/// Point-in-time view of every entry. Reading several keys from one snapshot
/// gives a consistent pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSnapshot {
    entries: BTreeMap<String, RegionEntry>,
}

impl RegionSnapshot {
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            RegionEntry::Int(value) => Some(*value),
            RegionEntry::Blob(_) => None,
        }
    }

    pub fn get_blob(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            RegionEntry::Blob(value) => Some(value.as_str()),
            RegionEntry::Int(_) => None,
        }
    }

    fn apply(&mut self, writes: &[RegionWrite]) {
        for write in writes {
            match write {
                RegionWrite::SetInt(key, value) => {
                    self.entries.insert(key.clone(), RegionEntry::Int(*value));
                }
                RegionWrite::SetBlob(key, value) => {
                    self.entries
                        .insert(key.clone(), RegionEntry::Blob(value.clone()));
                }
                RegionWrite::Remove(key) => {
                    self.entries.remove(key);
                }
            }
        }
    }
}

/// Storage backing the mirror. Implementations must apply a commit
/// all-or-nothing with respect to concurrent readers.
pub trait SharedRegion: Send + Sync {
    fn snapshot(&self) -> Result<RegionSnapshot, RegionError>;

    fn commit(&self, writes: &[RegionWrite]) -> Result<(), RegionError>;

    /// False for the process-local fallback: other processes cannot see it.
    fn is_shared(&self) -> bool;

    fn get_int(&self, key: &str) -> Option<i64> {
        self.snapshot().ok()?.get_int(key)
    }

    fn get_blob(&self, key: &str) -> Option<String> {
        self.snapshot().ok()?.get_blob(key).map(str::to_string)
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), RegionError> {
        self.commit(&[RegionWrite::int(key, value)])
    }

    fn set_blob(&self, key: &str, value: &str) -> Result<(), RegionError> {
        self.commit(&[RegionWrite::blob(key, value)])
    }
}

/// Opens the file-backed region, falling back to a process-local one when the
/// shared container is unusable. The fallback keeps the app working but
/// widgets in other processes will not see its updates.
pub fn open_region(path: &Path) -> Arc<dyn SharedRegion> {
    match FileRegion::open(path) {
        Ok(region) => Arc::new(region),
        Err(err) => {
            warn!(
                error = %err,
                "Shared region unavailable; using process-local fallback"
            );
            Arc::new(MemoryRegion::default())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, RegionEntry>,
}

/// Region persisted as a JSON file in the shared container directory.
#[derive(Debug)]
pub struct FileRegion {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRegion {
    pub fn open(path: &Path) -> Result<Self, RegionError> {
        let unavailable = |reason: String| RegionError::SharedRegionUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let parent = path
            .parent()
            .ok_or_else(|| unavailable("region path has no parent directory".to_string()))?;
        fs_err::create_dir_all(parent).map_err(|err| unavailable(err.to_string()))?;

        // Probe that the container is writable before handing it out.
        NamedTempFile::new_in(parent).map_err(|err| unavailable(err.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RegionSnapshot, RegionError> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegionSnapshot::default())
            }
            Err(err) => {
                return Err(RegionError::SharedRegionUnavailable {
                    path: self.path.clone(),
                    reason: err.to_string(),
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(RegionSnapshot::default());
        }

        match serde_json::from_str::<RegionFile>(&content) {
            Ok(file) if file.version == REGION_VERSION => Ok(RegionSnapshot {
                entries: file.entries,
            }),
            Ok(file) => {
                warn!(
                    version = file.version,
                    expected = REGION_VERSION,
                    "Unsupported shared region version; reading as empty"
                );
                Ok(RegionSnapshot::default())
            }
            Err(err) => {
                warn!(error = %err, "Corrupt shared region file; reading as empty");
                Ok(RegionSnapshot::default())
            }
        }
    }

    fn store(&self, snapshot: &RegionSnapshot) -> Result<(), RegionError> {
        let file = RegionFile {
            version: REGION_VERSION,
            entries: snapshot.entries.clone(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|err| RegionError::WriteFailed(format!("serialize: {}", err)))?;

        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| RegionError::WriteFailed("region path has no parent".to_string()))?;
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|err| RegionError::WriteFailed(format!("temp file: {}", err)))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| RegionError::WriteFailed(format!("write temp file: {}", err)))?;
        temp_file
            .flush()
            .map_err(|err| RegionError::WriteFailed(format!("flush temp file: {}", err)))?;
        temp_file
            .persist(&self.path)
            .map_err(|err| RegionError::WriteFailed(format!("persist: {}", err.error)))?;
        Ok(())
    }
}

impl SharedRegion for FileRegion {
    fn snapshot(&self) -> Result<RegionSnapshot, RegionError> {
        self.load()
    }

    fn commit(&self, writes: &[RegionWrite]) -> Result<(), RegionError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RegionError::WriteFailed("region write lock poisoned".to_string()))?;
        let mut snapshot = self.load()?;
        snapshot.apply(writes);
        self.store(&snapshot)
    }

    fn is_shared(&self) -> bool {
        true
    }
}

/// Process-local region. Used as the degraded fallback and in tests.
#[derive(Debug, Default)]
pub struct MemoryRegion {
    entries: Mutex<RegionSnapshot>,
}

impl SharedRegion for MemoryRegion {
    fn snapshot(&self) -> Result<RegionSnapshot, RegionError> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .map_err(|_| RegionError::WriteFailed("memory region lock poisoned".to_string()))
    }

    fn commit(&self, writes: &[RegionWrite]) -> Result<(), RegionError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| RegionError::WriteFailed("memory region lock poisoned".to_string()))?;
        entries.apply(writes);
        Ok(())
    }

    fn is_shared(&self) -> bool {
        false
    }
}

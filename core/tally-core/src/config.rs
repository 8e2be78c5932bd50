//! Runtime configuration loaded from `<root>/config.toml`.
//!
//! A missing file yields defaults; a malformed one is an error the caller can
//! log and replace with defaults.
//!
//! ```toml
//! role = "watch"
//!
//! [link]
//! event_queue_capacity = 64
//!
//! [naming]
//! utc_offset_minutes = -480
//!
//! [mirror]
//! shared_region_dir = "/path/to/app-group"
//! ```

use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::Deserialize;

use crate::error::{Result, TallyError};
use crate::link::Role;

const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TallyConfig {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Bound of the queue between transport callbacks and the event loop.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

fn default_event_queue_capacity() -> usize {
    DEFAULT_EVENT_QUEUE_CAPACITY
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NamingConfig {
    /// Offset used to pick the hour of day for auto-named sessions.
    /// Local time when absent.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl NamingConfig {
    pub fn offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes.saturating_mul(60)))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MirrorConfig {
    #[serde(default)]
    pub shared_region_dir: Option<PathBuf>,
}

impl TallyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs_err::read_to_string(path).map_err(|err| TallyError::Io {
            context: format!("reading config {}", path.display()),
            source: err,
        })?;
        let config: TallyConfig =
            toml::from_str(&content).map_err(|err| TallyError::ConfigMalformed {
                path: path.to_path_buf(),
                details: err.to_string(),
            })?;

        if config.link.event_queue_capacity == 0 {
            return Err(TallyError::ConfigMalformed {
                path: path.to_path_buf(),
                details: "link.event_queue_capacity must be at least 1".to_string(),
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = TallyConfig::load(&temp_dir.path().join("missing.toml")).expect("load");
        assert_eq!(config.role, Role::Phone);
        assert_eq!(config.link.event_queue_capacity, DEFAULT_EVENT_QUEUE_CAPACITY);
        assert!(config.naming.offset().is_none());
    }

    #[test]
    fn parses_all_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
role = "watch"

[link]
event_queue_capacity = 8

[naming]
utc_offset_minutes = -300

[mirror]
shared_region_dir = "/tmp/group"
"#,
        )
        .expect("write config");

        let config = TallyConfig::load(&path).expect("load");
        assert_eq!(config.role, Role::Watch);
        assert_eq!(config.link.event_queue_capacity, 8);
        assert_eq!(
            config.naming.offset(),
            FixedOffset::west_opt(5 * 3600)
        );
        assert_eq!(
            config.mirror.shared_region_dir,
            Some(PathBuf::from("/tmp/group"))
        );
    }

    #[test]
    fn rejects_zero_capacity() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[link]\nevent_queue_capacity = 0\n").expect("write config");
        assert!(matches!(
            TallyConfig::load(&path),
            Err(TallyError::ConfigMalformed { .. })
        ));
    }

    #[test]
    fn rejects_unknown_role() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "role = \"tablet\"\n").expect("write config");
        assert!(TallyConfig::load(&path).is_err());
    }
}

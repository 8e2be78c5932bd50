//! Tracing setup shared by every Tally binary.
//!
//! Logs go to a daily rolling file under `<root>/logs/`. `TALLY_DEBUG_LOG=1`
//! forces debug output; otherwise `RUST_LOG` applies, defaulting to `info`.

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::storage::StorageConfig;

const DEBUG_ENV: &str = "TALLY_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "tally.log";

/// Installs the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered lines are lost on exit.
///
/// Returns `None` when logging falls back to stderr (log dir not writable) or
/// a subscriber was already installed.
pub fn init(storage: &StorageConfig) -> Option<WorkerGuard> {
    let filter = env_filter();
    let logs_dir = storage.logs_dir();

    if let Err(err) = fs_err::create_dir_all(&logs_dir) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        tracing::warn!(error = %err, "Failed to create log directory; logging to stderr");
        return None;
    }

    let appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()
        .map(|_| guard)
}

fn env_filter() -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

//! Error types for tally-core operations.
//!
//! Every failure in the sync core is terminal-and-local: it is caught where it
//! happens, logged, and reported to the caller as a value. Nothing here is
//! meant to unwind through the event loop.

use std::path::PathBuf;

use tally_protocol::codec::MessageKind;
use tally_protocol::DecodeError;

// ═══════════════════════════════════════════════════════════════════════════════
// Link Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a send was refused or failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Send attempted before activation completed.
    #[error("link not activated; dropping {kind:?} message")]
    LinkNotActivated { kind: MessageKind },

    /// Peer unreachable on the constrained role. No retry, no outbox.
    #[error("peer unreachable; dropping {kind:?} message")]
    LinkUnreachable { kind: MessageKind },

    /// The platform transport reported an asynchronous failure.
    #[error("transport failed to deliver {kind:?} message: {reason}")]
    SendFailed { kind: MessageKind, reason: String },

    #[error("event loop is not running")]
    EventLoopStopped,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Storage Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("shared region unavailable at {path}: {reason}")]
    SharedRegionUnavailable { path: PathBuf, reason: String },

    #[error("shared region write failed: {0}")]
    WriteFailed(String),

    #[error("shared region value for `{key}` is malformed: {details}")]
    Malformed { key: String, details: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open session store: {0}")]
    Open(String),

    #[error("session store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("session store query failed: {0}")]
    Query(String),

    #[error("session not found: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("malformed session envelope: {0}")]
    Decode(#[from] DecodeError),

    #[error("envelope carries a {0:?} message, not a session")]
    NotASession(MessageKind),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Crate Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can surface from tally-core's public API.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Component Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    // ─────────────────────────────────────────────────────────────────────
    // Submission Errors
    // ─────────────────────────────────────────────────────────────────────
    /// Submit attempted with no mistakes recorded. Nothing was sent and the
    /// counter was left alone.
    #[error("nothing to submit: no mistakes recorded in this session")]
    EmptySession,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TallyError>;

impl From<TallyError> for String {
    fn from(err: TallyError) -> String {
        err.to_string()
    }
}

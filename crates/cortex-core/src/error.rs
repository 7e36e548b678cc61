//! Crate-wide error type.
//!
//! Every module boundary (store, hnsw, ingest, search, resolver) defines its
//! own `thiserror` enum; this module composes them into one type so callers
//! crossing module lines don't have to match on five different errors.

use std::fmt;

/// Top-level error for every public operation in this crate.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write would violate an invariant (uniqueness, acyclicity, state machine).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store is open read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// A caller-supplied option was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embed run lock is held by another live process.
    #[error("embed lock held by pid {pid}")]
    LockHeld {
        /// PID of the process holding the lock.
        pid: u32,
    },

    /// Persisted HNSW file has an unknown magic/version, or dimension mismatch.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// Retryable I/O or HTTP failure (timeouts, locked DB, 5xx, DNS).
    #[error("transient error: {0}")]
    Transient(String),

    /// Operation was canceled via a cancellation token.
    #[error("canceled")]
    Canceled,

    /// Unrecoverable condition: schema mismatch, corruption.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// SQLite error surfaced from the store.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error surfaced from ingest/hnsw persistence.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON from a collaborator or telemetry sink.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// One-line remediation hint keyed on the error kind, for the (excluded)
    /// CLI front end to print without re-deriving the mapping itself.
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "check the id and try again",
            CoreError::Conflict(_) => "the write violates an invariant; inspect the conflicting record",
            CoreError::ReadOnly => "reopen the store without read-only mode to write",
            CoreError::InvalidInput(_) => "check the option values against the documented ranges",
            CoreError::LockHeld { .. } => "another embed pass is running; wait or remove the stale embed.lock",
            CoreError::FormatMismatch(_) => "rebuild the HNSW index from the store",
            CoreError::Transient(_) => "retry; the underlying condition is expected to clear",
            CoreError::Canceled => "operation was canceled",
            CoreError::Fatal(_) => "the store is corrupt or from an incompatible version; restore from backup or reimport",
            CoreError::Database(_) => "inspect the underlying SQLite error",
            CoreError::Io(_) => "check filesystem permissions and available space",
            CoreError::Json(_) => "the collaborator or telemetry payload was malformed JSON",
        }
    }

    /// Classify a raw I/O-ish error message as transient, matching the rules
    /// in §4.3 of the design: 408/429/5xx, connection reset, timeout, DNS.
    pub fn classify_transient(detail: impl fmt::Display) -> Self {
        CoreError::Transient(detail.to_string())
    }
}

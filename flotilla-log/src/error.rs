//! Error types for flotilla-log.

use std::path::PathBuf;

use thiserror::Error;

use crate::entry::CommitStatus;
use flotilla_core::CoreError;

/// All errors that can arise from commit log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (log document).
    #[error("commit log JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error bubbled up from core persistence.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// No entry holds the requested sequence number.
    #[error("commit entry {sequence_number} not found")]
    EntryNotFound { sequence_number: u64 },

    /// Concurrent appends kept winning the sequence race past the retry
    /// budget.
    #[error("append conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// The requested status change is not a forward transition.
    #[error("invalid status transition for entry {sequence_number}: {from} → {to}")]
    InvalidTransition {
        sequence_number: u64,
        from: CommitStatus,
        to: CommitStatus,
    },
}

impl LogError {
    /// Stable error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            LogError::Io { .. } => "IO_ERROR",
            LogError::Json(_) => "SERDE_ERROR",
            LogError::Core(inner) => inner.code(),
            LogError::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            LogError::Conflict { .. } => "CONFLICT",
            LogError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

/// Convenience constructor for [`LogError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LogError {
    LogError::Io {
        path: path.into(),
        source,
    }
}

//! Error types for flotilla-core.
//!
//! Every variant maps to a stable string code via [`CoreError::code`] so
//! callers (and the protocol adapters above the core) can branch on codes
//! rather than on Rust types.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from core persistence operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization/parse error (service config).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/parse error (shared state documents).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The service config file did not exist at the expected path.
    #[error("service config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.flotilla/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The baseline document did not exist at the expected path.
    #[error("baseline not found at {path}")]
    BaselineNotFound { path: PathBuf },

    /// The decision ledger is corrupt, missing where required, or
    /// unparsable.
    #[error("decision ledger error at {path}: {detail}")]
    LedgerFile { path: PathBuf, detail: String },
}

impl CoreError {
    /// Stable error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Io { .. } => "IO_ERROR",
            CoreError::Yaml(_) | CoreError::Json(_) => "SERDE_ERROR",
            CoreError::ConfigNotFound { .. } | CoreError::HomeNotFound => "CONFIG_NOT_FOUND",
            CoreError::BaselineNotFound { .. } => "CONFIG_NOT_FOUND",
            CoreError::LedgerFile { .. } => "LEDGER_FILE_ERROR",
        }
    }
}

/// Convenience constructor for [`CoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}

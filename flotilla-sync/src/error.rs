//! Error types for flotilla-sync.
//!
//! Variants mirror the operation preconditions; [`SyncError::code`] exposes
//! the stable taxonomy the protocol adapters surface to callers.

use std::path::PathBuf;

use thiserror::Error;

use flotilla_core::types::{DecisionId, DecisionStatus, MachineId};
use flotilla_core::CoreError;
use flotilla_log::LogError;

/// All errors that can arise from synchronization operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from core persistence.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An error from the commit log.
    #[error("commit log error: {0}")]
    Log(#[from] LogError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON error (inventory payloads, event details).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decision {id} not found")]
    DecisionNotFound { id: DecisionId },

    /// The decision already left `pending` (approve/reject) or already
    /// reached a post-approval state (apply).
    #[error("decision {id} already processed (status: {status})")]
    DecisionAlreadyProcessed { id: DecisionId, status: DecisionStatus },

    /// Apply requires an approved decision.
    #[error("decision {id} is not approved (status: {status})")]
    DecisionNotApproved { id: DecisionId, status: DecisionStatus },

    /// Rollback requires an applied decision.
    #[error("decision {id} is not applied (status: {status})")]
    DecisionNotApplied { id: DecisionId, status: DecisionStatus },

    #[error("rollback of decision {id} failed: {detail}")]
    RollbackFailed { id: DecisionId, detail: String },

    #[error("comparison failed for {machine_id}: {detail}")]
    ComparisonFailed { machine_id: MachineId, detail: String },

    #[error("decision {id} has no target machine")]
    NoTargetMachine { id: DecisionId },

    #[error("heartbeat check failed: {detail}")]
    HeartbeatCheckFailed { detail: String },

    #[error("machine {machine_id} is not online")]
    MachineNotOnline { machine_id: MachineId },

    #[error("machine {machine_id} is not offline")]
    MachineNotOffline { machine_id: MachineId },

    #[error("version {requested} is incompatible with baseline {baseline}")]
    VersionMismatch { requested: String, baseline: String },

    /// External collector command failed (spawn, timeout, or non-zero
    /// exit).
    #[error("inventory command {script} failed: {detail}")]
    Command { script: PathBuf, detail: String },
}

impl SyncError {
    /// Stable error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Core(inner) => inner.code(),
            SyncError::Log(inner) => inner.code(),
            SyncError::Io { .. } => "IO_ERROR",
            SyncError::Json(_) => "SERDE_ERROR",
            SyncError::DecisionNotFound { .. } => "DECISION_NOT_FOUND",
            SyncError::DecisionAlreadyProcessed { .. } => "DECISION_ALREADY_PROCESSED",
            SyncError::DecisionNotApproved { .. } => "DECISION_NOT_APPROVED",
            SyncError::DecisionNotApplied { .. } => "DECISION_NOT_APPLIED",
            SyncError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            SyncError::ComparisonFailed { .. } => "COMPARISON_FAILED",
            SyncError::NoTargetMachine { .. } => "NO_TARGET_MACHINE",
            SyncError::HeartbeatCheckFailed { .. } => "HEARTBEAT_CHECK_FAILED",
            SyncError::MachineNotOnline { .. } => "MACHINE_NOT_ONLINE",
            SyncError::MachineNotOffline { .. } => "MACHINE_NOT_OFFLINE",
            SyncError::VersionMismatch { .. } => "VERSION_MISMATCH",
            SyncError::Command { .. } => "COMPARISON_FAILED",
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

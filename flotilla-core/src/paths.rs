//! Layout of the shared state directory.
//!
//! ```text
//! <shared>/
//!   commit-log.json            commit log document
//!   commit-log.lock            advisory lock guarding appends
//!   heartbeats/<machine>.json  one HeartbeatRecord per machine
//!   baseline.json              reference baseline document
//!   decisions/ledger.jsonl     append-only decision event log
//!   decisions/index.json       materialized decisionId → Decision
//!   backups/baseline-<ts>.json
//!   backups/rollback/<decision-id>.json
//! ```
//!
//! All helpers are pure path arithmetic; directory creation happens at the
//! call sites that write.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::types::DecisionId;

pub const COMMIT_LOG_FILE: &str = "commit-log.json";
pub const COMMIT_LOG_LOCK: &str = "commit-log.lock";
pub const BASELINE_FILE: &str = "baseline.json";
pub const LEDGER_EVENTS_FILE: &str = "ledger.jsonl";
pub const LEDGER_INDEX_FILE: &str = "index.json";

/// `<home>/.flotilla/`
pub fn flotilla_root(home: &Path) -> PathBuf {
    home.join(".flotilla")
}

/// Default shared state root when the config does not override it.
pub fn default_shared_root(home: &Path) -> PathBuf {
    flotilla_root(home).join("shared")
}

/// Default config root (where applied decision files land).
pub fn default_config_root(home: &Path) -> PathBuf {
    flotilla_root(home).join("config")
}

pub fn config_file(home: &Path) -> PathBuf {
    flotilla_root(home).join("config.yaml")
}

pub fn commit_log_path(shared: &Path) -> PathBuf {
    shared.join(COMMIT_LOG_FILE)
}

pub fn commit_log_lock_path(shared: &Path) -> PathBuf {
    shared.join(COMMIT_LOG_LOCK)
}

pub fn heartbeats_dir(shared: &Path) -> PathBuf {
    shared.join("heartbeats")
}

pub fn heartbeat_path(shared: &Path, machine: &str) -> PathBuf {
    heartbeats_dir(shared).join(format!("{machine}.json"))
}

pub fn baseline_path(shared: &Path) -> PathBuf {
    shared.join(BASELINE_FILE)
}

pub fn decisions_dir(shared: &Path) -> PathBuf {
    shared.join("decisions")
}

pub fn ledger_events_path(shared: &Path) -> PathBuf {
    decisions_dir(shared).join(LEDGER_EVENTS_FILE)
}

pub fn ledger_index_path(shared: &Path) -> PathBuf {
    decisions_dir(shared).join(LEDGER_INDEX_FILE)
}

pub fn backups_dir(shared: &Path) -> PathBuf {
    shared.join("backups")
}

/// `backups/baseline-<compact-utc-timestamp>.json`
pub fn baseline_backup_path(shared: &Path, at: DateTime<Utc>) -> PathBuf {
    backups_dir(shared).join(format!(
        "baseline-{}.json",
        at.format("%Y%m%dT%H%M%S%3f")
    ))
}

pub fn rollback_dir(shared: &Path) -> PathBuf {
    backups_dir(shared).join("rollback")
}

pub fn rollback_path(shared: &Path, decision: &DecisionId) -> PathBuf {
    rollback_dir(shared).join(format!("{decision}.json"))
}

//! Decision ledger — append-only event log plus materialized index.
//!
//! Source of truth is `<shared>/decisions/ledger.jsonl`: one JSON event per
//! line, appended under an exclusive advisory lock. The current state of
//! every decision is materialized into `<shared>/decisions/index.json`,
//! rewritten atomically after each append. Any human-readable rendering of
//! decisions is a derived view; nothing ever parses it back.
//!
//! If the index is lost it is rebuilt by replaying the event log
//! ([`DecisionLedger::rebuild_index`]).

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::paths;
use crate::types::{Decision, DecisionId, DecisionStatus, RollbackPoint};

/// One recorded lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub decision_id: DecisionId,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DecisionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DecisionEventKind {
    Proposed {
        decision: Decision,
    },
    Approved {
        approved_by: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Rejected,
    Applied {
        rollback_point: RollbackPoint,
        files_applied: Vec<String>,
        #[serde(default)]
        errors: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        commit_seq: Option<u64>,
    },
    RolledBack {
        reason: String,
    },
}

/// Materialized current state of all decisions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct IndexFile {
    version: u32,
    updated_at: Option<DateTime<Utc>>,
    decisions: BTreeMap<String, Decision>,
}

/// Handle on the decision ledger files for one shared state root.
#[derive(Debug, Clone)]
pub struct DecisionLedger {
    events_path: PathBuf,
    index_path: PathBuf,
}

impl DecisionLedger {
    pub fn open_at(shared: &Path) -> Self {
        Self {
            events_path: paths::ledger_events_path(shared),
            index_path: paths::ledger_index_path(shared),
        }
    }

    /// Record one event: append it to the event log and rewrite the index
    /// with `updated` as the decision's new current state. Both writes
    /// happen under an exclusive lock on the event log file.
    pub fn record(&self, event: &DecisionEvent, updated: &Decision) -> Result<(), CoreError> {
        let Some(dir) = self.events_path.parent() else {
            return Err(io_err(
                &self.events_path,
                std::io::Error::other("invalid ledger path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .map_err(|e| io_err(&self.events_path, e))?;
        file.lock_exclusive()
            .map_err(|e| io_err(&self.events_path, e))?;

        let result = self.record_locked(&file, &line, updated);

        // Lock released on drop; unlock explicitly so an error path can't
        // hold it across the caller's retry.
        let _ = fs2::FileExt::unlock(&file);
        result
    }

    fn record_locked(
        &self,
        mut file: &std::fs::File,
        line: &str,
        updated: &Decision,
    ) -> Result<(), CoreError> {
        file.write_all(line.as_bytes())
            .map_err(|e| io_err(&self.events_path, e))?;
        file.sync_all().map_err(|e| io_err(&self.events_path, e))?;

        let mut index = self.load_index_file()?;
        index.version = 1;
        index.updated_at = Some(Utc::now());
        index
            .decisions
            .insert(updated.id.to_string(), updated.clone());
        self.save_index_file(&index)
    }

    /// Current state of one decision.
    pub fn get(&self, id: &DecisionId) -> Result<Option<Decision>, CoreError> {
        let index = self.load_index_file()?;
        Ok(index.decisions.get(&id.to_string()).cloned())
    }

    /// All decisions, oldest first.
    pub fn list(&self) -> Result<Vec<Decision>, CoreError> {
        let index = self.load_index_file()?;
        let mut decisions: Vec<Decision> = index.decisions.into_values().collect();
        decisions.sort_by_key(|d| d.created_at);
        Ok(decisions)
    }

    /// Replay the event log into a fresh index, persist it, and return the
    /// decisions. Used when the index is missing or suspect.
    pub fn rebuild_index(&self) -> Result<Vec<Decision>, CoreError> {
        let mut decisions: BTreeMap<String, Decision> = BTreeMap::new();

        if self.events_path.exists() {
            let contents = std::fs::read_to_string(&self.events_path)
                .map_err(|e| io_err(&self.events_path, e))?;
            for (number, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let event: DecisionEvent = serde_json::from_str(line).map_err(|e| {
                    CoreError::LedgerFile {
                        path: self.events_path.clone(),
                        detail: format!("unparsable event on line {}: {e}", number + 1),
                    }
                })?;
                apply_event(&mut decisions, &event, &self.events_path, number + 1)?;
            }
        }

        let index = IndexFile {
            version: 1,
            updated_at: Some(Utc::now()),
            decisions: decisions.clone(),
        };
        self.save_index_file(&index)?;

        let mut list: Vec<Decision> = decisions.into_values().collect();
        list.sort_by_key(|d| d.created_at);
        Ok(list)
    }

    fn load_index_file(&self) -> Result<IndexFile, CoreError> {
        if !self.index_path.exists() {
            return Ok(IndexFile::default());
        }
        let contents =
            std::fs::read_to_string(&self.index_path).map_err(|e| io_err(&self.index_path, e))?;
        serde_json::from_str(&contents).map_err(|e| CoreError::LedgerFile {
            path: self.index_path.clone(),
            detail: format!("corrupt index: {e}"),
        })
    }

    fn save_index_file(&self, index: &IndexFile) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(index)?;
        let tmp = self.index_path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.index_path).map_err(|e| io_err(&self.index_path, e))?;
        Ok(())
    }
}

/// Fold one event into the replayed decision map.
fn apply_event(
    decisions: &mut BTreeMap<String, Decision>,
    event: &DecisionEvent,
    path: &Path,
    line: usize,
) -> Result<(), CoreError> {
    let key = event.decision_id.to_string();
    match &event.kind {
        DecisionEventKind::Proposed { decision } => {
            decisions.insert(key, decision.clone());
            Ok(())
        }
        kind => {
            let Some(decision) = decisions.get_mut(&key) else {
                return Err(CoreError::LedgerFile {
                    path: path.to_path_buf(),
                    detail: format!(
                        "line {line}: event for unknown decision {}",
                        event.decision_id
                    ),
                });
            };
            match kind {
                DecisionEventKind::Proposed { .. } => unreachable!("handled above"),
                DecisionEventKind::Approved {
                    approved_by,
                    comment: _,
                } => {
                    decision.status = DecisionStatus::Approved;
                    decision.approved_by = Some(approved_by.clone());
                    decision.approved_at = Some(event.recorded_at);
                }
                DecisionEventKind::Rejected => {
                    decision.status = DecisionStatus::Rejected;
                }
                DecisionEventKind::Applied {
                    rollback_point,
                    commit_seq,
                    ..
                } => {
                    decision.status = DecisionStatus::Applied;
                    decision.applied_at = Some(event.recorded_at);
                    decision.rollback_point = Some(rollback_point.clone());
                    decision.applied_commit_seq = *commit_seq;
                }
                DecisionEventKind::RolledBack { reason } => {
                    decision.status = DecisionStatus::RolledBack;
                    decision.reason = Some(reason.clone());
                }
            }
            Ok(())
        }
    }
}

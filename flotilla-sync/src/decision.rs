//! Decision lifecycle coordinator.
//!
//! `propose → approve | reject → apply → rollback`, with every transition
//! written to the decision ledger first and mirrored into the commit log
//! as a `decision` entry. Apply captures a rollback point before touching
//! any file and reports per-file results, so partial success is explicit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use semver::Version;
use serde::Serialize;
use similar::TextDiff;

use flotilla_core::baseline;
use flotilla_core::ledger::{DecisionEvent, DecisionEventKind, DecisionLedger};
use flotilla_core::paths;
use flotilla_core::types::{
    Decision, DecisionId, DecisionParameters, DecisionStatus, DecisionTarget, MachineId,
    RollbackPoint,
};
use flotilla_log::{CommitData, CommitEntry, CommitLog, EntryApplier, EntryDraft};

use crate::error::{io_err, SyncError};
use crate::fsops;

/// Options for [`DecisionCoordinator::apply`].
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Requested baseline version; `None` means `latest` (no gate).
    pub version: Option<String>,
    /// Restrict the apply to these relative paths.
    pub targets: Option<Vec<String>>,
    /// Persist the rollback point to `<shared>/backups/rollback/` in
    /// addition to the ledger record.
    pub backup: bool,
    /// Simulate: no filesystem mutation, no recorded transition.
    pub dry_run: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            version: None,
            targets: None,
            backup: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileApplyError {
    pub path: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilePreview {
    pub path: String,
    pub unified_diff: String,
}

/// Result of an apply. `files_applied` and `errors` together distinguish
/// full, partial, and total failure.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub decision_id: DecisionId,
    pub dry_run: bool,
    pub files_applied: Vec<String>,
    pub errors: Vec<FileApplyError>,
    /// Unified diffs of what apply would change; populated on dry runs.
    pub previews: Vec<FilePreview>,
    pub rollback_point_path: Option<PathBuf>,
    pub commit_seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub decision_id: DecisionId,
    pub files_restored: Vec<String>,
    pub reason: String,
    pub commit_seq: Option<u64>,
}

/// Applier for transition entries whose effect (the ledger write) already
/// happened by the time the entry is recorded.
struct RecordOnly;

impl EntryApplier for RecordOnly {
    fn apply(&self, _entry: &CommitEntry) -> Result<(), String> {
        Ok(())
    }
}

pub struct DecisionCoordinator {
    shared: PathBuf,
    config_root: PathBuf,
    machine_id: MachineId,
    ledger: DecisionLedger,
    log: Arc<CommitLog>,
}

impl DecisionCoordinator {
    pub fn new(
        shared: &Path,
        config_root: &Path,
        machine_id: MachineId,
        log: Arc<CommitLog>,
    ) -> Self {
        Self {
            shared: shared.to_path_buf(),
            config_root: config_root.to_path_buf(),
            machine_id,
            ledger: DecisionLedger::open_at(shared),
            log,
        }
    }

    /// Create a new pending decision.
    pub fn propose(
        &self,
        target: DecisionTarget,
        parameters: DecisionParameters,
    ) -> Result<Decision, SyncError> {
        let decision = Decision::propose(self.machine_id.clone(), target, parameters);
        self.ledger.record(
            &DecisionEvent {
                decision_id: decision.id,
                recorded_at: Utc::now(),
                kind: DecisionEventKind::Proposed {
                    decision: decision.clone(),
                },
            },
            &decision,
        )?;
        self.record_transition(&decision, None, "proposed")?;
        tracing::info!(decision = %decision.id, "decision proposed");
        Ok(decision)
    }

    /// Approve a pending decision.
    pub fn approve(
        &self,
        id: &DecisionId,
        approved_by: &str,
        comment: Option<String>,
    ) -> Result<Decision, SyncError> {
        let mut decision = self.load(id)?;
        if decision.status != DecisionStatus::Pending {
            return Err(SyncError::DecisionAlreadyProcessed {
                id: *id,
                status: decision.status,
            });
        }

        let from = decision.status;
        decision.status = DecisionStatus::Approved;
        decision.approved_by = Some(approved_by.to_string());
        decision.approved_at = Some(Utc::now());

        self.ledger.record(
            &DecisionEvent {
                decision_id: *id,
                recorded_at: Utc::now(),
                kind: DecisionEventKind::Approved {
                    approved_by: approved_by.to_string(),
                    comment,
                },
            },
            &decision,
        )?;
        self.record_transition(&decision, Some(from), "approved")?;
        Ok(decision)
    }

    /// Reject a pending decision (terminal).
    pub fn reject(&self, id: &DecisionId) -> Result<Decision, SyncError> {
        let mut decision = self.load(id)?;
        if decision.status != DecisionStatus::Pending {
            return Err(SyncError::DecisionAlreadyProcessed {
                id: *id,
                status: decision.status,
            });
        }

        let from = decision.status;
        decision.status = DecisionStatus::Rejected;
        self.ledger.record(
            &DecisionEvent {
                decision_id: *id,
                recorded_at: Utc::now(),
                kind: DecisionEventKind::Rejected,
            },
            &decision,
        )?;
        self.record_transition(&decision, Some(from), "rejected")?;
        Ok(decision)
    }

    /// Apply an approved decision's changes under the config root.
    ///
    /// The rollback point is captured before any mutation. Per-file write
    /// failures do not abort the rest; a total failure leaves the decision
    /// approved so the apply can be retried.
    pub fn apply(&self, id: &DecisionId, opts: &ApplyOptions) -> Result<ApplyReport, SyncError> {
        let mut decision = self.load(id)?;
        match decision.status {
            DecisionStatus::Approved => {}
            DecisionStatus::Pending => {
                return Err(SyncError::DecisionNotApproved {
                    id: *id,
                    status: decision.status,
                });
            }
            status => {
                return Err(SyncError::DecisionAlreadyProcessed { id: *id, status });
            }
        }

        self.check_version_gate(opts.version.as_deref())?;
        if decision.target.machine_id.is_none() {
            return Err(SyncError::NoTargetMachine { id: *id });
        }

        let (changes, mut errors) = self.select_changes(&decision, opts.targets.as_deref());

        if opts.dry_run {
            let mut previews = Vec::new();
            for (path, content) in &changes {
                let local = self.config_root.join(path);
                let existing = fsops::read_text_opt(&local)?.unwrap_or_default();
                let desired = content.replace("\r\n", "\n");
                if existing == desired {
                    continue;
                }
                let unified = TextDiff::from_lines(&existing, &desired)
                    .unified_diff()
                    .header(&format!("a/{path}"), &format!("b/{path}"))
                    .context_radius(3)
                    .to_string();
                previews.push(FilePreview {
                    path: path.clone(),
                    unified_diff: unified,
                });
            }
            return Ok(ApplyReport {
                decision_id: *id,
                dry_run: true,
                files_applied: Vec::new(),
                errors,
                previews,
                rollback_point_path: None,
                commit_seq: None,
            });
        }

        // Capture the rollback point before the first mutation.
        let mut captured = BTreeMap::new();
        for path in changes.keys() {
            let local = self.config_root.join(path);
            captured.insert(path.clone(), fsops::read_text_opt(&local)?);
        }
        let rollback_point = RollbackPoint {
            decision_id: *id,
            captured_at: Utc::now(),
            files: captured,
        };

        let rollback_point_path = if opts.backup {
            Some(self.persist_rollback_point(&rollback_point)?)
        } else {
            None
        };

        let mut files_applied = Vec::new();
        for (path, content) in &changes {
            let local = self.config_root.join(path);
            match fsops::atomic_write_text(&local, content) {
                Ok(()) => files_applied.push(path.clone()),
                Err(err) => errors.push(FileApplyError {
                    path: path.clone(),
                    detail: err.to_string(),
                }),
            }
        }

        if files_applied.is_empty() && !errors.is_empty() {
            tracing::warn!(
                decision = %id,
                errors = errors.len(),
                "apply wrote nothing; decision stays approved for retry",
            );
            return Ok(ApplyReport {
                decision_id: *id,
                dry_run: false,
                files_applied,
                errors,
                previews: Vec::new(),
                rollback_point_path,
                commit_seq: None,
            });
        }

        let from = decision.status;
        decision.status = DecisionStatus::Applied;
        decision.applied_at = Some(Utc::now());
        decision.rollback_point = Some(rollback_point.clone());

        let commit_seq = self.record_transition(&decision, Some(from), "applied")?;
        decision.applied_commit_seq = Some(commit_seq);

        self.ledger.record(
            &DecisionEvent {
                decision_id: *id,
                recorded_at: Utc::now(),
                kind: DecisionEventKind::Applied {
                    rollback_point,
                    files_applied: files_applied.clone(),
                    errors: errors.iter().map(|e| e.detail.clone()).collect(),
                    commit_seq: Some(commit_seq),
                },
            },
            &decision,
        )?;

        tracing::info!(
            decision = %id,
            files = files_applied.len(),
            errors = errors.len(),
            "decision applied",
        );
        Ok(ApplyReport {
            decision_id: *id,
            dry_run: false,
            files_applied,
            errors,
            previews: Vec::new(),
            rollback_point_path,
            commit_seq: Some(commit_seq),
        })
    }

    /// Restore files from the rollback point and retire the decision.
    pub fn rollback(&self, id: &DecisionId, reason: &str) -> Result<RollbackReport, SyncError> {
        let mut decision = self.load(id)?;
        if decision.status != DecisionStatus::Applied {
            return Err(SyncError::DecisionNotApplied {
                id: *id,
                status: decision.status,
            });
        }
        let Some(rollback_point) = decision.rollback_point.clone() else {
            return Err(SyncError::RollbackFailed {
                id: *id,
                detail: "no rollback point captured".into(),
            });
        };

        let mut files_restored = Vec::new();
        let mut failures = Vec::new();
        for (path, content) in &rollback_point.files {
            let local = self.config_root.join(path);
            let result = match content {
                Some(content) => fsops::atomic_write_text(&local, content),
                None => fsops::remove_if_exists(&local),
            };
            match result {
                Ok(()) => files_restored.push(path.clone()),
                Err(err) => failures.push(format!("{path}: {err}")),
            }
        }
        if !failures.is_empty() {
            return Err(SyncError::RollbackFailed {
                id: *id,
                detail: failures.join("; "),
            });
        }

        // The apply entry itself is the one that gets rolled back.
        if let Some(seq) = decision.applied_commit_seq {
            if let Err(err) = self.log.mark_rolled_back(seq) {
                tracing::warn!(decision = %id, error = %err, "could not mark apply entry rolled back");
            }
        }

        let from = decision.status;
        decision.status = DecisionStatus::RolledBack;
        decision.reason = Some(reason.to_string());

        self.ledger.record(
            &DecisionEvent {
                decision_id: *id,
                recorded_at: Utc::now(),
                kind: DecisionEventKind::RolledBack {
                    reason: reason.to_string(),
                },
            },
            &decision,
        )?;
        let commit_seq = self.record_transition(&decision, Some(from), "rolled back")?;

        tracing::info!(decision = %id, reason, "decision rolled back");
        Ok(RollbackReport {
            decision_id: *id,
            files_restored,
            reason: reason.to_string(),
            commit_seq: Some(commit_seq),
        })
    }

    pub fn get(&self, id: &DecisionId) -> Result<Decision, SyncError> {
        self.load(id)
    }

    pub fn list(&self) -> Result<Vec<Decision>, SyncError> {
        Ok(self.ledger.list()?)
    }

    // -- internals ---------------------------------------------------------

    fn load(&self, id: &DecisionId) -> Result<Decision, SyncError> {
        self.ledger
            .get(id)?
            .ok_or(SyncError::DecisionNotFound { id: *id })
    }

    /// Only the major component must match; `latest` always passes.
    fn check_version_gate(&self, requested: Option<&str>) -> Result<(), SyncError> {
        let requested = match requested {
            None => return Ok(()),
            Some("latest") => return Ok(()),
            Some(requested) => requested,
        };
        let baseline = baseline::load_at(&self.shared)?;
        let version = Version::parse(requested.trim_start_matches('v')).map_err(|_| {
            SyncError::VersionMismatch {
                requested: requested.to_string(),
                baseline: baseline.version.to_string(),
            }
        })?;
        if version.major != baseline.version.major {
            return Err(SyncError::VersionMismatch {
                requested: requested.to_string(),
                baseline: baseline.version.to_string(),
            });
        }
        Ok(())
    }

    fn select_changes(
        &self,
        decision: &Decision,
        targets: Option<&[String]>,
    ) -> (BTreeMap<String, String>, Vec<FileApplyError>) {
        let mut errors = Vec::new();
        let changes = match targets {
            None => decision.parameters.changes.clone(),
            Some(targets) => {
                let mut selected = BTreeMap::new();
                for target in targets {
                    match decision.parameters.changes.get(target) {
                        Some(content) => {
                            selected.insert(target.clone(), content.clone());
                        }
                        None => errors.push(FileApplyError {
                            path: target.clone(),
                            detail: "not part of this decision".into(),
                        }),
                    }
                }
                selected
            }
        };
        (changes, errors)
    }

    fn persist_rollback_point(&self, point: &RollbackPoint) -> Result<PathBuf, SyncError> {
        let dir = paths::rollback_dir(&self.shared);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = paths::rollback_path(&self.shared, &point.decision_id);
        let json = serde_json::to_string_pretty(point)?;
        fsops::atomic_write_text(&path, &json)?;
        Ok(path)
    }

    /// Append a `decision` commit entry for a transition and mark it
    /// applied (the ledger write is the effect).
    fn record_transition(
        &self,
        decision: &Decision,
        from: Option<DecisionStatus>,
        summary: &str,
    ) -> Result<u64, SyncError> {
        let draft = EntryDraft::new(
            self.machine_id.clone(),
            CommitData::Decision {
                decision_id: decision.id,
                from,
                to: decision.status,
                summary: summary.to_string(),
            },
        );
        let seq = self.log.append(&draft)?;
        self.log.apply_entry(seq, &RecordOnly)?;
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_log::LogConfig;
    use tempfile::TempDir;

    fn coordinator(shared: &Path, config_root: &Path) -> DecisionCoordinator {
        let log = Arc::new(
            CommitLog::open_at(shared, MachineId::from("anchor-01"), LogConfig::default())
                .expect("open log"),
        );
        DecisionCoordinator::new(shared, config_root, MachineId::from("anchor-01"), log)
    }

    fn change_decision(coord: &DecisionCoordinator, path: &str, content: &str) -> Decision {
        coord
            .propose(
                DecisionTarget {
                    machine_id: Some(MachineId::from("anchor-01")),
                    config_path: None,
                    baseline_id: None,
                },
                DecisionParameters {
                    changes: BTreeMap::from([(path.to_string(), content.to_string())]),
                    note: None,
                },
            )
            .expect("propose")
    }

    #[test]
    fn approve_requires_pending() {
        let shared = TempDir::new().expect("shared");
        let root = TempDir::new().expect("root");
        let coord = coordinator(shared.path(), root.path());
        let decision = change_decision(&coord, "app.conf", "retries=3\n");

        coord
            .approve(&decision.id, "operator", None)
            .expect("approve");
        let err = coord.approve(&decision.id, "operator", None).unwrap_err();
        assert_eq!(err.code(), "DECISION_ALREADY_PROCESSED");
    }

    #[test]
    fn reject_is_terminal() {
        let shared = TempDir::new().expect("shared");
        let root = TempDir::new().expect("root");
        let coord = coordinator(shared.path(), root.path());
        let decision = change_decision(&coord, "app.conf", "retries=3\n");

        coord.reject(&decision.id).expect("reject");
        let err = coord.approve(&decision.id, "operator", None).unwrap_err();
        assert_eq!(err.code(), "DECISION_ALREADY_PROCESSED");
    }

    #[test]
    fn rollback_requires_applied() {
        let shared = TempDir::new().expect("shared");
        let root = TempDir::new().expect("root");
        let coord = coordinator(shared.path(), root.path());
        let decision = change_decision(&coord, "app.conf", "retries=3\n");

        let err = coord.rollback(&decision.id, "nope").unwrap_err();
        assert_eq!(err.code(), "DECISION_NOT_APPLIED");
    }

    #[test]
    fn unknown_decision_is_not_found() {
        let shared = TempDir::new().expect("shared");
        let root = TempDir::new().expect("root");
        let coord = coordinator(shared.path(), root.path());
        let err = coord.get(&DecisionId::new()).unwrap_err();
        assert_eq!(err.code(), "DECISION_NOT_FOUND");
    }
}

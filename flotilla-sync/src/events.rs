//! Sync event handler — the reactions to liveness transitions.
//!
//! Offline: verify the record really is offline, back up the baseline,
//! write an audit entry. Online: compute the offline duration, reconcile
//! the machine's sync targets from the baseline, write an audit entry.
//!
//! Reconcile policy: drift that happened while the machine was offline is
//! restored outright; files the machine itself modified while offline are
//! restored too (the baseline wins), but the displaced local content is
//! preserved in an auto-proposed pending decision so nothing is lost
//! silently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use flotilla_core::baseline;
use flotilla_core::heartbeat as store;
use flotilla_core::types::{
    DecisionParameters, DecisionTarget, HeartbeatStatus, MachineId,
};
use flotilla_core::CoreError;
use flotilla_log::{CommitData, CommitEntry, CommitLog, EntryApplier, EntryDraft};

use crate::decision::DecisionCoordinator;
use crate::error::SyncError;
use crate::fsops;

#[derive(Debug, Clone)]
pub struct SyncEventOptions {
    pub create_backup: bool,
    pub dry_run: bool,
}

impl Default for SyncEventOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OfflineReport {
    pub machine_id: MachineId,
    pub backup_path: Option<PathBuf>,
    pub commit_seq: Option<u64>,
    pub simulated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnlineReport {
    pub machine_id: MachineId,
    pub offline_duration_secs: i64,
    pub files_synced: usize,
    pub conflicts_resolved: usize,
    pub decisions_created: usize,
    pub commit_seq: Option<u64>,
    pub simulated: bool,
}

struct RecordOnly;

impl EntryApplier for RecordOnly {
    fn apply(&self, _entry: &CommitEntry) -> Result<(), String> {
        Ok(())
    }
}

pub struct SyncEventHandler {
    shared: PathBuf,
    config_root: PathBuf,
    machine_id: MachineId,
    log: Arc<CommitLog>,
    coordinator: Arc<DecisionCoordinator>,
}

impl SyncEventHandler {
    pub fn new(
        shared: &Path,
        config_root: &Path,
        machine_id: MachineId,
        log: Arc<CommitLog>,
        coordinator: Arc<DecisionCoordinator>,
    ) -> Self {
        Self {
            shared: shared.to_path_buf(),
            config_root: config_root.to_path_buf(),
            machine_id,
            log,
            coordinator,
        }
    }

    /// React to `machine` going offline.
    pub fn handle_offline(
        &self,
        machine: &MachineId,
        opts: &SyncEventOptions,
    ) -> Result<OfflineReport, SyncError> {
        let record = store::load_record_at(&self.shared, machine)?;
        let Some(record) = record else {
            return Err(SyncError::MachineNotOffline {
                machine_id: machine.clone(),
            });
        };
        if record.status != HeartbeatStatus::Offline {
            return Err(SyncError::MachineNotOffline {
                machine_id: machine.clone(),
            });
        }

        if opts.dry_run {
            return Ok(OfflineReport {
                machine_id: machine.clone(),
                backup_path: None,
                commit_seq: None,
                simulated: true,
            });
        }

        let backup_path = if opts.create_backup && baseline::exists_at(&self.shared) {
            Some(baseline::backup_at(&self.shared)?)
        } else {
            None
        };

        let seq = self.record_event(
            "sync_offline",
            serde_json::json!({
                "machine_id": machine.0,
                "offline_since": record.offline_since,
                "backup": backup_path.as_ref().map(|p| p.display().to_string()),
            }),
        )?;
        tracing::info!(machine = %machine, backup = backup_path.is_some(), "offline sync event recorded");

        Ok(OfflineReport {
            machine_id: machine.clone(),
            backup_path,
            commit_seq: Some(seq),
            simulated: false,
        })
    }

    /// React to `machine` coming back online.
    pub fn handle_online(
        &self,
        machine: &MachineId,
        opts: &SyncEventOptions,
    ) -> Result<OnlineReport, SyncError> {
        let record = store::load_record_at(&self.shared, machine)?;
        let Some(mut record) = record else {
            return Err(SyncError::MachineNotOnline {
                machine_id: machine.clone(),
            });
        };
        if record.status != HeartbeatStatus::Online {
            return Err(SyncError::MachineNotOnline {
                machine_id: machine.clone(),
            });
        }

        let now = Utc::now();
        let offline_since = record.offline_since;
        let offline_duration_secs = offline_since
            .map(|since| now.signed_duration_since(since).num_seconds().max(0))
            .unwrap_or(0);

        if opts.dry_run {
            return Ok(OnlineReport {
                machine_id: machine.clone(),
                offline_duration_secs,
                files_synced: 0,
                conflicts_resolved: 0,
                decisions_created: 0,
                commit_seq: None,
                simulated: true,
            });
        }

        let (files_synced, conflicts_resolved, decisions_created) =
            self.reconcile(machine, offline_since)?;

        // The duration has been consumed; the next offline spell starts
        // fresh.
        record.offline_since = None;
        record.touch(now);
        store::save_record_at(&self.shared, &record)?;

        let seq = self.record_event(
            "sync_online",
            serde_json::json!({
                "machine_id": machine.0,
                "offline_duration_secs": offline_duration_secs,
                "files_synced": files_synced,
                "conflicts_resolved": conflicts_resolved,
                "decisions_created": decisions_created,
            }),
        )?;
        tracing::info!(
            machine = %machine,
            offline_duration_secs,
            files_synced,
            conflicts_resolved,
            "online sync event recorded",
        );

        Ok(OnlineReport {
            machine_id: machine.clone(),
            offline_duration_secs,
            files_synced,
            conflicts_resolved,
            decisions_created,
            commit_seq: Some(seq),
            simulated: false,
        })
    }

    /// Bring the machine's sync targets back in line with the baseline.
    fn reconcile(
        &self,
        machine: &MachineId,
        offline_since: Option<DateTime<Utc>>,
    ) -> Result<(usize, usize, usize), SyncError> {
        let baseline = match baseline::load_at(&self.shared) {
            Ok(baseline) => baseline,
            Err(CoreError::BaselineNotFound { .. }) => return Ok((0, 0, 0)),
            Err(err) => return Err(err.into()),
        };

        let mut files_synced = 0;
        let mut conflicts_resolved = 0;
        let mut decisions_created = 0;

        for target in baseline.targets_for(machine) {
            let local = self.config_root.join(&target.path);
            let current = fsops::read_text_opt(&local)?;
            let desired = target.content.replace("\r\n", "\n");
            if current.as_deref() == Some(desired.as_str()) {
                continue;
            }

            if self.modified_while_offline(&local, offline_since) {
                // Baseline wins, but the displaced content is preserved
                // for review instead of silently discarded.
                let displaced = current.clone().unwrap_or_default();
                self.coordinator.propose(
                    DecisionTarget {
                        machine_id: Some(machine.clone()),
                        config_path: Some(PathBuf::from(&target.path)),
                        baseline_id: None,
                    },
                    DecisionParameters {
                        changes: std::collections::BTreeMap::from([(
                            target.path.clone(),
                            displaced,
                        )]),
                        note: Some(format!(
                            "content displaced from {} while reconciling after offline spell",
                            target.path
                        )),
                    },
                )?;
                decisions_created += 1;
                conflicts_resolved += 1;
            } else {
                files_synced += 1;
            }

            fsops::atomic_write_text(&local, &desired)?;
        }

        Ok((files_synced, conflicts_resolved, decisions_created))
    }

    /// A file counts as locally modified when its mtime falls inside the
    /// offline window.
    fn modified_while_offline(
        &self,
        path: &Path,
        offline_since: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(since) = offline_since else {
            return false;
        };
        let Ok(metadata) = std::fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        DateTime::<Utc>::from(modified) > since
    }

    fn record_event(&self, event: &str, details: serde_json::Value) -> Result<u64, SyncError> {
        let draft = EntryDraft::new(
            self.machine_id.clone(),
            CommitData::System {
                event: event.to_string(),
                details,
            },
        );
        let seq = self.log.append(&draft)?;
        self.log.apply_entry(seq, &RecordOnly)?;
        Ok(seq)
    }
}

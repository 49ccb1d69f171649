//! Heartbeat liveness tracker.
//!
//! State machine per machine, driven by heartbeat age:
//!
//! ```text
//! ONLINE --(missed ≥ warn_threshold)--> WARNING
//! WARNING --(age ≥ offline_timeout)--> OFFLINE
//! OFFLINE --(heartbeat received)--> ONLINE
//! ```
//!
//! Reporting is edge-triggered: each record carries the last status a check
//! cycle reported; only machines whose status changed since then appear in
//! the delta, so steady-state machines are never re-reported.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use flotilla_core::config::HeartbeatSettings;
use flotilla_core::heartbeat as store;
use flotilla_core::types::{HeartbeatRecord, HeartbeatStatus, MachineId};

use crate::error::SyncError;

/// Transitions observed by one check cycle. Machines whose state did not
/// change since the last report are absent.
#[derive(Debug, Clone)]
pub struct HeartbeatDelta {
    pub newly_offline: Vec<MachineId>,
    pub newly_online: Vec<MachineId>,
    pub warning: Vec<MachineId>,
    pub checked_at: DateTime<Utc>,
}

impl HeartbeatDelta {
    pub fn is_empty(&self) -> bool {
        self.newly_offline.is_empty() && self.newly_online.is_empty() && self.warning.is_empty()
    }
}

/// Per-shared-root liveness tracker.
pub struct HeartbeatTracker {
    shared: PathBuf,
    settings: HeartbeatSettings,
    /// Single-flight guard: a check cycle in progress must never be
    /// re-entered by a concurrent timer tick.
    check_guard: Mutex<()>,
}

impl HeartbeatTracker {
    pub fn new(shared: &Path, settings: HeartbeatSettings) -> Self {
        Self {
            shared: shared.to_path_buf(),
            settings,
            check_guard: Mutex::new(()),
        }
    }

    /// Record a heartbeat for `machine` and return its prior status.
    ///
    /// Creates the record on first sight. Resets `missed_heartbeats` and
    /// restores `online`; a prior `offline` makes this call the
    /// online-transition point. `offline_since` is deliberately left in
    /// place — the online sync event consumes it for the offline duration
    /// and clears it.
    pub fn register_heartbeat(
        &self,
        machine: &MachineId,
        attributes: Option<Vec<(String, String)>>,
    ) -> Result<HeartbeatStatus, SyncError> {
        let now = Utc::now();
        let mut record = store::load_record_at(&self.shared, machine)?
            .unwrap_or_else(|| HeartbeatRecord::new(machine.clone(), now));
        let prior = record.status;

        record.last_heartbeat = now;
        record.missed_heartbeats = 0;
        record.status = HeartbeatStatus::Online;
        if let Some(attributes) = attributes {
            record.attributes.extend(attributes);
        }
        record.touch(now);
        store::save_record_at(&self.shared, &record)?;

        if prior == HeartbeatStatus::Offline {
            tracing::info!(machine = %machine, "machine back online");
        }
        Ok(prior)
    }

    /// Evaluate every tracked machine against the current time and report
    /// transitions.
    ///
    /// Returns `Ok(None)` when a check cycle is already running and
    /// `force` is false — the tick is skipped as a logged no-op. With
    /// `force`, the call waits for the running cycle instead.
    pub async fn check_heartbeats(&self, force: bool) -> Result<Option<HeartbeatDelta>, SyncError> {
        let _guard = if force {
            self.check_guard.lock().await
        } else {
            match self.check_guard.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!("heartbeat check already in progress; tick skipped");
                    return Ok(None);
                }
            }
        };

        let now = Utc::now();
        let records = store::list_records_at(&self.shared).map_err(|e| {
            SyncError::HeartbeatCheckFailed {
                detail: e.to_string(),
            }
        })?;

        let mut delta = HeartbeatDelta {
            newly_offline: Vec::new(),
            newly_online: Vec::new(),
            warning: Vec::new(),
            checked_at: now,
        };

        for mut record in records {
            let before = record.clone();
            self.evaluate(&mut record, now);

            if record.status != record.last_reported_status {
                match record.status {
                    HeartbeatStatus::Offline => {
                        delta.newly_offline.push(record.machine_id.clone())
                    }
                    HeartbeatStatus::Online => delta.newly_online.push(record.machine_id.clone()),
                    HeartbeatStatus::Warning => delta.warning.push(record.machine_id.clone()),
                }
                record.last_reported_status = record.status;
            }

            if record != before {
                record.touch(now);
                store::save_record_at(&self.shared, &record).map_err(|e| {
                    SyncError::HeartbeatCheckFailed {
                        detail: e.to_string(),
                    }
                })?;
            }
        }

        if !delta.is_empty() {
            tracing::info!(
                offline = delta.newly_offline.len(),
                online = delta.newly_online.len(),
                warning = delta.warning.len(),
                "heartbeat transitions detected",
            );
        }
        Ok(Some(delta))
    }

    /// Advance one record's state machine. Only `register_heartbeat` moves
    /// a machine back to `online`; a check can only degrade.
    fn evaluate(&self, record: &mut HeartbeatRecord, now: DateTime<Utc>) {
        let age = now.signed_duration_since(record.last_heartbeat);
        let interval = self.settings.interval_secs.max(1) as i64;
        record.missed_heartbeats = (age.num_seconds().max(0) / interval) as u32;

        let offline_after = ChronoDuration::seconds(self.settings.offline_timeout_secs as i64);
        if age >= offline_after {
            if record.status != HeartbeatStatus::Offline {
                record.status = HeartbeatStatus::Offline;
            }
            if record.offline_since.is_none() {
                record.offline_since = Some(now);
            }
        } else if record.status == HeartbeatStatus::Online
            && record.missed_heartbeats >= self.settings.warn_threshold
        {
            record.status = HeartbeatStatus::Warning;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> HeartbeatSettings {
        HeartbeatSettings {
            interval_secs: 10,
            warn_threshold: 3,
            offline_timeout_secs: 120,
        }
    }

    fn seed_record(shared: &Path, machine: &str, age_secs: i64) {
        let now = Utc::now();
        let mut record = HeartbeatRecord::new(MachineId::from(machine), now);
        record.last_heartbeat = now - ChronoDuration::seconds(age_secs);
        store::save_record_at(shared, &record).expect("seed record");
    }

    #[tokio::test]
    async fn register_creates_record_and_reports_prior_online() {
        let shared = TempDir::new().expect("tempdir");
        let tracker = HeartbeatTracker::new(shared.path(), settings());
        let prior = tracker
            .register_heartbeat(&MachineId::from("fresh"), None)
            .expect("register");
        assert_eq!(prior, HeartbeatStatus::Online);
    }

    #[tokio::test]
    async fn stale_machine_reported_offline_exactly_once() {
        let shared = TempDir::new().expect("tempdir");
        let tracker = HeartbeatTracker::new(shared.path(), settings());
        seed_record(shared.path(), "drifter", 500);

        let first = tracker
            .check_heartbeats(false)
            .await
            .expect("check")
            .expect("not skipped");
        assert_eq!(first.newly_offline, vec![MachineId::from("drifter")]);

        let second = tracker
            .check_heartbeats(false)
            .await
            .expect("check")
            .expect("not skipped");
        assert!(
            second.is_empty(),
            "steady-state offline must not be re-reported"
        );
    }

    #[tokio::test]
    async fn offline_since_is_set_once() {
        let shared = TempDir::new().expect("tempdir");
        let tracker = HeartbeatTracker::new(shared.path(), settings());
        seed_record(shared.path(), "drifter", 500);

        tracker.check_heartbeats(false).await.expect("check");
        let first = store::load_record_at(shared.path(), &MachineId::from("drifter"))
            .expect("load")
            .expect("present");
        let since = first.offline_since.expect("offline_since set");

        tracker.check_heartbeats(false).await.expect("check");
        let second = store::load_record_at(shared.path(), &MachineId::from("drifter"))
            .expect("load")
            .expect("present");
        assert_eq!(second.offline_since, Some(since), "must not move");
    }

    #[tokio::test]
    async fn missed_heartbeats_drive_warning_edge() {
        let shared = TempDir::new().expect("tempdir");
        let tracker = HeartbeatTracker::new(shared.path(), settings());
        // 35s old with a 10s interval = 3 missed beats, under the 120s
        // offline timeout.
        seed_record(shared.path(), "laggard", 35);

        let delta = tracker
            .check_heartbeats(false)
            .await
            .expect("check")
            .expect("not skipped");
        assert_eq!(delta.warning, vec![MachineId::from("laggard")]);
        assert!(delta.newly_offline.is_empty());

        let repeat = tracker
            .check_heartbeats(false)
            .await
            .expect("check")
            .expect("not skipped");
        assert!(repeat.is_empty(), "warning is edge-triggered too");
    }

    #[tokio::test]
    async fn heartbeat_after_offline_reports_online_on_next_check() {
        let shared = TempDir::new().expect("tempdir");
        let tracker = HeartbeatTracker::new(shared.path(), settings());
        let machine = MachineId::from("drifter");
        seed_record(shared.path(), "drifter", 500);

        tracker.check_heartbeats(false).await.expect("check");
        let prior = tracker
            .register_heartbeat(&machine, None)
            .expect("register");
        assert_eq!(prior, HeartbeatStatus::Offline);

        let record = store::load_record_at(shared.path(), &machine)
            .expect("load")
            .expect("present");
        assert_eq!(record.status, HeartbeatStatus::Online);
        assert!(
            record.offline_since.is_some(),
            "offline_since survives until the online sync event"
        );

        let delta = tracker
            .check_heartbeats(false)
            .await
            .expect("check")
            .expect("not skipped");
        assert_eq!(delta.newly_online, vec![machine]);
    }

    #[tokio::test]
    async fn overlapping_check_is_skipped_as_noop() {
        let shared = TempDir::new().expect("tempdir");
        let tracker = HeartbeatTracker::new(shared.path(), settings());

        let guard = tracker.check_guard.lock().await;
        let skipped = tracker.check_heartbeats(false).await.expect("check");
        assert!(skipped.is_none(), "concurrent tick must be a no-op");
        drop(guard);

        let ran = tracker.check_heartbeats(false).await.expect("check");
        assert!(ran.is_some());
    }
}

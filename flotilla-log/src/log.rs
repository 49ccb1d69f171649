//! The commit log: a single shared JSON document with locked, gapless
//! appends.
//!
//! ## Append protocol
//!
//! 1. Take the advisory lock on `commit-log.lock` (fresh descriptor per
//!    call, so it also serializes threads within one process).
//! 2. Reload the document from disk — another machine may have appended.
//! 3. If the candidate sequence number is already taken, log a `CONFLICT`
//!    and take the next free number instead.
//! 4. Hash the payload, chain it to the predecessor, persist via
//!    `.tmp` + rename, release the lock.
//!
//! Reads always go to disk; the only in-memory state is the last known
//! head, used to detect candidate staleness and on-disk regressions.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use flotilla_core::config::CommitSettings;
use flotilla_core::paths;
use flotilla_core::types::MachineId;

use crate::entry::{
    chain_hash, CommitEntry, CommitStatus, CommitType, EntryDraft, EntryMetadata, CHAIN_SEED,
};
use crate::error::{io_err, LogError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Retry policy for appends and entry application.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base delay between apply retries; doubled after each failure.
    pub retry_delay: Duration,
    /// Apply attempts before an entry is marked `failed`.
    pub max_retry_attempts: u32,
    /// Attempts at persisting an append before giving up.
    pub max_append_attempts: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(250),
            max_retry_attempts: 5,
            max_append_attempts: 5,
        }
    }
}

impl From<&CommitSettings> for LogConfig {
    fn from(settings: &CommitSettings) -> Self {
        Self {
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            max_retry_attempts: settings.max_retry_attempts,
            max_append_attempts: settings.max_append_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogStatistics {
    pub total_entries: u64,
    #[serde(default)]
    pub by_status: BTreeMap<String, u64>,
    #[serde(default)]
    pub by_type: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_appended_at: Option<DateTime<Utc>>,
    /// Sequence races observed and resolved by renumbering.
    #[serde(default)]
    pub sequence_conflicts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogMetadata {
    version: u32,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    machine_id: MachineId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogDocument {
    current_sequence_number: u64,
    entries: Vec<CommitEntry>,
    entries_by_status: BTreeMap<String, Vec<u64>>,
    statistics: LogStatistics,
    metadata: LogMetadata,
}

impl LogDocument {
    fn new(machine_id: MachineId) -> Self {
        let now = Utc::now();
        Self {
            current_sequence_number: 0,
            entries: Vec::new(),
            entries_by_status: BTreeMap::new(),
            statistics: LogStatistics::default(),
            metadata: LogMetadata {
                version: 1,
                created_at: now,
                last_updated: now,
                machine_id,
            },
        }
    }

    /// Recompute every derived field from `entries`.
    fn reindex(&mut self) {
        let mut by_status: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        let mut status_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut type_counts: BTreeMap<String, u64> = BTreeMap::new();
        for entry in &self.entries {
            by_status
                .entry(entry.status.to_string())
                .or_default()
                .push(entry.sequence_number);
            *status_counts.entry(entry.status.to_string()).or_default() += 1;
            *type_counts.entry(entry.entry_type.to_string()).or_default() += 1;
        }
        self.entries_by_status = by_status;
        self.statistics.total_entries = self.entries.len() as u64;
        self.statistics.by_status = status_counts;
        self.statistics.by_type = type_counts;
        self.metadata.last_updated = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Entry selection for [`CommitLog::get_entries`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub status: Option<CommitStatus>,
    pub entry_type: Option<CommitType>,
    pub machine_id: Option<MachineId>,
    /// Only entries with a sequence number strictly greater than this.
    pub since_sequence: Option<u64>,
}

impl EntryFilter {
    fn matches(&self, entry: &CommitEntry) -> bool {
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(entry_type) = self.entry_type {
            if entry.entry_type != entry_type {
                return false;
            }
        }
        if let Some(machine) = &self.machine_id {
            if &entry.machine_id != machine {
                return false;
            }
        }
        if let Some(since) = self.since_sequence {
            if entry.sequence_number <= since {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// One page of entries in sequence order.
#[derive(Debug, Clone)]
pub struct EntryPage {
    pub entries: Vec<CommitEntry>,
    pub total_count: usize,
    pub has_more: bool,
    pub next_sequence_number: u64,
}

// ---------------------------------------------------------------------------
// Consistency verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct InconsistentEntry {
    pub sequence_number: u64,
    pub severity: FaultSeverity,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    pub inconsistent_entries: Vec<InconsistentEntry>,
    pub recommendations: Vec<String>,
    pub statistics: LogStatistics,
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Port through which an entry's durable side effect is performed.
pub trait EntryApplier: Send + Sync {
    fn apply(&self, entry: &CommitEntry) -> Result<(), String>;
}

/// Outcome of [`CommitLog::apply_entry`]. A `success == false` outcome means
/// the retry budget is exhausted and the entry is now `failed`; it is a
/// value, not an `Err`, so callers always see what happened.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub sequence_number: u64,
    pub success: bool,
    pub already_applied: bool,
    pub attempts: u32,
    pub applied_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// CommitLog
// ---------------------------------------------------------------------------

pub struct CommitLog {
    path: PathBuf,
    lock_path: PathBuf,
    machine_id: MachineId,
    config: LogConfig,
    /// Last head this instance observed; only a staleness hint.
    head: Mutex<u64>,
}

impl CommitLog {
    /// Open (or lazily create) the commit log under `shared`.
    pub fn open_at(
        shared: &Path,
        machine_id: MachineId,
        config: LogConfig,
    ) -> Result<Self, LogError> {
        std::fs::create_dir_all(shared).map_err(|e| io_err(shared, e))?;
        let log = Self {
            path: paths::commit_log_path(shared),
            lock_path: paths::commit_log_lock_path(shared),
            machine_id,
            config,
            head: Mutex::new(0),
        };
        let doc = log.load_document()?;
        *log.head_guard() = doc.current_sequence_number;
        Ok(log)
    }

    /// Append an entry and return its assigned sequence number.
    pub fn append(&self, draft: &EntryDraft) -> Result<u64, LogError> {
        let mut last_err = None;
        for _attempt in 1..=self.config.max_append_attempts.max(1) {
            match self.append_once(draft) {
                Ok(seq) => return Ok(seq),
                Err(err @ LogError::Conflict { .. }) => return Err(err),
                Err(err) => {
                    tracing::warn!(error = %err, "append attempt failed; retrying");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(LogError::Conflict {
            attempts: self.config.max_append_attempts,
        }))
    }

    fn append_once(&self, draft: &EntryDraft) -> Result<u64, LogError> {
        let candidate = *self.head_guard() + 1;

        let seq = self.with_exclusive_lock(|| {
            let mut doc = self.load_document()?;

            // On-disk head regressed below what this instance already saw:
            // the shared log was truncated or replaced underneath us.
            if doc.current_sequence_number + 1 < candidate {
                return Err(LogError::Conflict { attempts: 1 });
            }

            let next = doc.current_sequence_number + 1;
            if next != candidate {
                tracing::warn!(
                    code = "CONFLICT",
                    candidate,
                    assigned = next,
                    "sequence number already taken; retrying with next free number",
                );
                doc.statistics.sequence_conflicts += 1;
            }

            let previous_chain = doc
                .entries
                .last()
                .map(|e| e.chain_hash.as_str())
                .unwrap_or(CHAIN_SEED);
            let hash = draft.data.content_hash()?;
            let entry = CommitEntry {
                sequence_number: next,
                entry_type: draft.data.commit_type(),
                machine_id: draft.machine_id.clone(),
                timestamp: Utc::now(),
                status: CommitStatus::Pending,
                chain_hash: chain_hash(previous_chain, &hash),
                hash,
                data: draft.data.clone(),
                signature: draft.signature.clone(),
                metadata: EntryMetadata {
                    parent_id: draft.parent_id.clone(),
                    ..EntryMetadata::default()
                },
            };

            doc.entries.push(entry);
            doc.current_sequence_number = next;
            doc.statistics.last_appended_at = Some(Utc::now());
            doc.reindex();
            self.persist(&doc)?;
            Ok(next)
        })?;

        *self.head_guard() = seq;
        Ok(seq)
    }

    /// Entries in sequence order, filtered and paginated.
    pub fn get_entries(
        &self,
        filter: &EntryFilter,
        page: &Pagination,
    ) -> Result<EntryPage, LogError> {
        let doc = self.load_document()?;
        let matching: Vec<&CommitEntry> =
            doc.entries.iter().filter(|e| filter.matches(e)).collect();
        let total_count = matching.len();

        let limit = if page.limit == 0 { usize::MAX } else { page.limit };
        let entries: Vec<CommitEntry> = matching
            .into_iter()
            .skip(page.offset)
            .take(limit)
            .cloned()
            .collect();
        let has_more = page.offset.saturating_add(entries.len()) < total_count;

        Ok(EntryPage {
            entries,
            total_count,
            has_more,
            next_sequence_number: doc.current_sequence_number + 1,
        })
    }

    /// Fetch one entry by sequence number.
    pub fn get_entry(&self, sequence_number: u64) -> Result<CommitEntry, LogError> {
        let doc = self.load_document()?;
        doc.entries
            .iter()
            .find(|e| e.sequence_number == sequence_number)
            .cloned()
            .ok_or(LogError::EntryNotFound { sequence_number })
    }

    /// Recompute every entry's hash and the chain, flag mismatches.
    pub fn verify_consistency(&self) -> Result<ConsistencyReport, LogError> {
        let doc = self.load_document()?;
        let mut faults = Vec::new();
        let mut recommendations = Vec::new();

        let mut previous_chain = CHAIN_SEED.to_string();
        let mut expected_seq = 1u64;
        for entry in &doc.entries {
            if !entry.hash_matches() {
                faults.push(InconsistentEntry {
                    sequence_number: entry.sequence_number,
                    severity: FaultSeverity::High,
                    reason: "stored hash does not match recomputed content hash".into(),
                });
                recommendations.push(format!(
                    "entry {} content is corrupt or tampered; restore it from a replica",
                    entry.sequence_number
                ));
            }
            let expected_chain = chain_hash(&previous_chain, &entry.hash);
            if entry.chain_hash != expected_chain {
                faults.push(InconsistentEntry {
                    sequence_number: entry.sequence_number,
                    severity: FaultSeverity::High,
                    reason: "chain hash broken; entries were reordered, removed, or rewritten"
                        .into(),
                });
            }
            if entry.sequence_number != expected_seq {
                faults.push(InconsistentEntry {
                    sequence_number: entry.sequence_number,
                    severity: FaultSeverity::High,
                    reason: format!(
                        "sequence gap: expected {expected_seq}, found {}",
                        entry.sequence_number
                    ),
                });
                expected_seq = entry.sequence_number;
            }
            // Chain from the stored value so one break is flagged once
            // instead of cascading over every successor.
            previous_chain = entry.chain_hash.clone();
            expected_seq += 1;

            if entry.status == CommitStatus::Pending {
                let age = Utc::now().signed_duration_since(entry.timestamp);
                if age.num_hours() >= 24 {
                    faults.push(InconsistentEntry {
                        sequence_number: entry.sequence_number,
                        severity: FaultSeverity::Low,
                        reason: format!("pending for {}h without an apply", age.num_hours()),
                    });
                    recommendations
                        .push(format!("re-run apply for entry {}", entry.sequence_number));
                }
            }
        }

        if doc.current_sequence_number != doc.entries.last().map(|e| e.sequence_number).unwrap_or(0)
        {
            faults.push(InconsistentEntry {
                sequence_number: doc.current_sequence_number,
                severity: FaultSeverity::Medium,
                reason: "head counter disagrees with the last entry".into(),
            });
        }

        let mut reindexed = doc.clone();
        reindexed.reindex();
        if reindexed.entries_by_status != doc.entries_by_status {
            faults.push(InconsistentEntry {
                sequence_number: 0,
                severity: FaultSeverity::Medium,
                reason: "status index is out of date".into(),
            });
            recommendations.push("reindex the log to rebuild derived fields".into());
        }

        Ok(ConsistencyReport {
            is_consistent: faults.is_empty(),
            inconsistent_entries: faults,
            recommendations,
            statistics: doc.statistics,
        })
    }

    /// Apply a pending (or previously failed) entry through `applier`.
    ///
    /// Idempotent: an already-applied entry returns success immediately
    /// with its original `applied_at` and no applier invocation. Failures
    /// retry with `retry_delay × 2^retry_count` until the attempt budget is
    /// exhausted, after which the entry is marked `failed` with
    /// `last_error` recorded.
    pub fn apply_entry(
        &self,
        sequence_number: u64,
        applier: &dyn EntryApplier,
    ) -> Result<ApplyOutcome, LogError> {
        let entry = self.get_entry(sequence_number)?;

        match entry.status {
            CommitStatus::Applied => {
                return Ok(ApplyOutcome {
                    sequence_number,
                    success: true,
                    already_applied: true,
                    attempts: 0,
                    applied_at: entry.metadata.applied_at,
                    error: None,
                });
            }
            CommitStatus::RolledBack => {
                return Err(LogError::InvalidTransition {
                    sequence_number,
                    from: CommitStatus::RolledBack,
                    to: CommitStatus::Applied,
                });
            }
            CommitStatus::Pending | CommitStatus::Failed => {}
        }

        let mut retry_count = entry.metadata.retry_count;
        let mut attempts = 0u32;
        let mut last_error = entry.metadata.last_error.clone();

        while retry_count < self.config.max_retry_attempts {
            attempts += 1;
            match applier.apply(&entry) {
                Ok(()) => {
                    let updated = self.update_entry(sequence_number, |e| {
                        e.status = CommitStatus::Applied;
                        e.metadata.applied_at = Some(Utc::now());
                        e.metadata.applied_by = Some(self.machine_id.clone());
                        e.metadata.retry_count = retry_count;
                        e.metadata.last_error = None;
                    })?;
                    return Ok(ApplyOutcome {
                        sequence_number,
                        success: true,
                        already_applied: false,
                        attempts,
                        applied_at: updated.metadata.applied_at,
                        error: None,
                    });
                }
                Err(message) => {
                    let delay = self
                        .config
                        .retry_delay
                        .saturating_mul(1u32 << retry_count.min(16));
                    retry_count += 1;
                    last_error = Some(message.clone());
                    self.update_entry(sequence_number, |e| {
                        e.metadata.retry_count = retry_count;
                        e.metadata.last_error = Some(message.clone());
                    })?;
                    if retry_count < self.config.max_retry_attempts {
                        tracing::debug!(
                            sequence_number,
                            retry_count,
                            delay_ms = delay.as_millis() as u64,
                            "apply failed; backing off before retry",
                        );
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        self.update_entry(sequence_number, |e| {
            e.status = CommitStatus::Failed;
            e.metadata.retry_count = retry_count;
            e.metadata.last_error = last_error.clone();
        })?;
        tracing::warn!(
            sequence_number,
            retry_count,
            "apply retries exhausted; entry marked failed",
        );
        Ok(ApplyOutcome {
            sequence_number,
            success: false,
            already_applied: false,
            attempts,
            applied_at: None,
            error: last_error,
        })
    }

    /// Transition a non-terminal entry to `rolled_back`. Reserved for
    /// explicit decision rollbacks.
    pub fn mark_rolled_back(&self, sequence_number: u64) -> Result<CommitEntry, LogError> {
        let entry = self.get_entry(sequence_number)?;
        if entry.status == CommitStatus::RolledBack {
            return Err(LogError::InvalidTransition {
                sequence_number,
                from: CommitStatus::RolledBack,
                to: CommitStatus::RolledBack,
            });
        }
        self.update_entry(sequence_number, |e| {
            e.status = CommitStatus::RolledBack;
        })
    }

    pub fn statistics(&self) -> Result<LogStatistics, LogError> {
        Ok(self.load_document()?.statistics)
    }

    pub fn current_sequence_number(&self) -> Result<u64, LogError> {
        Ok(self.load_document()?.current_sequence_number)
    }

    // -- internals ---------------------------------------------------------

    fn head_guard(&self) -> std::sync::MutexGuard<'_, u64> {
        self.head.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_entry(
        &self,
        sequence_number: u64,
        mutate: impl FnOnce(&mut CommitEntry),
    ) -> Result<CommitEntry, LogError> {
        self.with_exclusive_lock(|| {
            let mut doc = self.load_document()?;
            let Some(entry) = doc
                .entries
                .iter_mut()
                .find(|e| e.sequence_number == sequence_number)
            else {
                return Err(LogError::EntryNotFound { sequence_number });
            };
            mutate(entry);
            let updated = entry.clone();
            doc.reindex();
            self.persist(&doc)?;
            Ok(updated)
        })
    }

    fn with_exclusive_lock<T>(
        &self,
        body: impl FnOnce() -> Result<T, LogError>,
    ) -> Result<T, LogError> {
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| io_err(&self.lock_path, e))?;
        lock.lock_exclusive().map_err(|e| io_err(&self.lock_path, e))?;
        let result = body();
        let _ = FileExt::unlock(&lock);
        result
    }

    fn load_document(&self) -> Result<LogDocument, LogError> {
        if !self.path.exists() {
            return Ok(LogDocument::new(self.machine_id.clone()));
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn persist(&self, doc: &LogDocument) -> Result<(), LogError> {
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CommitData;
    use flotilla_core::types::HeartbeatStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn test_config() -> LogConfig {
        LogConfig {
            retry_delay: Duration::from_millis(1),
            max_retry_attempts: 3,
            max_append_attempts: 3,
        }
    }

    fn open_log(shared: &Path) -> CommitLog {
        CommitLog::open_at(shared, MachineId::from("anchor-01"), test_config()).expect("open")
    }

    fn heartbeat_draft(machine: &str) -> EntryDraft {
        EntryDraft::new(
            MachineId::from(machine),
            CommitData::Heartbeat {
                machine_id: MachineId::from(machine),
                status: HeartbeatStatus::Online,
            },
        )
    }

    struct OkApplier;
    impl EntryApplier for OkApplier {
        fn apply(&self, _entry: &CommitEntry) -> Result<(), String> {
            Ok(())
        }
    }

    struct CountingApplier(AtomicU32);
    impl EntryApplier for CountingApplier {
        fn apply(&self, _entry: &CommitEntry) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingApplier;
    impl EntryApplier for FailingApplier {
        fn apply(&self, _entry: &CommitEntry) -> Result<(), String> {
            Err("disk unavailable".into())
        }
    }

    #[test]
    fn sequences_are_gapless_and_increasing() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        for expected in 1..=5u64 {
            let seq = log.append(&heartbeat_draft("m")).expect("append");
            assert_eq!(seq, expected);
        }
    }

    #[test]
    fn two_instances_interleave_without_gaps() {
        let shared = TempDir::new().expect("tempdir");
        let a = open_log(shared.path());
        let b = open_log(shared.path());

        // Each instance caches its own head, so writers race for the same
        // candidate and resolve via the in-lock renumbering.
        let mut seqs = Vec::new();
        for _ in 0..3 {
            seqs.push(a.append(&heartbeat_draft("a")).expect("append a"));
            seqs.push(b.append(&heartbeat_draft("b")).expect("append b"));
        }
        seqs.sort_unstable();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn conflict_counter_records_sequence_races() {
        let shared = TempDir::new().expect("tempdir");
        let a = open_log(shared.path());
        let b = open_log(shared.path());

        a.append(&heartbeat_draft("a")).expect("append a");
        // b still believes the head is 0; its candidate 1 is taken.
        b.append(&heartbeat_draft("b")).expect("append b");

        let stats = a.statistics().expect("stats");
        assert!(stats.sequence_conflicts >= 1, "race should be recorded");
    }

    #[test]
    fn get_entries_filters_and_paginates() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        for machine in ["a", "a", "b", "a"] {
            log.append(&heartbeat_draft(machine)).expect("append");
        }

        let page = log
            .get_entries(
                &EntryFilter {
                    machine_id: Some(MachineId::from("a")),
                    ..EntryFilter::default()
                },
                &Pagination {
                    offset: 0,
                    limit: 2,
                },
            )
            .expect("page");
        assert_eq!(page.total_count, 3);
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_sequence_number, 5);

        let rest = log
            .get_entries(
                &EntryFilter {
                    machine_id: Some(MachineId::from("a")),
                    ..EntryFilter::default()
                },
                &Pagination {
                    offset: 2,
                    limit: 2,
                },
            )
            .expect("page");
        assert_eq!(rest.entries.len(), 1);
        assert!(!rest.has_more);
    }

    #[test]
    fn since_sequence_excludes_older_entries() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        for _ in 0..4 {
            log.append(&heartbeat_draft("m")).expect("append");
        }
        let page = log
            .get_entries(
                &EntryFilter {
                    since_sequence: Some(2),
                    ..EntryFilter::default()
                },
                &Pagination::default(),
            )
            .expect("page");
        let seqs: Vec<u64> = page.entries.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn clean_log_verifies_consistent() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        for _ in 0..3 {
            log.append(&heartbeat_draft("m")).expect("append");
        }
        let report = log.verify_consistency().expect("verify");
        assert!(report.is_consistent, "faults: {:?}", report.inconsistent_entries);
    }

    #[test]
    fn apply_marks_entry_applied() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        let seq = log.append(&heartbeat_draft("m")).expect("append");

        let outcome = log.apply_entry(seq, &OkApplier).expect("apply");
        assert!(outcome.success);
        assert!(!outcome.already_applied);
        assert_eq!(outcome.attempts, 1);

        let entry = log.get_entry(seq).expect("entry");
        assert_eq!(entry.status, CommitStatus::Applied);
        assert_eq!(
            entry.metadata.applied_by,
            Some(MachineId::from("anchor-01"))
        );
    }

    #[test]
    fn apply_is_idempotent() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        let seq = log.append(&heartbeat_draft("m")).expect("append");

        let applier = CountingApplier(AtomicU32::new(0));
        let first = log.apply_entry(seq, &applier).expect("first apply");
        let second = log.apply_entry(seq, &applier).expect("second apply");

        assert!(first.success && second.success);
        assert!(second.already_applied);
        assert_eq!(second.applied_at, first.applied_at, "applied_at must not move");
        assert_eq!(applier.0.load(Ordering::SeqCst), 1, "one underlying mutation");
    }

    #[test]
    fn apply_exhaustion_marks_failed_with_last_error() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        let seq = log.append(&heartbeat_draft("m")).expect("append");

        let outcome = log.apply_entry(seq, &FailingApplier).expect("apply");
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.error.as_deref(), Some("disk unavailable"));

        let entry = log.get_entry(seq).expect("entry");
        assert_eq!(entry.status, CommitStatus::Failed);
        assert_eq!(entry.metadata.retry_count, 3);
        assert_eq!(entry.metadata.last_error.as_deref(), Some("disk unavailable"));
    }

    #[test]
    fn failed_entry_can_recover_on_later_apply() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        let seq = log.append(&heartbeat_draft("m")).expect("append");

        let outcome = log.apply_entry(seq, &FailingApplier).expect("apply");
        assert!(!outcome.success);
        assert_eq!(
            log.get_entry(seq).expect("entry").status,
            CommitStatus::Failed
        );

        // Retry budget exhausted at 3; a wider budget lets the persisted
        // retry_count continue toward success on a later invocation.
        let wider = CommitLog::open_at(
            shared.path(),
            MachineId::from("anchor-01"),
            LogConfig {
                max_retry_attempts: 10,
                ..test_config()
            },
        )
        .expect("reopen");
        let recovered = wider.apply_entry(seq, &OkApplier).expect("reapply");
        assert!(recovered.success);
        assert_eq!(
            wider.get_entry(seq).expect("entry").status,
            CommitStatus::Applied
        );
    }

    #[test]
    fn rolled_back_entry_rejects_apply() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        let seq = log.append(&heartbeat_draft("m")).expect("append");
        log.mark_rolled_back(seq).expect("rollback");

        let err = log.apply_entry(seq, &OkApplier).unwrap_err();
        assert!(matches!(err, LogError::InvalidTransition { .. }));

        let err = log.mark_rolled_back(seq).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn missing_entry_is_not_found() {
        let shared = TempDir::new().expect("tempdir");
        let log = open_log(shared.path());
        let err = log.apply_entry(42, &OkApplier).unwrap_err();
        assert!(matches!(err, LogError::EntryNotFound { sequence_number: 42 }));
    }
}

//! End-to-end properties of the shared commit log: concurrent appends stay
//! gapless, tampering is detected, application is idempotent.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use flotilla_core::types::{HeartbeatStatus, MachineId};
use flotilla_log::{
    CommitData, CommitEntry, CommitLog, CommitStatus, EntryApplier, EntryDraft, EntryFilter,
    FaultSeverity, LogConfig, Pagination,
};

fn open_log(shared: &std::path::Path) -> CommitLog {
    CommitLog::open_at(
        shared,
        MachineId::from("anchor-01"),
        LogConfig {
            retry_delay: std::time::Duration::from_millis(1),
            max_retry_attempts: 3,
            max_append_attempts: 5,
        },
    )
    .expect("open log")
}

fn draft(machine: &str) -> EntryDraft {
    EntryDraft::new(
        MachineId::from(machine),
        CommitData::Heartbeat {
            machine_id: MachineId::from(machine),
            status: HeartbeatStatus::Online,
        },
    )
}

#[test]
fn concurrent_appends_assign_exactly_one_to_n() {
    let shared = TempDir::new().expect("tempdir");
    let log = Arc::new(open_log(shared.path()));

    const WRITERS: usize = 4;
    const PER_WRITER: usize = 10;

    let mut handles = Vec::new();
    for writer in 0..WRITERS {
        let log = Arc::clone(&log);
        handles.push(thread::spawn(move || {
            let machine = format!("writer-{writer}");
            (0..PER_WRITER)
                .map(|_| log.append(&draft(&machine)).expect("append"))
                .collect::<Vec<u64>>()
        }));
    }

    let mut seqs: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("join"))
        .collect();
    seqs.sort_unstable();

    let expected: Vec<u64> = (1..=(WRITERS * PER_WRITER) as u64).collect();
    assert_eq!(seqs, expected, "no duplicates, no gaps");
}

#[test]
fn concurrent_appends_on_a_non_empty_log_continue_the_sequence() {
    let shared = TempDir::new().expect("tempdir");
    let log = Arc::new(open_log(shared.path()));
    for _ in 0..3 {
        log.append(&draft("seed")).expect("seed append");
    }

    let mut handles = Vec::new();
    for _ in 0..3 {
        let log = Arc::clone(&log);
        handles.push(thread::spawn(move || {
            log.append(&draft("late")).expect("append")
        }));
    }
    let mut seqs: Vec<u64> = handles.into_iter().map(|h| h.join().expect("join")).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, vec![4, 5, 6]);
}

#[test]
fn verify_consistency_flags_tampered_payload() {
    let shared = TempDir::new().expect("tempdir");
    let log = open_log(shared.path());
    for _ in 0..3 {
        log.append(&draft("m")).expect("append");
    }

    // Tamper with the second entry's payload behind the log's back.
    let path = shared.path().join("commit-log.json");
    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
    doc["entries"][1]["data"]["machine_id"] = serde_json::json!("intruder");
    std::fs::write(&path, serde_json::to_string_pretty(&doc).expect("serialize"))
        .expect("write tampered");

    let report = log.verify_consistency().expect("verify");
    assert!(!report.is_consistent);
    let fault = report
        .inconsistent_entries
        .iter()
        .find(|f| f.sequence_number == 2)
        .expect("entry 2 flagged");
    assert_eq!(fault.severity, FaultSeverity::High);
    assert!(!report.recommendations.is_empty());
}

#[test]
fn verify_consistency_flags_deleted_entry() {
    let shared = TempDir::new().expect("tempdir");
    let log = open_log(shared.path());
    for _ in 0..3 {
        log.append(&draft("m")).expect("append");
    }

    let path = shared.path().join("commit-log.json");
    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
    let entries = doc["entries"].as_array_mut().expect("entries array");
    entries.remove(1);
    std::fs::write(&path, serde_json::to_string_pretty(&doc).expect("serialize"))
        .expect("write truncated");

    let report = log.verify_consistency().expect("verify");
    assert!(!report.is_consistent);
    assert!(
        report
            .inconsistent_entries
            .iter()
            .any(|f| f.severity == FaultSeverity::High && f.reason.contains("chain")),
        "chain break must be flagged: {:?}",
        report.inconsistent_entries
    );
    assert!(
        report
            .inconsistent_entries
            .iter()
            .any(|f| f.reason.contains("gap")),
        "sequence gap must be flagged"
    );
}

struct CountingApplier(AtomicU32);

impl EntryApplier for CountingApplier {
    fn apply(&self, _entry: &CommitEntry) -> Result<(), String> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn double_apply_is_idempotent_across_instances() {
    let shared = TempDir::new().expect("tempdir");
    let log = open_log(shared.path());
    let seq = log.append(&draft("m")).expect("append");

    let applier = CountingApplier(AtomicU32::new(0));
    let first = log.apply_entry(seq, &applier).expect("first apply");
    assert!(first.success);

    // Second invocation through a fresh instance, as a retried RPC would.
    let other = open_log(shared.path());
    let second = other.apply_entry(seq, &applier).expect("second apply");
    assert!(second.success);
    assert!(second.already_applied);
    assert_eq!(second.applied_at, first.applied_at);
    assert_eq!(applier.0.load(Ordering::SeqCst), 1);
}

#[test]
fn pending_entries_are_listable_by_status() {
    let shared = TempDir::new().expect("tempdir");
    let log = open_log(shared.path());
    let first = log.append(&draft("m")).expect("append");
    log.append(&draft("m")).expect("append");

    struct AlwaysOk;
    impl EntryApplier for AlwaysOk {
        fn apply(&self, _e: &CommitEntry) -> Result<(), String> {
            Ok(())
        }
    }
    log.apply_entry(first, &AlwaysOk).expect("apply");

    let pending = log
        .get_entries(
            &EntryFilter {
                status: Some(CommitStatus::Pending),
                ..EntryFilter::default()
            },
            &Pagination::default(),
        )
        .expect("pending page");
    assert_eq!(pending.total_count, 1);
    assert_eq!(pending.entries[0].sequence_number, 2);
}

//! Serde roundtrip coverage for the shared-state documents.
//!
//! Everything that crosses the shared filesystem must survive a
//! serialize → deserialize cycle unchanged, including optional fields.

use std::collections::BTreeMap;

use chrono::Utc;
use rstest::rstest;
use semver::Version;

use flotilla_core::types::{
    Baseline, BaselineMessage, ConfigInventory, Decision, DecisionParameters, DecisionStatus,
    DecisionTarget, HardwareInventory, HeartbeatRecord, HeartbeatStatus, MachineId,
    MachineInventory, RollbackPoint, SoftwarePackage, SystemInventory,
};

fn inventory(machine: &str) -> MachineInventory {
    MachineInventory {
        machine_id: MachineId::from(machine),
        collected_at: Utc::now(),
        configuration: ConfigInventory {
            modes: vec!["architect".into(), "coder".into()],
            mcp_servers: vec!["files".into()],
            settings: BTreeMap::from([("theme".to_string(), "dark".to_string())]),
        },
        hardware: HardwareInventory {
            cpu_model: "Ryzen 7".into(),
            cpu_cores: 8,
            memory_mb: 32_768,
            disks: vec![],
        },
        software: vec![SoftwarePackage {
            name: "git".into(),
            version: "2.44.0".into(),
        }],
        system: SystemInventory {
            os_name: "linux".into(),
            os_version: "6.8".into(),
            hostname: "anchor-01".into(),
            arch: "x86_64".into(),
        },
    }
}

#[test]
fn baseline_roundtrips_through_json() {
    let mut baseline = Baseline::new(MachineId::from("anchor-01"));
    baseline.version = Version::new(1, 4, 2);
    baseline
        .machines
        .insert("anchor-01".into(), inventory("anchor-01"));
    baseline.messages.push(BaselineMessage {
        at: Utc::now(),
        author: "operator".into(),
        text: "seeded".into(),
    });

    let json = serde_json::to_string_pretty(&baseline).expect("serialize");
    let back: Baseline = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, baseline);
}

#[test]
fn heartbeat_record_roundtrips_with_offline_since() {
    let now = Utc::now();
    let mut record = HeartbeatRecord::new(MachineId::from("drifter-02"), now);
    record.status = HeartbeatStatus::Offline;
    record.offline_since = Some(now);
    record.missed_heartbeats = 7;

    let json = serde_json::to_string(&record).expect("serialize");
    let back: HeartbeatRecord = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, record);
}

#[test]
fn decision_roundtrips_with_rollback_point() {
    let mut decision = Decision::propose(
        MachineId::from("anchor-01"),
        DecisionTarget {
            machine_id: Some(MachineId::from("drifter-02")),
            config_path: None,
            baseline_id: None,
        },
        DecisionParameters {
            changes: BTreeMap::from([("app.conf".to_string(), "retries=3\n".to_string())]),
            note: Some("bump retries".into()),
        },
    );
    decision.status = DecisionStatus::Applied;
    decision.rollback_point = Some(RollbackPoint {
        decision_id: decision.id,
        captured_at: Utc::now(),
        files: BTreeMap::from([
            ("app.conf".to_string(), Some("retries=2\n".to_string())),
            ("new.conf".to_string(), None),
        ]),
    });

    let json = serde_json::to_string(&decision).expect("serialize");
    let back: Decision = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, decision);
}

#[rstest]
#[case(HeartbeatStatus::Online, "\"online\"")]
#[case(HeartbeatStatus::Warning, "\"warning\"")]
#[case(HeartbeatStatus::Offline, "\"offline\"")]
fn heartbeat_status_wire_format(#[case] status: HeartbeatStatus, #[case] wire: &str) {
    assert_eq!(serde_json::to_string(&status).expect("serialize"), wire);
}

#[rstest]
#[case(DecisionStatus::Pending, "\"pending\"")]
#[case(DecisionStatus::RolledBack, "\"rolled_back\"")]
fn decision_status_wire_format(#[case] status: DecisionStatus, #[case] wire: &str) {
    assert_eq!(serde_json::to_string(&status).expect("serialize"), wire);
}

//! Domain types for the Flotilla synchronization core.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem
//! paths. All types are serializable via serde; machine-written state is
//! JSON, the human-edited service config is YAML.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a machine in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineId(pub String);

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for MachineId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MachineId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed identifier for a decision (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for DecisionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Liveness state of a machine, driven by heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    #[default]
    Online,
    Warning,
    Offline,
}

impl fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatStatus::Online => write!(f, "online"),
            HeartbeatStatus::Warning => write!(f, "warning"),
            HeartbeatStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Lifecycle state of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Applied,
    RolledBack,
}

impl DecisionStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, DecisionStatus::Rejected | DecisionStatus::RolledBack)
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionStatus::Pending => write!(f, "pending"),
            DecisionStatus::Approved => write!(f, "approved"),
            DecisionStatus::Rejected => write!(f, "rejected"),
            DecisionStatus::Applied => write!(f, "applied"),
            DecisionStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Severity band of a detected configuration difference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Important,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::Important => write!(f, "IMPORTANT"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

/// Inventory area a diff entry belongs to. Each category maps to a fixed
/// severity band: configuration = CRITICAL, hardware = IMPORTANT,
/// software = WARNING, system = INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffCategory {
    Configuration,
    Hardware,
    Software,
    System,
}

impl DiffCategory {
    pub fn severity(self) -> Severity {
        match self {
            DiffCategory::Configuration => Severity::Critical,
            DiffCategory::Hardware => Severity::Important,
            DiffCategory::Software => Severity::Warning,
            DiffCategory::System => Severity::Info,
        }
    }
}

impl fmt::Display for DiffCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffCategory::Configuration => write!(f, "configuration"),
            DiffCategory::Hardware => write!(f, "hardware"),
            DiffCategory::Software => write!(f, "software"),
            DiffCategory::System => write!(f, "system"),
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Bookkeeping carried on every heartbeat record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMetadata {
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Revision counter, bumped on every persisted update.
    pub version: u64,
}

/// Liveness record for one machine. Created on the first registered
/// heartbeat, mutated only by the tracker, never deleted.
///
/// `last_reported_status` is the edge-trigger cursor: a check cycle reports
/// a machine only when its current status differs from this field, then
/// advances it. `offline_since` survives the return to `online` until the
/// online sync event consumes it to compute the offline duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub machine_id: MachineId,
    pub last_heartbeat: DateTime<Utc>,
    pub status: HeartbeatStatus,
    pub missed_heartbeats: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_since: Option<DateTime<Utc>>,
    pub last_reported_status: HeartbeatStatus,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub metadata: HeartbeatMetadata,
}

impl HeartbeatRecord {
    /// Fresh record for a machine seen for the first time at `now`.
    pub fn new(machine_id: MachineId, now: DateTime<Utc>) -> Self {
        Self {
            machine_id,
            last_heartbeat: now,
            status: HeartbeatStatus::Online,
            missed_heartbeats: 0,
            offline_since: None,
            last_reported_status: HeartbeatStatus::Online,
            attributes: BTreeMap::new(),
            metadata: HeartbeatMetadata {
                first_seen: now,
                last_updated: now,
                version: 1,
            },
        }
    }

    /// Bump the revision counter and `last_updated` ahead of a save.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.metadata.last_updated = now;
        self.metadata.version += 1;
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// What a decision points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DecisionTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<MachineId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_id: Option<String>,
}

/// Payload of a proposed change: full desired content per relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DecisionParameters {
    /// Relative config path → desired file content.
    #[serde(default)]
    pub changes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Snapshot of target files captured immediately before an apply, enabling
/// later restoration. `None` content means the file did not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub decision_id: DecisionId,
    pub captured_at: DateTime<Utc>,
    pub files: BTreeMap<String, Option<String>>,
}

/// A proposed, approvable, applicable, and rollback-able configuration
/// change.
///
/// Lifecycle: `pending → approved | rejected` (rejected terminal) →
/// `applied` (rollback point captured before mutation) → `rolled_back`
/// (requires a reason; immutable afterwards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub status: DecisionStatus,
    pub target: DecisionTarget,
    pub parameters: DecisionParameters,
    pub created_at: DateTime<Utc>,
    pub created_by: MachineId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_point: Option<RollbackPoint>,
    /// Sequence number of the commit entry recording the apply transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_commit_seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    /// New pending decision proposed by `created_by`.
    pub fn propose(
        created_by: MachineId,
        target: DecisionTarget,
        parameters: DecisionParameters,
    ) -> Self {
        Self {
            id: DecisionId::new(),
            status: DecisionStatus::Pending,
            target,
            parameters,
            created_at: Utc::now(),
            created_by,
            approved_by: None,
            approved_at: None,
            applied_at: None,
            rollback_point: None,
            applied_commit_seq: None,
            reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Diffs
// ---------------------------------------------------------------------------

/// A single detected difference between current inventory and the baseline.
/// Produced fresh per comparison call, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub category: DiffCategory,
    pub severity: Severity,
    pub path: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Fleet-critical configuration surface of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfigInventory {
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiskInventory {
    pub name: String,
    pub capacity_gb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HardwareInventory {
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub disks: Vec<DiskInventory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwarePackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SystemInventory {
    pub os_name: String,
    pub os_version: String,
    pub hostname: String,
    pub arch: String,
}

/// Full inventory snapshot collected from one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInventory {
    pub machine_id: MachineId,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub configuration: ConfigInventory,
    #[serde(default)]
    pub hardware: HardwareInventory,
    #[serde(default)]
    pub software: Vec<SoftwarePackage>,
    #[serde(default)]
    pub system: SystemInventory,
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

/// A desired file on a machine, distributed through the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub machine_id: MachineId,
    /// Relative to the machine's config root.
    pub path: String,
    pub content: String,
}

/// Free-form operator note attached to the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineMessage {
    pub at: DateTime<Utc>,
    pub author: String,
    pub text: String,
}

/// The reference document machines are compared against and synced from.
///
/// Mutated only through approved, applied decisions. Compatibility is gated
/// on the major version component alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub version: Version,
    /// Machine that owns (last rewrote) the baseline.
    pub machine_id: MachineId,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineInventory>,
    #[serde(default)]
    pub sync_targets: Vec<SyncTarget>,
    #[serde(default)]
    pub messages: Vec<BaselineMessage>,
    pub updated_at: DateTime<Utc>,
}

impl Baseline {
    /// Empty baseline owned by `machine_id`, version `1.0.0`.
    pub fn new(machine_id: MachineId) -> Self {
        Self {
            version: Version::new(1, 0, 0),
            machine_id,
            machines: BTreeMap::new(),
            sync_targets: Vec::new(),
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Sync targets addressed to `machine`, in document order.
    pub fn targets_for(&self, machine: &MachineId) -> Vec<&SyncTarget> {
        self.sync_targets
            .iter()
            .filter(|t| &t.machine_id == machine)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(MachineId::from("anchor-01").to_string(), "anchor-01");
    }

    #[test]
    fn decision_id_roundtrips_through_str() {
        let id = DecisionId::new();
        let parsed: DecisionId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn category_severity_bands_are_fixed() {
        assert_eq!(DiffCategory::Configuration.severity(), Severity::Critical);
        assert_eq!(DiffCategory::Hardware.severity(), Severity::Important);
        assert_eq!(DiffCategory::Software.severity(), Severity::Warning);
        assert_eq!(DiffCategory::System.severity(), Severity::Info);
    }

    #[test]
    fn severity_serializes_uppercase() {
        let json = serde_json::to_string(&Severity::Critical).expect("serialize");
        assert_eq!(json, "\"CRITICAL\"");
    }

    #[test]
    fn decision_status_terminality() {
        assert!(DecisionStatus::Rejected.is_terminal());
        assert!(DecisionStatus::RolledBack.is_terminal());
        assert!(!DecisionStatus::Applied.is_terminal());
        assert!(!DecisionStatus::Pending.is_terminal());
    }

    #[test]
    fn proposed_decision_starts_pending() {
        let d = Decision::propose(
            MachineId::from("anchor-01"),
            DecisionTarget::default(),
            DecisionParameters::default(),
        );
        assert_eq!(d.status, DecisionStatus::Pending);
        assert!(d.rollback_point.is_none());
        assert!(d.approved_at.is_none());
    }

    #[test]
    fn baseline_targets_for_filters_by_machine() {
        let mut baseline = Baseline::new(MachineId::from("anchor-01"));
        baseline.sync_targets = vec![
            SyncTarget {
                machine_id: MachineId::from("a"),
                path: "app.conf".into(),
                content: "x".into(),
            },
            SyncTarget {
                machine_id: MachineId::from("b"),
                path: "app.conf".into(),
                content: "y".into(),
            },
        ];
        let targets = baseline.targets_for(&MachineId::from("a"));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].content, "x");
    }

    #[test]
    fn heartbeat_record_touch_bumps_revision() {
        let now = Utc::now();
        let mut record = HeartbeatRecord::new(MachineId::from("m"), now);
        assert_eq!(record.metadata.version, 1);
        record.touch(now);
        assert_eq!(record.metadata.version, 2);
    }
}

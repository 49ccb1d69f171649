//! Commit entry model: typed payloads, content hashing, hash chaining.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use flotilla_core::types::{DecisionId, DecisionStatus, HeartbeatStatus, MachineId};

/// Seed for the chain hash of the first entry.
pub const CHAIN_SEED: &str = "flotilla-log-v1";

/// Category of a state-changing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitType {
    Decision,
    Config,
    Baseline,
    Heartbeat,
    System,
}

impl std::fmt::Display for CommitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitType::Decision => write!(f, "decision"),
            CommitType::Config => write!(f, "config"),
            CommitType::Baseline => write!(f, "baseline"),
            CommitType::Heartbeat => write!(f, "heartbeat"),
            CommitType::System => write!(f, "system"),
        }
    }
}

/// Durable status of an entry. Only moves forward:
/// `pending → applied | failed`, `failed → applied` on retry, and any
/// non-terminal state → `rolled_back` via an explicit decision rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    #[default]
    Pending,
    Applied,
    Failed,
    RolledBack,
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitStatus::Pending => write!(f, "pending"),
            CommitStatus::Applied => write!(f, "applied"),
            CommitStatus::Failed => write!(f, "failed"),
            CommitStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Typed payload, one variant per [`CommitType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitData {
    Decision {
        decision_id: DecisionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<DecisionStatus>,
        to: DecisionStatus,
        summary: String,
    },
    Config {
        path: String,
        content_hash: String,
    },
    Baseline {
        version: String,
        action: String,
    },
    Heartbeat {
        machine_id: MachineId,
        status: HeartbeatStatus,
    },
    System {
        event: String,
        details: serde_json::Value,
    },
}

impl CommitData {
    pub fn commit_type(&self) -> CommitType {
        match self {
            CommitData::Decision { .. } => CommitType::Decision,
            CommitData::Config { .. } => CommitType::Config,
            CommitData::Baseline { .. } => CommitType::Baseline,
            CommitData::Heartbeat { .. } => CommitType::Heartbeat,
            CommitData::System { .. } => CommitType::System,
        }
    }

    /// SHA-256 hex digest over the canonical JSON form of the payload.
    ///
    /// Canonical means: serde_json with struct fields in declaration order
    /// and all maps as `BTreeMap` — byte-stable for identical payloads.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Per-entry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_by: Option<MachineId>,
}

/// One committed, sequence-numbered operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub sequence_number: u64,
    pub entry_type: CommitType,
    pub machine_id: MachineId,
    pub timestamp: DateTime<Utc>,
    pub status: CommitStatus,
    pub data: CommitData,
    /// Digest of `data` alone; must always recompute-match.
    pub hash: String,
    /// Digest over the predecessor's `chain_hash` + this entry's `hash`.
    /// Detects reordering and deletion of whole entries, not just
    /// single-entry corruption.
    pub chain_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub metadata: EntryMetadata,
}

impl CommitEntry {
    /// Recompute the content hash and compare; an unserializable payload
    /// counts as a mismatch.
    pub fn hash_matches(&self) -> bool {
        self.data
            .content_hash()
            .map(|hash| hash == self.hash)
            .unwrap_or(false)
    }
}

/// What callers hand to `append`; the log fills in sequence, hashes,
/// status, and timestamp.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub machine_id: MachineId,
    pub data: CommitData,
    pub signature: Option<String>,
    pub parent_id: Option<String>,
}

impl EntryDraft {
    pub fn new(machine_id: MachineId, data: CommitData) -> Self {
        Self {
            machine_id,
            data,
            signature: None,
            parent_id: None,
        }
    }
}

/// Chain hash for an entry given its predecessor's chain hash.
pub fn chain_hash(previous_chain: &str, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_chain.as_bytes());
    hasher.update(content_hash.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat_data(machine: &str) -> CommitData {
        CommitData::Heartbeat {
            machine_id: MachineId::from(machine),
            status: HeartbeatStatus::Online,
        }
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = heartbeat_data("anchor-01").content_hash().expect("hash");
        let b = heartbeat_data("anchor-01").content_hash().expect("hash");
        assert_eq!(a, b);
        let other = heartbeat_data("drifter-02").content_hash().expect("hash");
        assert_ne!(a, other);
    }

    #[test]
    fn data_variant_determines_commit_type() {
        assert_eq!(heartbeat_data("m").commit_type(), CommitType::Heartbeat);
        let data = CommitData::System {
            event: "sync_online".into(),
            details: serde_json::json!({"files_synced": 2}),
        };
        assert_eq!(data.commit_type(), CommitType::System);
    }

    #[test]
    fn chain_hash_depends_on_predecessor() {
        let content = heartbeat_data("m").content_hash().expect("hash");
        let from_seed = chain_hash(CHAIN_SEED, &content);
        let from_other = chain_hash("different-predecessor", &content);
        assert_ne!(from_seed, from_other);
    }

    #[test]
    fn status_wire_format_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&CommitStatus::RolledBack).expect("serialize"),
            "\"rolled_back\""
        );
        assert_eq!(
            serde_json::to_string(&CommitType::Baseline).expect("serialize"),
            "\"baseline\""
        );
    }
}

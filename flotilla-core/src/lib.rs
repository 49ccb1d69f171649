//! Flotilla core library — domain types, shared-state persistence, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs shared across the workspace
//! - [`error`] — [`CoreError`] and the stable error-code taxonomy
//! - [`config`] — service configuration (`~/.flotilla/config.yaml`)
//! - [`paths`] — layout of the shared state directory
//! - [`baseline`] — reference baseline document load / save / backup
//! - [`heartbeat`] — per-machine heartbeat record store
//! - [`ledger`] — append-only decision event log + materialized index

pub mod baseline;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod ledger;
pub mod paths;
pub mod types;

pub use config::ServiceConfig;
pub use error::CoreError;
pub use ledger::{DecisionEvent, DecisionEventKind, DecisionLedger};
pub use types::{
    Baseline, Decision, DecisionId, DecisionParameters, DecisionStatus, DecisionTarget,
    DiffCategory, DiffEntry, HeartbeatRecord, HeartbeatStatus, MachineId, MachineInventory,
    RollbackPoint, Severity, SyncTarget,
};

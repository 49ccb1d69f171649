//! # flotilla-sync
//!
//! The synchronization logic over the shared state: heartbeat liveness
//! tracking, baseline comparison, the decision lifecycle, and the sync
//! event reactions that tie them together.
//!
//! Everything here operates on explicit paths and explicitly constructed
//! services (see [`Services`]); there are no process-wide singletons.

pub mod comparator;
pub mod decision;
pub mod diff;
pub mod error;
pub mod events;
pub mod fsops;
pub mod heartbeat;
pub mod inventory;
pub mod services;

pub use comparator::{BaselineComparator, ComparisonReport, DiffSummary};
pub use decision::{
    ApplyOptions, ApplyReport, DecisionCoordinator, FileApplyError, FilePreview, RollbackReport,
};
pub use error::SyncError;
pub use events::{OfflineReport, OnlineReport, SyncEventHandler, SyncEventOptions};
pub use heartbeat::{HeartbeatDelta, HeartbeatTracker};
pub use inventory::{
    CommandOutput, CommandRunner, InventoryCache, InventoryCollector, RunOptions,
    ScriptInventoryCollector, TokioCommandRunner,
};
pub use services::Services;

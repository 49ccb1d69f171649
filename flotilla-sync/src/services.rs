//! Explicit service graph construction.
//!
//! Built once from a [`ServiceConfig`]; tests build isolated graphs from
//! temp dirs. There are no module-level singletons and no global reset
//! hooks anywhere in the workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flotilla_core::config::ServiceConfig;
use flotilla_log::{CommitLog, LogConfig};

use crate::comparator::BaselineComparator;
use crate::decision::DecisionCoordinator;
use crate::error::SyncError;
use crate::events::SyncEventHandler;
use crate::heartbeat::HeartbeatTracker;
use crate::inventory::{InventoryCollector, ScriptInventoryCollector, TokioCommandRunner};

pub struct Services {
    pub config: ServiceConfig,
    pub shared: PathBuf,
    pub config_root: PathBuf,
    pub log: Arc<CommitLog>,
    pub tracker: Arc<HeartbeatTracker>,
    pub coordinator: Arc<DecisionCoordinator>,
    pub events: Arc<SyncEventHandler>,
    /// Present only when an inventory collector is available.
    pub comparator: Option<Arc<BaselineComparator>>,
}

impl Services {
    /// Build the full graph. `collector` overrides the script-backed
    /// default; passing `None` with no configured script disables the
    /// comparator.
    pub fn build(
        home: &Path,
        config: ServiceConfig,
        collector: Option<Arc<dyn InventoryCollector>>,
    ) -> Result<Self, SyncError> {
        let shared = config.shared_root(home);
        let config_root = config.resolved_config_root(home);

        let log = Arc::new(CommitLog::open_at(
            &shared,
            config.machine_id.clone(),
            LogConfig::from(&config.log),
        )?);
        let tracker = Arc::new(HeartbeatTracker::new(&shared, config.heartbeat.clone()));
        let coordinator = Arc::new(DecisionCoordinator::new(
            &shared,
            &config_root,
            config.machine_id.clone(),
            log.clone(),
        ));
        let events = Arc::new(SyncEventHandler::new(
            &shared,
            &config_root,
            config.machine_id.clone(),
            log.clone(),
            coordinator.clone(),
        ));

        let collector = collector.or_else(|| {
            config.inventory.script_path.as_ref().map(|script| {
                Arc::new(ScriptInventoryCollector::new(
                    Arc::new(TokioCommandRunner),
                    script.clone(),
                    config.inventory.timeout(),
                )) as Arc<dyn InventoryCollector>
            })
        });
        let comparator = collector.map(|collector| {
            Arc::new(BaselineComparator::new(
                &shared,
                collector,
                config.inventory.cache_ttl(),
            ))
        });

        Ok(Self {
            config,
            shared,
            config_root,
            log,
            tracker,
            coordinator,
            events,
            comparator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::types::MachineId;
    use tempfile::TempDir;

    #[test]
    fn build_without_collector_has_no_comparator() {
        let home = TempDir::new().expect("home");
        let config = ServiceConfig::new(MachineId::from("anchor-01"));
        let services = Services::build(home.path(), config, None).expect("build");
        assert!(services.comparator.is_none());
        assert!(services.shared.ends_with(".flotilla/shared"));
    }

    #[test]
    fn configured_script_enables_comparator() {
        let home = TempDir::new().expect("home");
        let mut config = ServiceConfig::new(MachineId::from("anchor-01"));
        config.inventory.script_path = Some(PathBuf::from("/opt/fleet/collect.sh"));
        let services = Services::build(home.path(), config, None).expect("build");
        assert!(services.comparator.is_some());
    }
}

//! Baseline comparator: collect → cache → diff, with per-machine request
//! coalescing.
//!
//! N concurrent comparisons for the same machine must cost roughly one
//! inventory collection, not N: callers serialize on a per-machine
//! in-flight lock and re-check the cache after acquiring it, so only the
//! first caller in a burst reaches the collector.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use flotilla_core::baseline;
use flotilla_core::types::{DiffEntry, MachineId, MachineInventory, Severity};

use crate::diff;
use crate::error::SyncError;
use crate::inventory::{InventoryCache, InventoryCollector};

/// Per-severity counts for a comparison.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DiffSummary {
    pub critical: usize,
    pub important: usize,
    pub warning: usize,
    pub info: usize,
}

impl DiffSummary {
    fn tally(entries: &[DiffEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry.severity {
                Severity::Critical => summary.critical += 1,
                Severity::Important => summary.important += 1,
                Severity::Warning => summary.warning += 1,
                Severity::Info => summary.info += 1,
            }
        }
        summary
    }
}

/// Result of one baseline comparison.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub machine_id: MachineId,
    pub baseline_version: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<DiffEntry>,
    pub summary: DiffSummary,
}

impl ComparisonReport {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct BaselineComparator {
    shared: PathBuf,
    collector: Arc<dyn InventoryCollector>,
    cache: InventoryCache,
    /// One lock per machine; holders are collecting (or about to hit the
    /// cache another holder just filled).
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BaselineComparator {
    pub fn new(shared: &Path, collector: Arc<dyn InventoryCollector>, cache_ttl: Duration) -> Self {
        Self {
            shared: shared.to_path_buf(),
            collector,
            cache: InventoryCache::new(cache_ttl),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Compare `machine`'s current inventory against the baseline.
    ///
    /// `force_refresh` bypasses the inventory cache unconditionally.
    pub async fn compare_with_baseline(
        &self,
        machine: &MachineId,
        force_refresh: bool,
    ) -> Result<ComparisonReport, SyncError> {
        let current = self.collect_coalesced(machine, force_refresh).await?;

        let baseline = baseline::load_at(&self.shared)?;
        let Some(reference) = baseline.machines.get(&machine.0) else {
            return Err(SyncError::ComparisonFailed {
                machine_id: machine.clone(),
                detail: "machine has no baseline entry".into(),
            });
        };

        let entries = diff::compare(reference, &current);
        Ok(ComparisonReport {
            machine_id: machine.clone(),
            baseline_version: baseline.version.to_string(),
            generated_at: Utc::now(),
            summary: DiffSummary::tally(&entries),
            entries,
        })
    }

    /// Invalidate the cached inventory for a machine (after an apply, for
    /// instance).
    pub fn invalidate(&self, machine: &MachineId) {
        self.cache.invalidate(machine);
    }

    async fn collect_coalesced(
        &self,
        machine: &MachineId,
        force_refresh: bool,
    ) -> Result<MachineInventory, SyncError> {
        if !force_refresh {
            if let Some(cached) = self.cache.get(machine) {
                return Ok(cached);
            }
        }

        let flight = {
            let mut flights = self.flights.lock().await;
            flights.entry(machine.0.clone()).or_default().clone()
        };
        let _in_flight = flight.lock().await;

        // Another caller may have filled the cache while this one waited.
        if !force_refresh {
            if let Some(cached) = self.cache.get(machine) {
                return Ok(cached);
            }
        }

        let collected = self
            .collector
            .collect_inventory(machine, force_refresh)
            .await?;
        let Some(inventory) = collected else {
            return Err(SyncError::ComparisonFailed {
                machine_id: machine.clone(),
                detail: "collector returned no inventory".into(),
            });
        };
        self.cache.set(machine, inventory.clone());
        Ok(inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flotilla_core::types::Baseline;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingCollector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InventoryCollector for CountingCollector {
        async fn collect_inventory(
            &self,
            machine: &MachineId,
            _force_refresh: bool,
        ) -> Result<Option<MachineInventory>, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(MachineInventory {
                machine_id: machine.clone(),
                collected_at: Utc::now(),
                configuration: Default::default(),
                hardware: Default::default(),
                software: vec![],
                system: Default::default(),
            }))
        }
    }

    fn seed_baseline(shared: &Path, machine: &str) {
        let mut baseline = Baseline::new(MachineId::from(machine));
        baseline.machines.insert(
            machine.to_string(),
            MachineInventory {
                machine_id: MachineId::from(machine),
                collected_at: Utc::now(),
                configuration: Default::default(),
                hardware: Default::default(),
                software: vec![],
                system: Default::default(),
            },
        );
        baseline::save_at(shared, &baseline).expect("seed baseline");
    }

    #[tokio::test]
    async fn clean_comparison_against_matching_baseline() {
        let shared = TempDir::new().expect("tempdir");
        seed_baseline(shared.path(), "m");
        let comparator = BaselineComparator::new(
            shared.path(),
            Arc::new(CountingCollector {
                calls: AtomicUsize::new(0),
            }),
            Duration::from_secs(3600),
        );

        let report = comparator
            .compare_with_baseline(&MachineId::from("m"), false)
            .await
            .expect("compare");
        assert!(report.is_clean());
        assert_eq!(report.baseline_version, "1.0.0");
    }

    #[tokio::test]
    async fn second_comparison_hits_cache() {
        let shared = TempDir::new().expect("tempdir");
        seed_baseline(shared.path(), "m");
        let collector = Arc::new(CountingCollector {
            calls: AtomicUsize::new(0),
        });
        let comparator = BaselineComparator::new(
            shared.path(),
            collector.clone(),
            Duration::from_secs(3600),
        );

        let machine = MachineId::from("m");
        comparator
            .compare_with_baseline(&machine, false)
            .await
            .expect("first");
        comparator
            .compare_with_baseline(&machine, false)
            .await
            .expect("second");
        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let shared = TempDir::new().expect("tempdir");
        seed_baseline(shared.path(), "m");
        let collector = Arc::new(CountingCollector {
            calls: AtomicUsize::new(0),
        });
        let comparator = BaselineComparator::new(
            shared.path(),
            collector.clone(),
            Duration::from_secs(3600),
        );

        let machine = MachineId::from("m");
        comparator
            .compare_with_baseline(&machine, false)
            .await
            .expect("first");
        comparator
            .compare_with_baseline(&machine, true)
            .await
            .expect("forced");
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_machine_fails_comparison() {
        let shared = TempDir::new().expect("tempdir");
        seed_baseline(shared.path(), "m");
        let comparator = BaselineComparator::new(
            shared.path(),
            Arc::new(CountingCollector {
                calls: AtomicUsize::new(0),
            }),
            Duration::from_secs(3600),
        );

        let err = comparator
            .compare_with_baseline(&MachineId::from("stranger"), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "COMPARISON_FAILED");
    }

    #[tokio::test]
    async fn collector_returning_none_fails_comparison() {
        struct NoneCollector;
        #[async_trait]
        impl InventoryCollector for NoneCollector {
            async fn collect_inventory(
                &self,
                _machine: &MachineId,
                _force_refresh: bool,
            ) -> Result<Option<MachineInventory>, SyncError> {
                Ok(None)
            }
        }

        let shared = TempDir::new().expect("tempdir");
        seed_baseline(shared.path(), "m");
        let comparator = BaselineComparator::new(
            shared.path(),
            Arc::new(NoneCollector),
            Duration::from_secs(3600),
        );
        let err = comparator
            .compare_with_baseline(&MachineId::from("m"), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "COMPARISON_FAILED");
    }
}

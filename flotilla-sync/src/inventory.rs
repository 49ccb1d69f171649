//! Inventory collection ports.
//!
//! OS-level inventory gathering is an effect boundary, not core logic:
//! the comparator only sees [`InventoryCollector`], and the script-backed
//! collector only sees [`CommandRunner`]. Platform scripts stay swappable
//! external collaborators behind those two traits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use flotilla_core::types::{MachineId, MachineInventory};

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Command execution port
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Generic command-execution port for platform inventory scripts.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        script: &Path,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<CommandOutput, SyncError>;
}

/// tokio-backed implementation with a hard timeout.
#[derive(Debug, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        script: &Path,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<CommandOutput, SyncError> {
        let mut command = tokio::process::Command::new(script);
        command.args(args).kill_on_drop(true);
        for (key, value) in &opts.env {
            command.env(key, value);
        }

        let output = tokio::time::timeout(opts.timeout, command.output())
            .await
            .map_err(|_| SyncError::Command {
                script: script.to_path_buf(),
                detail: format!("timed out after {:?}", opts.timeout),
            })?
            .map_err(|e| SyncError::Command {
                script: script.to_path_buf(),
                detail: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Collector port
// ---------------------------------------------------------------------------

/// External inventory source. `None` means the collector could not produce
/// an inventory for the machine; comparisons treat that as failure.
#[async_trait]
pub trait InventoryCollector: Send + Sync {
    async fn collect_inventory(
        &self,
        machine: &MachineId,
        force_refresh: bool,
    ) -> Result<Option<MachineInventory>, SyncError>;
}

/// Collector that shells out to a platform script which prints inventory
/// JSON (or `null`) on stdout.
pub struct ScriptInventoryCollector {
    runner: std::sync::Arc<dyn CommandRunner>,
    script: PathBuf,
    timeout: Duration,
}

impl ScriptInventoryCollector {
    pub fn new(
        runner: std::sync::Arc<dyn CommandRunner>,
        script: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            script,
            timeout,
        }
    }
}

#[async_trait]
impl InventoryCollector for ScriptInventoryCollector {
    async fn collect_inventory(
        &self,
        machine: &MachineId,
        force_refresh: bool,
    ) -> Result<Option<MachineInventory>, SyncError> {
        let mut args = vec![machine.0.clone()];
        if force_refresh {
            args.push("--force-refresh".to_string());
        }
        let opts = RunOptions {
            timeout: self.timeout,
            env: Vec::new(),
        };

        let output = self.runner.run(&self.script, &args, &opts).await?;
        if output.exit_code != 0 {
            return Err(SyncError::Command {
                script: self.script.clone(),
                detail: format!(
                    "exit code {}: {}",
                    output.exit_code,
                    output.stderr.lines().next().unwrap_or("no stderr")
                ),
            });
        }

        let inventory: Option<MachineInventory> = serde_json::from_str(output.stdout.trim())?;
        Ok(inventory)
    }
}

// ---------------------------------------------------------------------------
// TTL cache
// ---------------------------------------------------------------------------

struct CachedInventory {
    stored_at: Instant,
    inventory: MachineInventory,
}

/// Explicit per-machine inventory cache with a TTL. Owned by the
/// comparator; never ambient module state.
pub struct InventoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedInventory>>,
}

impl InventoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, machine: &MachineId) -> Option<MachineInventory> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let cached = entries.get(&machine.0)?;
        if cached.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(cached.inventory.clone())
    }

    pub fn set(&self, machine: &MachineId, inventory: MachineInventory) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            machine.0.clone(),
            CachedInventory {
                stored_at: Instant::now(),
                inventory,
            },
        );
    }

    pub fn invalidate(&self, machine: &MachineId) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&machine.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn inventory(machine: &str) -> MachineInventory {
        MachineInventory {
            machine_id: MachineId::from(machine),
            collected_at: Utc::now(),
            configuration: Default::default(),
            hardware: Default::default(),
            software: vec![],
            system: Default::default(),
        }
    }

    #[test]
    fn cache_hits_within_ttl() {
        let cache = InventoryCache::new(Duration::from_secs(60));
        let machine = MachineId::from("m");
        assert!(cache.get(&machine).is_none());
        cache.set(&machine, inventory("m"));
        assert!(cache.get(&machine).is_some());
    }

    #[test]
    fn cache_expires_after_ttl() {
        let cache = InventoryCache::new(Duration::from_millis(10));
        let machine = MachineId::from("m");
        cache.set(&machine, inventory("m"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&machine).is_none());
    }

    #[test]
    fn invalidate_evicts_immediately() {
        let cache = InventoryCache::new(Duration::from_secs(60));
        let machine = MachineId::from("m");
        cache.set(&machine, inventory("m"));
        cache.invalidate(&machine);
        assert!(cache.get(&machine).is_none());
    }

    #[tokio::test]
    async fn script_collector_surfaces_nonzero_exit() {
        struct FailRunner;
        #[async_trait]
        impl CommandRunner for FailRunner {
            async fn run(
                &self,
                _script: &Path,
                _args: &[String],
                _opts: &RunOptions,
            ) -> Result<CommandOutput, SyncError> {
                Ok(CommandOutput {
                    exit_code: 2,
                    stdout: String::new(),
                    stderr: "no such machine".into(),
                })
            }
        }

        let collector = ScriptInventoryCollector::new(
            std::sync::Arc::new(FailRunner),
            PathBuf::from("/opt/fleet/collect.sh"),
            Duration::from_secs(5),
        );
        let err = collector
            .collect_inventory(&MachineId::from("ghost"), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "COMPARISON_FAILED");
    }

    #[tokio::test]
    async fn script_collector_parses_null_as_none() {
        struct NullRunner;
        #[async_trait]
        impl CommandRunner for NullRunner {
            async fn run(
                &self,
                _script: &Path,
                _args: &[String],
                _opts: &RunOptions,
            ) -> Result<CommandOutput, SyncError> {
                Ok(CommandOutput {
                    exit_code: 0,
                    stdout: "null\n".into(),
                    stderr: String::new(),
                })
            }
        }

        let collector = ScriptInventoryCollector::new(
            std::sync::Arc::new(NullRunner),
            PathBuf::from("/opt/fleet/collect.sh"),
            Duration::from_secs(5),
        );
        let result = collector
            .collect_inventory(&MachineId::from("m"), false)
            .await
            .expect("collect");
        assert!(result.is_none());
    }
}

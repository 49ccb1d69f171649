//! Service configuration — `~/.flotilla/config.yaml`.
//!
//! # API pattern
//!
//! Every function that touches the filesystem has an `_at(home: &Path, …)`
//! form taking an explicit home; tests always use `_at` with a `TempDir`
//! and must never call the convenience wrappers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::paths;
use crate::types::MachineId;

/// Heartbeat liveness thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Expected interval between heartbeats from a healthy machine.
    pub interval_secs: u64,
    /// Missed-heartbeat count at which a machine enters `warning`.
    pub warn_threshold: u32,
    /// Heartbeat age at which a machine is declared `offline`.
    pub offline_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            warn_threshold: 3,
            offline_timeout_secs: 300,
        }
    }
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn offline_timeout(&self) -> Duration {
        Duration::from_secs(self.offline_timeout_secs)
    }
}

/// Commit-log retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSettings {
    /// Base delay for apply retries; doubled on each attempt.
    pub retry_delay_ms: u64,
    /// Apply attempts before an entry is marked `failed`.
    pub max_retry_attempts: u32,
    /// Append attempts before a sequence conflict is surfaced.
    pub max_append_attempts: u32,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            retry_delay_ms: 250,
            max_retry_attempts: 5,
            max_append_attempts: 5,
        }
    }
}

/// Inventory collection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySettings {
    /// External collector script; `None` disables script-backed collection.
    #[serde(default)]
    pub script_path: Option<PathBuf>,
    #[serde(default = "InventorySettings::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "InventorySettings::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            script_path: None,
            timeout_secs: Self::default_timeout_secs(),
            cache_ttl_secs: Self::default_cache_ttl_secs(),
        }
    }
}

impl InventorySettings {
    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_cache_ttl_secs() -> u64 {
        3600
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Root of the YAML service config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub machine_id: MachineId,
    /// Shared state location; defaults to `<home>/.flotilla/shared`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state_path: Option<PathBuf>,
    /// Where applied decision files land; defaults to
    /// `<home>/.flotilla/config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_root: Option<PathBuf>,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
    #[serde(default)]
    pub log: CommitSettings,
    #[serde(default)]
    pub inventory: InventorySettings,
}

impl ServiceConfig {
    /// Default config for a machine.
    pub fn new(machine_id: MachineId) -> Self {
        Self {
            machine_id,
            shared_state_path: None,
            config_root: None,
            heartbeat: HeartbeatSettings::default(),
            log: CommitSettings::default(),
            inventory: InventorySettings::default(),
        }
    }

    /// Resolved shared state root.
    pub fn shared_root(&self, home: &Path) -> PathBuf {
        self.shared_state_path
            .clone()
            .unwrap_or_else(|| paths::default_shared_root(home))
    }

    /// Resolved local config root.
    pub fn resolved_config_root(&self, home: &Path) -> PathBuf {
        self.config_root
            .clone()
            .unwrap_or_else(|| paths::default_config_root(home))
    }
}

/// Load the service config from `<home>/.flotilla/config.yaml`.
///
/// Returns `CoreError::ConfigNotFound` if absent.
pub fn load_at(home: &Path) -> Result<ServiceConfig, CoreError> {
    let path = paths::config_file(home);
    if !path.exists() {
        return Err(CoreError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<ServiceConfig, CoreError> {
    load_at(&home()?)
}

/// Atomically save the service config.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &ServiceConfig) -> Result<(), CoreError> {
    let path = paths::config_file(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(&path, std::io::Error::other("invalid config path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &ServiceConfig) -> Result<(), CoreError> {
    save_at(&home()?, config)
}

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

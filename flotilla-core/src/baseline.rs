//! Baseline document store.
//!
//! The baseline is a single JSON document at `<shared>/baseline.json`.
//! Writes use the same atomic `.tmp` + rename pattern as every other shared
//! state file. Timestamped backups land in `<shared>/backups/`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, CoreError};
use crate::paths;
use crate::types::{Baseline, MachineId};

/// Load the baseline from `<shared>/baseline.json`.
///
/// Returns `CoreError::BaselineNotFound` if absent.
pub fn load_at(shared: &Path) -> Result<Baseline, CoreError> {
    let path = paths::baseline_path(shared);
    if !path.exists() {
        return Err(CoreError::BaselineNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn exists_at(shared: &Path) -> bool {
    paths::baseline_path(shared).exists()
}

/// Atomically save the baseline.
pub fn save_at(shared: &Path, baseline: &Baseline) -> Result<(), CoreError> {
    let path = paths::baseline_path(shared);
    std::fs::create_dir_all(shared).map_err(|e| io_err(shared, e))?;

    let json = serde_json::to_string_pretty(baseline)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Create the baseline if missing and return it.
///
/// Idempotent: an existing baseline is loaded and returned unchanged.
pub fn init_at(shared: &Path, machine_id: MachineId) -> Result<Baseline, CoreError> {
    if exists_at(shared) {
        return load_at(shared);
    }
    let baseline = Baseline::new(machine_id);
    save_at(shared, &baseline)?;
    Ok(baseline)
}

/// Write a timestamped copy of the current baseline into
/// `<shared>/backups/` and return its path.
pub fn backup_at(shared: &Path) -> Result<PathBuf, CoreError> {
    let baseline = load_at(shared)?;
    let backups = paths::backups_dir(shared);
    std::fs::create_dir_all(&backups).map_err(|e| io_err(&backups, e))?;

    let path = paths::baseline_backup_path(shared, Utc::now());
    let json = serde_json::to_string_pretty(&baseline)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_baseline_returns_not_found() {
        let shared = TempDir::new().expect("tempdir");
        let err = load_at(shared.path()).unwrap_err();
        assert!(matches!(err, CoreError::BaselineNotFound { .. }));
    }

    #[test]
    fn init_is_idempotent() {
        let shared = TempDir::new().expect("tempdir");
        let first = init_at(shared.path(), MachineId::from("anchor-01")).expect("init");
        let second = init_at(shared.path(), MachineId::from("other")).expect("re-init");
        assert_eq!(second.machine_id, first.machine_id, "existing baseline wins");
    }

    #[test]
    fn save_load_roundtrip_preserves_version() {
        let shared = TempDir::new().expect("tempdir");
        let mut baseline = Baseline::new(MachineId::from("anchor-01"));
        baseline.version = semver::Version::new(2, 3, 1);
        save_at(shared.path(), &baseline).expect("save");
        let loaded = load_at(shared.path()).expect("load");
        assert_eq!(loaded.version, semver::Version::new(2, 3, 1));
    }

    #[test]
    fn backup_writes_timestamped_copy() {
        let shared = TempDir::new().expect("tempdir");
        init_at(shared.path(), MachineId::from("anchor-01")).expect("init");
        let backup = backup_at(shared.path()).expect("backup");
        assert!(backup.exists());
        let name = backup.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("baseline-") && name.ends_with(".json"));
    }

    #[test]
    fn save_cleans_up_tmp() {
        let shared = TempDir::new().expect("tempdir");
        let baseline = Baseline::new(MachineId::from("m"));
        save_at(shared.path(), &baseline).expect("save");
        let tmp = paths::baseline_path(shared.path()).with_extension("json.tmp");
        assert!(!tmp.exists());
    }
}

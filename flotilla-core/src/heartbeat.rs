//! Heartbeat record store — one JSON file per machine under
//! `<shared>/heartbeats/`.
//!
//! Each machine writes only its own record file, so steady-state heartbeat
//! traffic needs no cross-machine locking; the tracker in `flotilla-sync`
//! owns all mutation logic.

use std::path::Path;

use crate::error::{io_err, CoreError};
use crate::paths;
use crate::types::{HeartbeatRecord, MachineId};

/// Load a single machine's record, or `None` if it has never been seen.
pub fn load_record_at(
    shared: &Path,
    machine: &MachineId,
) -> Result<Option<HeartbeatRecord>, CoreError> {
    let path = paths::heartbeat_path(shared, &machine.0);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Atomically save a machine's record.
pub fn save_record_at(shared: &Path, record: &HeartbeatRecord) -> Result<(), CoreError> {
    let dir = paths::heartbeats_dir(shared);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let path = paths::heartbeat_path(shared, &record.machine_id.0);
    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// All known records, sorted by machine id for deterministic iteration.
pub fn list_records_at(shared: &Path) -> Result<Vec<HeartbeatRecord>, CoreError> {
    let dir = paths::heartbeats_dir(shared);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut records = Vec::new();
    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        // Skip in-flight .tmp siblings from concurrent writers.
        if !name.ends_with(".json") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path()).map_err(|e| io_err(entry.path(), e))?;
        records.push(serde_json::from_str(&contents)?);
    }
    Ok(records)
}

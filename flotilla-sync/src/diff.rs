//! Pure inventory-vs-baseline diffing.
//!
//! Differences land in four fixed severity bands by inventory area:
//! configuration = CRITICAL, hardware = IMPORTANT, software = WARNING,
//! system/OS = INFO.

use std::collections::BTreeSet;

use flotilla_core::types::{DiffCategory, DiffEntry, MachineInventory};

/// Compare `current` against the `reference` baseline entry.
pub fn compare(reference: &MachineInventory, current: &MachineInventory) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    diff_configuration(reference, current, &mut entries);
    diff_hardware(reference, current, &mut entries);
    diff_software(reference, current, &mut entries);
    diff_system(reference, current, &mut entries);
    entries
}

fn push(
    entries: &mut Vec<DiffEntry>,
    category: DiffCategory,
    path: String,
    description: String,
    recommended_action: Option<String>,
) {
    entries.push(DiffEntry {
        category,
        severity: category.severity(),
        path,
        description,
        recommended_action,
    });
}

fn diff_name_sets(
    entries: &mut Vec<DiffEntry>,
    category: DiffCategory,
    area: &str,
    reference: &[String],
    current: &[String],
    restore_hint: &str,
) {
    let reference: BTreeSet<&String> = reference.iter().collect();
    let current: BTreeSet<&String> = current.iter().collect();

    for missing in reference.difference(&current) {
        push(
            entries,
            category,
            format!("{area}/{missing}"),
            format!("'{missing}' is in the baseline but missing on the machine"),
            Some(restore_hint.to_string()),
        );
    }
    for extra in current.difference(&reference) {
        push(
            entries,
            category,
            format!("{area}/{extra}"),
            format!("'{extra}' is present on the machine but not in the baseline"),
            Some("propose a decision to adopt or remove it".to_string()),
        );
    }
}

fn diff_configuration(
    reference: &MachineInventory,
    current: &MachineInventory,
    entries: &mut Vec<DiffEntry>,
) {
    diff_name_sets(
        entries,
        DiffCategory::Configuration,
        "configuration/modes",
        &reference.configuration.modes,
        &current.configuration.modes,
        "restore the mode from the baseline",
    );
    diff_name_sets(
        entries,
        DiffCategory::Configuration,
        "configuration/mcp_servers",
        &reference.configuration.mcp_servers,
        &current.configuration.mcp_servers,
        "restore the MCP server entry from the baseline",
    );

    for (key, expected) in &reference.configuration.settings {
        match current.configuration.settings.get(key) {
            None => push(
                entries,
                DiffCategory::Configuration,
                format!("configuration/settings/{key}"),
                format!("setting '{key}' missing (baseline: '{expected}')"),
                Some("restore the setting from the baseline".into()),
            ),
            Some(actual) if actual != expected => push(
                entries,
                DiffCategory::Configuration,
                format!("configuration/settings/{key}"),
                format!("setting '{key}' is '{actual}', baseline expects '{expected}'"),
                Some("restore the setting from the baseline".into()),
            ),
            Some(_) => {}
        }
    }
    for key in current.configuration.settings.keys() {
        if !reference.configuration.settings.contains_key(key) {
            push(
                entries,
                DiffCategory::Configuration,
                format!("configuration/settings/{key}"),
                format!("setting '{key}' is not part of the baseline"),
                Some("propose a decision to adopt or remove it".into()),
            );
        }
    }
}

fn diff_hardware(
    reference: &MachineInventory,
    current: &MachineInventory,
    entries: &mut Vec<DiffEntry>,
) {
    let r = &reference.hardware;
    let c = &current.hardware;

    if r.cpu_model != c.cpu_model {
        push(
            entries,
            DiffCategory::Hardware,
            "hardware/cpu_model".into(),
            format!("cpu model changed: '{}' → '{}'", r.cpu_model, c.cpu_model),
            None,
        );
    }
    if r.cpu_cores != c.cpu_cores {
        push(
            entries,
            DiffCategory::Hardware,
            "hardware/cpu_cores".into(),
            format!("cpu cores changed: {} → {}", r.cpu_cores, c.cpu_cores),
            None,
        );
    }
    if r.memory_mb != c.memory_mb {
        push(
            entries,
            DiffCategory::Hardware,
            "hardware/memory_mb".into(),
            format!("memory changed: {} MB → {} MB", r.memory_mb, c.memory_mb),
            None,
        );
    }

    let reference_disks: BTreeSet<(&str, u64)> = r
        .disks
        .iter()
        .map(|d| (d.name.as_str(), d.capacity_gb))
        .collect();
    let current_disks: BTreeSet<(&str, u64)> = c
        .disks
        .iter()
        .map(|d| (d.name.as_str(), d.capacity_gb))
        .collect();
    for (name, capacity) in reference_disks.difference(&current_disks) {
        push(
            entries,
            DiffCategory::Hardware,
            format!("hardware/disks/{name}"),
            format!("disk '{name}' ({capacity} GB) missing or resized"),
            None,
        );
    }
    for (name, capacity) in current_disks.difference(&reference_disks) {
        push(
            entries,
            DiffCategory::Hardware,
            format!("hardware/disks/{name}"),
            format!("disk '{name}' ({capacity} GB) not in the baseline"),
            None,
        );
    }
}

fn diff_software(
    reference: &MachineInventory,
    current: &MachineInventory,
    entries: &mut Vec<DiffEntry>,
) {
    for package in &reference.software {
        match current.software.iter().find(|p| p.name == package.name) {
            None => push(
                entries,
                DiffCategory::Software,
                format!("software/{}", package.name),
                format!("'{}' ({}) is not installed", package.name, package.version),
                Some(format!("install {} {}", package.name, package.version)),
            ),
            Some(installed) if installed.version != package.version => push(
                entries,
                DiffCategory::Software,
                format!("software/{}", package.name),
                format!(
                    "'{}' version drift: {} installed, baseline expects {}",
                    package.name, installed.version, package.version
                ),
                None,
            ),
            Some(_) => {}
        }
    }
    for package in &current.software {
        if !reference.software.iter().any(|p| p.name == package.name) {
            push(
                entries,
                DiffCategory::Software,
                format!("software/{}", package.name),
                format!("'{}' is installed but not in the baseline", package.name),
                None,
            );
        }
    }
}

fn diff_system(
    reference: &MachineInventory,
    current: &MachineInventory,
    entries: &mut Vec<DiffEntry>,
) {
    let pairs = [
        ("os_name", &reference.system.os_name, &current.system.os_name),
        (
            "os_version",
            &reference.system.os_version,
            &current.system.os_version,
        ),
        (
            "hostname",
            &reference.system.hostname,
            &current.system.hostname,
        ),
        ("arch", &reference.system.arch, &current.system.arch),
    ];
    for (field, expected, actual) in pairs {
        if expected != actual {
            push(
                entries,
                DiffCategory::System,
                format!("system/{field}"),
                format!("{field} changed: '{expected}' → '{actual}'"),
                None,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flotilla_core::types::{MachineId, Severity, SoftwarePackage};

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
    fn identical_inventories_produce_no_diffs() {
        let reference = inventory("m");
        let current = reference.clone();
        assert!(compare(&reference, &current).is_empty());
    }

    #[test]
    fn missing_mode_is_critical() {
        let mut reference = inventory("m");
        reference.configuration.modes.push("architect".into());
        let current = inventory("m");

        let entries = compare(&reference, &current);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Critical);
        assert_eq!(entries[0].path, "configuration/modes/architect");
        assert!(entries[0].recommended_action.is_some());
    }

    #[test]
    fn setting_drift_reports_both_values() {
        let mut reference = inventory("m");
        reference
            .configuration
            .settings
            .insert("theme".into(), "dark".into());
        let mut current = inventory("m");
        current
            .configuration
            .settings
            .insert("theme".into(), "light".into());

        let entries = compare(&reference, &current);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].description.contains("dark"));
        assert!(entries[0].description.contains("light"));
    }

    #[test]
    fn hardware_and_system_bands() {
        let mut reference = inventory("m");
        reference.hardware.memory_mb = 32_768;
        reference.system.os_version = "6.8".into();
        let mut current = inventory("m");
        current.hardware.memory_mb = 16_384;
        current.system.os_version = "6.9".into();

        let entries = compare(&reference, &current);
        let hardware = entries
            .iter()
            .find(|e| e.path == "hardware/memory_mb")
            .expect("hardware diff");
        assert_eq!(hardware.severity, Severity::Important);
        let system = entries
            .iter()
            .find(|e| e.path == "system/os_version")
            .expect("system diff");
        assert_eq!(system.severity, Severity::Info);
    }

    #[test]
    fn software_version_drift_is_warning() {
        let mut reference = inventory("m");
        reference.software.push(SoftwarePackage {
            name: "git".into(),
            version: "2.44.0".into(),
        });
        let mut current = inventory("m");
        current.software.push(SoftwarePackage {
            name: "git".into(),
            version: "2.39.1".into(),
        });

        let entries = compare(&reference, &current);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Warning);
        assert!(entries[0].description.contains("version drift"));
    }
}

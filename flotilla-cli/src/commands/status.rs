//! `flotilla status` — fleet liveness at a glance.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use flotilla_core::heartbeat as hb_store;
use flotilla_core::types::{HeartbeatRecord, HeartbeatStatus};

/// Arguments for `flotilla status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson {
    machines: Vec<MachineJson>,
    online: usize,
    warning: usize,
    offline: usize,
}

#[derive(Serialize)]
struct MachineJson {
    machine_id: String,
    status: HeartbeatStatus,
    last_heartbeat: String,
    missed_heartbeats: u32,
    offline_since: Option<String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "machine")]
    machine: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "last heartbeat")]
    last_heartbeat: String,
    #[tabled(rename = "missed")]
    missed: u32,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let services = super::load_services(&home)?;

        let records =
            hb_store::list_records_at(&services.shared).context("failed to list heartbeats")?;

        if self.json {
            print_json(&records)?;
            return Ok(());
        }
        print_table(&services.config.machine_id.0, &records);
        Ok(())
    }
}

fn print_json(records: &[HeartbeatRecord]) -> Result<()> {
    let payload = StatusJson {
        online: count(records, HeartbeatStatus::Online),
        warning: count(records, HeartbeatStatus::Warning),
        offline: count(records, HeartbeatStatus::Offline),
        machines: records
            .iter()
            .map(|record| MachineJson {
                machine_id: record.machine_id.0.clone(),
                status: record.status,
                last_heartbeat: record.last_heartbeat.to_rfc3339(),
                missed_heartbeats: record.missed_heartbeats,
                offline_since: record.offline_since.map(|t| t.to_rfc3339()),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(own_machine: &str, records: &[HeartbeatRecord]) {
    println!(
        "Flotilla v{} | this machine: {} | {} tracked | {} online | {} offline",
        env!("CARGO_PKG_VERSION"),
        own_machine,
        records.len(),
        count(records, HeartbeatStatus::Online),
        count(records, HeartbeatStatus::Offline),
    );

    if records.is_empty() {
        println!("No machines tracked yet. Run `flotilla heartbeat` first.");
        return;
    }

    let rows: Vec<StatusTableRow> = records
        .iter()
        .map(|record| StatusTableRow {
            machine: record.machine_id.0.clone(),
            status: status_label(record.status),
            last_heartbeat: format_age_secs(
                chrono::Utc::now()
                    .signed_duration_since(record.last_heartbeat)
                    .num_seconds()
                    .max(0) as u64,
            ),
            missed: record.missed_heartbeats,
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn count(records: &[HeartbeatRecord], status: HeartbeatStatus) -> usize {
    records.iter().filter(|r| r.status == status).count()
}

fn status_label(status: HeartbeatStatus) -> String {
    match status {
        HeartbeatStatus::Online => "ONLINE".green().bold().to_string(),
        HeartbeatStatus::Warning => "WARNING".yellow().bold().to_string(),
        HeartbeatStatus::Offline => "OFFLINE".red().bold().to_string(),
    }
}

fn format_age_secs(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s ago");
    }
    if seconds < 60 * 60 {
        return format!("{}m ago", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h ago", seconds / (60 * 60));
    }
    format!("{}d ago", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_formatting_is_compact() {
        assert_eq!(format_age_secs(5), "5s ago");
        assert_eq!(format_age_secs(65), "1m ago");
        assert_eq!(format_age_secs(7200), "2h ago");
        assert_eq!(format_age_secs(200_000), "2d ago");
    }
}

//! `flotilla compare` — baseline comparison with severity bands.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use flotilla_core::types::{MachineId, Severity};
use flotilla_sync::ComparisonReport;

/// Arguments for `flotilla compare`.
#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Machine to compare; defaults to this machine.
    pub machine: Option<String>,

    /// Bypass the inventory cache.
    #[arg(long)]
    pub force_refresh: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CompareArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let services = super::load_services(&home)?;

        let Some(comparator) = services.comparator.as_ref() else {
            bail!("no inventory collector configured — set inventory.script_path in config.yaml");
        };
        let machine = self
            .machine
            .map(MachineId::from)
            .unwrap_or_else(|| services.config.machine_id.clone());

        let report = super::runtime()?
            .block_on(comparator.compare_with_baseline(&machine, self.force_refresh))
            .with_context(|| format!("comparison failed for '{machine}'"))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &ComparisonReport) {
    println!(
        "'{}' vs baseline {} — {} critical, {} important, {} warning, {} info",
        report.machine_id,
        report.baseline_version,
        report.summary.critical,
        report.summary.important,
        report.summary.warning,
        report.summary.info,
    );

    if report.is_clean() {
        println!("✓ no differences");
        return;
    }

    for entry in &report.entries {
        println!(
            "  {} {}  {}",
            severity_label(entry.severity),
            entry.path,
            entry.description
        );
        if let Some(action) = &entry.recommended_action {
            println!("      → {action}");
        }
    }
}

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Critical => "CRITICAL ".red().bold().to_string(),
        Severity::Important => "IMPORTANT".yellow().bold().to_string(),
        Severity::Warning => "WARNING  ".blue().bold().to_string(),
        Severity::Info => "INFO     ".bright_black().to_string(),
    }
}

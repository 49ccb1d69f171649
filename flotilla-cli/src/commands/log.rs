//! `flotilla log` — inspect and verify the shared commit log.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use flotilla_core::types::MachineId;
use flotilla_log::{CommitStatus, CommitType, EntryFilter, FaultSeverity, Pagination};

#[derive(Subcommand, Debug)]
pub enum LogCommand {
    /// Show entries in sequence order.
    Show(ShowArgs),
    /// Recompute every hash and the chain; report faults.
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Filter by status: pending, applied, failed, rolled_back.
    #[arg(long)]
    pub status: Option<String>,

    /// Filter by type: decision, config, baseline, heartbeat, system.
    #[arg(long = "type")]
    pub entry_type: Option<String>,

    /// Filter by originating machine.
    #[arg(long)]
    pub machine: Option<String>,

    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: LogCommand) -> Result<()> {
    let home = super::home()?;
    let services = super::load_services(&home)?;
    let log = &services.log;

    match command {
        LogCommand::Show(args) => {
            let filter = EntryFilter {
                status: args.status.as_deref().map(parse_status).transpose()?,
                entry_type: args.entry_type.as_deref().map(parse_type).transpose()?,
                machine_id: args.machine.map(MachineId::from),
                since_sequence: None,
            };
            let page = log.get_entries(
                &filter,
                &Pagination {
                    offset: args.offset,
                    limit: args.limit,
                },
            )?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&page.entries)?);
                return Ok(());
            }

            println!(
                "{} matching entries ({} shown, next sequence {})",
                page.total_count,
                page.entries.len(),
                page.next_sequence_number
            );
            for entry in &page.entries {
                println!(
                    "  #{:>5}  {:<10} {:<12} {}  {}",
                    entry.sequence_number,
                    entry.entry_type.to_string(),
                    entry.status.to_string(),
                    entry.machine_id,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                );
            }
            if page.has_more {
                println!("  … use --offset {} for more", args.offset + args.limit);
            }
        }
        LogCommand::Verify(args) => {
            let report = log.verify_consistency()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            if report.is_consistent {
                println!(
                    "{} commit log is consistent ({} entries)",
                    "✓".green().bold(),
                    report.statistics.total_entries
                );
                return Ok(());
            }

            println!(
                "{} {} fault(s) found",
                "✗".red().bold(),
                report.inconsistent_entries.len()
            );
            for fault in &report.inconsistent_entries {
                println!(
                    "  {} entry {}: {}",
                    severity_label(fault.severity),
                    fault.sequence_number,
                    fault.reason
                );
            }
            for recommendation in &report.recommendations {
                println!("  → {recommendation}");
            }
        }
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<CommitStatus> {
    Ok(match raw {
        "pending" => CommitStatus::Pending,
        "applied" => CommitStatus::Applied,
        "failed" => CommitStatus::Failed,
        "rolled_back" => CommitStatus::RolledBack,
        other => bail!("unknown status '{other}'; expected pending, applied, failed, rolled_back"),
    })
}

fn parse_type(raw: &str) -> Result<CommitType> {
    Ok(match raw {
        "decision" => CommitType::Decision,
        "config" => CommitType::Config,
        "baseline" => CommitType::Baseline,
        "heartbeat" => CommitType::Heartbeat,
        "system" => CommitType::System,
        other => bail!(
            "unknown type '{other}'; expected decision, config, baseline, heartbeat, system"
        ),
    })
}

fn severity_label(severity: FaultSeverity) -> String {
    match severity {
        FaultSeverity::High => "HIGH  ".red().bold().to_string(),
        FaultSeverity::Medium => "MEDIUM".yellow().bold().to_string(),
        FaultSeverity::Low => "LOW   ".bright_black().to_string(),
    }
}

//! `flotilla decision` — the decision lifecycle from the command line.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use flotilla_core::types::{
    Decision, DecisionId, DecisionParameters, DecisionStatus, DecisionTarget, MachineId,
};
use flotilla_sync::ApplyOptions;

#[derive(Subcommand, Debug)]
pub enum DecisionCommand {
    /// Propose a configuration change.
    Propose(ProposeArgs),
    /// Approve a pending decision.
    Approve(ApproveArgs),
    /// Reject a pending decision (terminal).
    Reject(IdArg),
    /// Apply an approved decision.
    Apply(ApplyArgs),
    /// Roll an applied decision back.
    Rollback(RollbackArgs),
    /// List all decisions.
    List(ListArgs),
    /// Show one decision.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct ProposeArgs {
    /// Target machine for the change.
    #[arg(long)]
    pub machine: Option<String>,

    /// Change spec `<relative-path>=<content-file>`; repeatable.
    #[arg(long = "change", required = true)]
    pub changes: Vec<String>,

    /// Free-form note recorded with the decision.
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug)]
pub struct ApproveArgs {
    pub id: String,

    /// Who approves; defaults to this machine's id.
    #[arg(long)]
    pub by: Option<String>,

    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Args, Debug)]
pub struct IdArg {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    pub id: String,

    /// Baseline version gate (`latest` or a semver whose major must
    /// match).
    #[arg(long)]
    pub version: Option<String>,

    /// Restrict the apply to these relative paths; repeatable.
    #[arg(long = "target")]
    pub targets: Vec<String>,

    /// Skip persisting the rollback point file.
    #[arg(long)]
    pub no_backup: bool,

    /// Show what would change without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    pub id: String,

    /// Audit reason for the rollback.
    #[arg(long)]
    pub reason: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: String,

    #[arg(long)]
    pub json: bool,
}

pub fn run(command: DecisionCommand) -> Result<()> {
    let home = super::home()?;
    let services = super::load_services(&home)?;
    let coordinator = &services.coordinator;

    match command {
        DecisionCommand::Propose(args) => {
            let mut changes = BTreeMap::new();
            for spec in &args.changes {
                let Some((path, file)) = spec.split_once('=') else {
                    bail!("invalid change spec '{spec}'; expected <relative-path>=<content-file>");
                };
                let content = std::fs::read_to_string(PathBuf::from(file))
                    .with_context(|| format!("failed to read content file '{file}'"))?;
                changes.insert(path.to_string(), content);
            }
            let machine = args
                .machine
                .map(MachineId::from)
                .unwrap_or_else(|| services.config.machine_id.clone());

            let decision = coordinator.propose(
                DecisionTarget {
                    machine_id: Some(machine),
                    config_path: None,
                    baseline_id: None,
                },
                DecisionParameters {
                    changes,
                    note: args.note,
                },
            )?;
            println!("✓ proposed decision {}", decision.id);
        }
        DecisionCommand::Approve(args) => {
            let id = parse_id(&args.id)?;
            let by = args
                .by
                .unwrap_or_else(|| services.config.machine_id.0.clone());
            let decision = coordinator.approve(&id, &by, args.comment)?;
            println!("✓ approved decision {} (by {by})", decision.id);
        }
        DecisionCommand::Reject(args) => {
            let id = parse_id(&args.id)?;
            coordinator.reject(&id)?;
            println!("✓ rejected decision {id}");
        }
        DecisionCommand::Apply(args) => {
            let id = parse_id(&args.id)?;
            let opts = ApplyOptions {
                version: args.version,
                targets: if args.targets.is_empty() {
                    None
                } else {
                    Some(args.targets)
                },
                backup: !args.no_backup,
                dry_run: args.dry_run,
            };
            let report = coordinator.apply(&id, &opts)?;

            if report.dry_run {
                println!("[dry-run] decision {id} would change:");
                for preview in &report.previews {
                    println!("{}", preview.unified_diff);
                }
                if report.previews.is_empty() {
                    println!("  nothing — already in the desired state");
                }
            } else {
                println!(
                    "✓ applied decision {id} ({} written, {} errors)",
                    report.files_applied.len(),
                    report.errors.len()
                );
                for path in &report.files_applied {
                    println!("  ✎  {path}");
                }
            }
            for error in &report.errors {
                println!("  ✗  {}: {}", error.path, error.detail);
            }
        }
        DecisionCommand::Rollback(args) => {
            let id = parse_id(&args.id)?;
            let report = coordinator.rollback(&id, &args.reason)?;
            println!(
                "✓ rolled back decision {id} ({} restored)",
                report.files_restored.len()
            );
        }
        DecisionCommand::List(args) => {
            let decisions = coordinator.list()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&decisions)?);
                return Ok(());
            }
            if decisions.is_empty() {
                println!("No decisions yet.");
                return Ok(());
            }
            for decision in &decisions {
                print_summary(decision);
            }
        }
        DecisionCommand::Show(args) => {
            let id = parse_id(&args.id)?;
            let decision = coordinator.get(&id)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&decision)?);
                return Ok(());
            }
            print_summary(&decision);
            for (path, _) in &decision.parameters.changes {
                println!("    change: {path}");
            }
            if let Some(reason) = &decision.reason {
                println!("    reason: {reason}");
            }
        }
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<DecisionId> {
    raw.parse::<DecisionId>()
        .with_context(|| format!("'{raw}' is not a valid decision id"))
}

fn print_summary(decision: &Decision) {
    let target = decision
        .target
        .machine_id
        .as_ref()
        .map(|machine| machine.0.as_str())
        .unwrap_or("-");
    println!(
        "  {} {} → {}  ({} file(s), created {})",
        status_label(decision.status),
        decision.id,
        target,
        decision.parameters.changes.len(),
        decision.created_at.format("%Y-%m-%d %H:%M"),
    );
}

fn status_label(status: DecisionStatus) -> String {
    match status {
        DecisionStatus::Pending => "PENDING ".yellow().bold().to_string(),
        DecisionStatus::Approved => "APPROVED".green().bold().to_string(),
        DecisionStatus::Rejected => "REJECTED".bright_black().bold().to_string(),
        DecisionStatus::Applied => "APPLIED ".blue().bold().to_string(),
        DecisionStatus::RolledBack => "ROLLED  ".red().bold().to_string(),
    }
}

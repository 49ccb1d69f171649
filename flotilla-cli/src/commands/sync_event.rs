//! `flotilla sync-event` — run offline/online reactions by hand.

use anyhow::Result;
use clap::{Args, Subcommand};

use flotilla_core::types::MachineId;
use flotilla_sync::SyncEventOptions;

#[derive(Subcommand, Debug)]
pub enum SyncEventCommand {
    /// Handle a machine going offline (baseline backup + audit entry).
    Offline(EventArgs),
    /// Handle a machine coming back online (reconcile + audit entry).
    Online(EventArgs),
}

#[derive(Args, Debug)]
pub struct EventArgs {
    pub machine: String,

    /// Skip the baseline backup (offline events only).
    #[arg(long)]
    pub no_backup: bool,

    /// Simulate without touching any state.
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(command: SyncEventCommand) -> Result<()> {
    let home = super::home()?;
    let services = super::load_services(&home)?;

    match command {
        SyncEventCommand::Offline(args) => {
            let machine = MachineId::from(args.machine.clone());
            let opts = SyncEventOptions {
                create_backup: !args.no_backup,
                dry_run: args.dry_run,
            };
            let report = services.events.handle_offline(&machine, &opts)?;
            if report.simulated {
                println!("[dry-run] offline event for '{machine}' would succeed");
            } else {
                match &report.backup_path {
                    Some(path) => println!(
                        "✓ offline event for '{machine}' — baseline backed up to {}",
                        path.display()
                    ),
                    None => println!("✓ offline event for '{machine}' — no backup"),
                }
            }
        }
        SyncEventCommand::Online(args) => {
            let machine = MachineId::from(args.machine.clone());
            let opts = SyncEventOptions {
                create_backup: !args.no_backup,
                dry_run: args.dry_run,
            };
            let report = services.events.handle_online(&machine, &opts)?;
            if report.simulated {
                println!(
                    "[dry-run] online event for '{machine}' (offline for {}s)",
                    report.offline_duration_secs
                );
            } else {
                println!(
                    "✓ online event for '{machine}' — offline {}s, {} synced, {} conflicts, {} decisions",
                    report.offline_duration_secs,
                    report.files_synced,
                    report.conflicts_resolved,
                    report.decisions_created,
                );
            }
        }
    }
    Ok(())
}

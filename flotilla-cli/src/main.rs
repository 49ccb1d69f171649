//! Flotilla — fleet configuration sync CLI.
//!
//! # Usage
//!
//! ```text
//! flotilla init <machine-id> [--shared <path>]
//! flotilla heartbeat [--machine <id>]
//! flotilla check [--force] [--json]
//! flotilla status [--json]
//! flotilla compare [<machine>] [--force-refresh] [--json]
//! flotilla decision propose|approve|reject|apply|rollback|list|show …
//! flotilla log show|verify [--json]
//! flotilla sync-event online|offline <machine> [--no-backup] [--dry-run]
//! flotilla daemon start|status|stop
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check::CheckArgs, compare::CompareArgs, daemon::DaemonCommand, decision::DecisionCommand,
    heartbeat::HeartbeatArgs, init::InitArgs, log::LogCommand, status::StatusArgs,
    sync_event::SyncEventCommand,
};

#[derive(Parser, Debug)]
#[command(
    name = "flotilla",
    version,
    about = "Keep configuration state consistent across an intermittently-offline fleet",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the service config and scaffold the shared state.
    Init(InitArgs),

    /// Register a heartbeat for this machine.
    Heartbeat(HeartbeatArgs),

    /// Evaluate heartbeats and report liveness transitions.
    Check(CheckArgs),

    /// Show the liveness of every tracked machine.
    Status(StatusArgs),

    /// Compare a machine's inventory against the baseline.
    Compare(CompareArgs),

    /// Manage the decision lifecycle.
    Decision {
        #[command(subcommand)]
        command: DecisionCommand,
    },

    /// Inspect and verify the shared commit log.
    Log {
        #[command(subcommand)]
        command: LogCommand,
    },

    /// Run an offline/online sync event for a machine.
    SyncEvent {
        #[command(subcommand)]
        command: SyncEventCommand,
    },

    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Heartbeat(args) => args.run(),
        Commands::Check(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Compare(args) => args.run(),
        Commands::Decision { command } => commands::decision::run(command),
        Commands::Log { command } => commands::log::run(command),
        Commands::SyncEvent { command } => commands::sync_event::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

//! `flotilla daemon` — run and control the background daemon.

use anyhow::{Context, Result};
use clap::Subcommand;

use flotilla_daemon::{request_check, request_status, request_stop, start_blocking};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground.
    Start,
    /// Query the running daemon.
    Status,
    /// Ask the running daemon for an immediate heartbeat check.
    Check,
    /// Stop the running daemon.
    Stop,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with an error")?;
        }
        DaemonCommand::Status => {
            let status = request_status(&home).context("daemon is not reachable")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        DaemonCommand::Check => {
            request_check(&home).context("daemon is not reachable")?;
            println!("✓ check queued");
        }
        DaemonCommand::Stop => {
            request_stop(&home).context("failed to stop daemon")?;
            println!("✓ daemon stopping");
        }
    }
    Ok(())
}

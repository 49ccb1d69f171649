//! `flotilla check` — evaluate heartbeats and print transitions.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

/// Arguments for `flotilla check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Wait for an in-progress check instead of skipping.
    #[arg(long)]
    pub force: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let services = super::load_services(&home)?;

        let delta = super::runtime()?
            .block_on(services.tracker.check_heartbeats(self.force))
            .context("heartbeat check failed")?;

        let Some(delta) = delta else {
            println!("check already in progress; skipped");
            return Ok(());
        };

        if self.json {
            let payload = json!({
                "checked_at": delta.checked_at,
                "newly_offline": delta.newly_offline,
                "newly_online": delta.newly_online,
                "warning": delta.warning,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            return Ok(());
        }

        if delta.is_empty() {
            println!("✓ no transitions");
            return Ok(());
        }
        for machine in &delta.newly_offline {
            println!("  ✗ {machine} went offline");
        }
        for machine in &delta.newly_online {
            println!("  ✓ {machine} came online");
        }
        for machine in &delta.warning {
            println!("  ! {machine} is missing heartbeats");
        }
        Ok(())
    }
}

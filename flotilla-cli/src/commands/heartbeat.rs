//! `flotilla heartbeat` — register a liveness signal.

use anyhow::{Context, Result};
use clap::Args;

use flotilla_core::types::{HeartbeatStatus, MachineId};

/// Arguments for `flotilla heartbeat`.
#[derive(Args, Debug)]
pub struct HeartbeatArgs {
    /// Register for a machine other than this one.
    #[arg(long)]
    pub machine: Option<String>,
}

impl HeartbeatArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let services = super::load_services(&home)?;

        let machine = self
            .machine
            .map(MachineId::from)
            .unwrap_or_else(|| services.config.machine_id.clone());

        let prior = services
            .tracker
            .register_heartbeat(&machine, None)
            .with_context(|| format!("failed to register heartbeat for '{machine}'"))?;

        if prior == HeartbeatStatus::Offline {
            println!("✓ heartbeat registered for '{machine}' — back online");
        } else {
            println!("✓ heartbeat registered for '{machine}'");
        }
        Ok(())
    }
}

//! `flotilla init` — write the service config and scaffold shared state.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use flotilla_core::types::MachineId;
use flotilla_core::{baseline, config, paths, ServiceConfig};

/// Arguments for `flotilla init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Identity of this machine in the fleet.
    pub machine_id: String,

    /// Shared state location (network mount, synced folder). Defaults to
    /// `~/.flotilla/shared`.
    #[arg(long)]
    pub shared: Option<PathBuf>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;

        if let Ok(existing) = config::load_at(&home) {
            println!(
                "✓ already initialized as '{}' (config: {})",
                existing.machine_id,
                paths::config_file(&home).display()
            );
            return Ok(());
        }

        let mut service_config = ServiceConfig::new(MachineId::from(self.machine_id.clone()));
        service_config.shared_state_path = self.shared.clone();
        config::save_at(&home, &service_config).context("failed to write service config")?;

        let shared = service_config.shared_root(&home);
        std::fs::create_dir_all(paths::heartbeats_dir(&shared))
            .with_context(|| format!("failed to create {}", shared.display()))?;
        std::fs::create_dir_all(paths::decisions_dir(&shared))
            .context("failed to create decisions dir")?;
        std::fs::create_dir_all(paths::backups_dir(&shared))
            .context("failed to create backups dir")?;

        baseline::init_at(&shared, service_config.machine_id.clone())
            .context("failed to initialize baseline")?;

        println!("✓ initialized '{}'", self.machine_id);
        println!("  config: {}", paths::config_file(&home).display());
        println!("  shared: {}", shared.display());
        Ok(())
    }
}

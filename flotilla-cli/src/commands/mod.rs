pub mod check;
pub mod compare;
pub mod daemon;
pub mod decision;
pub mod heartbeat;
pub mod init;
pub mod log;
pub mod status;
pub mod sync_event;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use flotilla_core::config;
use flotilla_sync::Services;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_services(home: &Path) -> Result<Services> {
    let config =
        config::load_at(home).context("no service config found — run `flotilla init` first")?;
    Services::build(home, config, None).context("failed to build the service graph")
}

/// Multi-thread runtime for the async surfaces (comparator, heartbeat
/// check).
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

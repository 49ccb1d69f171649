use std::path::{Path, PathBuf};
use std::time::Duration;

use flotilla_core::paths::flotilla_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub fn run_dir(home: &Path) -> PathBuf {
    flotilla_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DAEMON_SOCKET: &str = "foreman.sock";
pub const KNOWLEDGE_FILE: &str = "knowledge_base.json";

/// Periodic activity cadences.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const AGING_INTERVAL: Duration = Duration::from_secs(120);
pub const KNOWLEDGE_FLUSH_INTERVAL: Duration = Duration::from_secs(300);

/// Bound on any external process the daemon spawns.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub fn foreman_root(home: &Path) -> PathBuf {
    home.join(".foreman")
}

/// Directory holding the state document and its backup.
pub fn state_dir(home: &Path) -> PathBuf {
    foreman_root(home)
}

pub fn run_dir(home: &Path) -> PathBuf {
    foreman_root(home).join("run")
}

pub fn logs_dir(home: &Path) -> PathBuf {
    foreman_root(home).join("logs")
}

pub fn socket_path(home: &Path) -> PathBuf {
    foreman_root(home).join(DAEMON_SOCKET)
}

pub fn knowledge_path(home: &Path) -> PathBuf {
    foreman_root(home).join(KNOWLEDGE_FILE)
}

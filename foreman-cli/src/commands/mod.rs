pub mod agent;
pub mod daemon;
pub mod finding;
pub mod system;
pub mod task;
pub mod worktree;

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;

/// Home directory the daemon paths hang off.
pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}

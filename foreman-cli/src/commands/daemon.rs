//! `foreman daemon` — daemon lifecycle over the Unix socket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use foreman_daemon::paths::socket_path;
use foreman_daemon::{request_shutdown, request_status, start_blocking, DaemonError};

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (socket server + periodic activities).
    Start(StartArgs),
    /// Request graceful daemon shutdown.
    Stop,
    /// Query daemon runtime status.
    Status,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Repository root used for agent worktrees.
    #[arg(long = "repo-root", default_value = ".")]
    pub repo_root: PathBuf,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home()?;

    match command {
        DaemonCommand::Start(args) => {
            start_blocking(&home, &args.repo_root).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_shutdown(&home) {
            Ok(()) => println!("daemon shutdown requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                print_json(&payload)?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}

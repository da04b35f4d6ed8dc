//! `foreman worktree` — agent workspace provisioning.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use foreman_daemon::call_op;

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum WorktreeCommand {
    /// Create (or reuse) a git worktree for a branch.
    Create(CreateArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Branch name; only [A-Za-z0-9/_-] is accepted.
    pub branch: String,
}

pub fn run(command: WorktreeCommand) -> Result<()> {
    let home = home()?;

    let WorktreeCommand::Create(args) = command;
    let result = call_op(
        &home,
        "create_worktree",
        json!({ "branch_name": args.branch }),
    )
    .context("failed to create worktree")?;

    print_json(&result)
}

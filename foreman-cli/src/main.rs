//! Foreman — agent coordination CLI.
//!
//! # Usage
//!
//! ```text
//! foreman agent register <id> --role <role> [--capability <cap>]...
//! foreman agent health <id>
//! foreman agent recover <id>
//! foreman task create --task-type <type> --description <text> [--priority <p>] [--depends-on <id>]...
//! foreman task next --agent-id <id> --role <role>
//! foreman task update <task-id> <status> [--result <json>]
//! foreman finding submit --title <t> --description <d> --severity <s> --category <c> [--file <path>] [--line <n>]
//! foreman system health|context
//! foreman worktree create <branch>
//! foreman daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    agent::AgentCommand, daemon::DaemonCommand, finding::FindingCommand, system::SystemCommand,
    task::TaskCommand, worktree::WorktreeCommand,
};

#[derive(Parser, Debug)]
#[command(
    name = "foreman",
    version,
    about = "Coordinate a fleet of worker agents: tasks, findings, health",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register, inspect, and recover worker agents.
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Create, poll, and update tasks.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Submit audit findings.
    Finding {
        #[command(subcommand)]
        command: FindingCommand,
    },

    /// System-wide health and project context reports.
    System {
        #[command(subcommand)]
        command: SystemCommand,
    },

    /// Provision git worktrees for agent workspaces.
    Worktree {
        #[command(subcommand)]
        command: WorktreeCommand,
    },

    /// Manage the Foreman background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Agent { command } => commands::agent::run(command),
        Commands::Task { command } => commands::task::run(command),
        Commands::Finding { command } => commands::finding::run(command),
        Commands::System { command } => commands::system::run(command),
        Commands::Worktree { command } => commands::worktree::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tree_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

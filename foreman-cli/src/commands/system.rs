//! `foreman system` — system-wide reports.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use foreman_daemon::call_op;

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum SystemCommand {
    /// System health: agent and task counts, completion rate, patterns.
    Health,
    /// Aggregated project context with derived insights.
    Context,
}

pub fn run(command: SystemCommand) -> Result<()> {
    let home = home()?;

    match command {
        SystemCommand::Health => {
            let result = call_op(&home, "get_system_health", Value::Null)
                .context("failed to fetch system health")?;
            print_status_line(&result);
            print_json(&result)
        }
        SystemCommand::Context => {
            let result = call_op(&home, "get_project_context", Value::Null)
                .context("failed to fetch project context")?;
            print_json(&result)
        }
    }
}

fn print_status_line(health: &Value) {
    if let Some(status) = health["status"].as_str() {
        let rendered = match status {
            "healthy" => status.green().bold(),
            _ => status.yellow().bold(),
        };
        println!("system status: {rendered}");
    }
}

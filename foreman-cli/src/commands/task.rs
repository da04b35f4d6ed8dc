//! `foreman task` — task creation, polling, and status updates.

use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};

use foreman_core::types::{Priority, TaskStatus};
use foreman_daemon::call_op;

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Create a task in the priority queue.
    Create(CreateArgs),
    /// Poll for the next suitable task for an agent.
    Next(NextArgs),
    /// Report a task status transition.
    Update(UpdateArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Task type, e.g. audit, plan, implement, test, review.
    #[arg(long = "task-type")]
    pub task_type: String,

    /// Human-readable description of the work.
    #[arg(long)]
    pub description: String,

    /// Priority: critical, high, medium, low.
    #[arg(long)]
    pub priority: Option<String>,

    /// Task id this one depends on; repeat for multiple.
    #[arg(long = "depends-on")]
    pub dependencies: Vec<String>,

    /// Extra context as a JSON object.
    #[arg(long)]
    pub context: Option<String>,
}

#[derive(Args, Debug)]
pub struct NextArgs {
    #[arg(long = "agent-id")]
    pub agent_id: String,

    #[arg(long)]
    pub role: String,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub task_id: String,

    /// New status: pending, in_progress, completed, failed.
    pub status: String,

    /// Result payload as JSON.
    #[arg(long)]
    pub result: Option<String>,
}

pub fn run(command: TaskCommand) -> Result<()> {
    let home = home()?;

    let result = match command {
        TaskCommand::Create(args) => {
            let priority = args
                .priority
                .as_deref()
                .map(|p| Priority::from_str(p).map_err(anyhow::Error::msg))
                .transpose()?;
            let context = args
                .context
                .as_deref()
                .map(parse_json_arg)
                .transpose()
                .context("--context must be a JSON object")?;
            call_op(
                &home,
                "create_task",
                json!({
                    "type": args.task_type,
                    "description": args.description,
                    "priority": priority.map(|p| p.to_string()),
                    "dependencies": args.dependencies,
                    "context": context,
                }),
            )
            .context("failed to create task")?
        }
        TaskCommand::Next(args) => {
            let result = call_op(
                &home,
                "get_next_task",
                json!({ "agent_id": args.agent_id, "agent_role": args.role }),
            )
            .context("failed to poll for a task")?;
            if result.is_null() {
                println!("no suitable task available");
                return Ok(());
            }
            result
        }
        TaskCommand::Update(args) => {
            let status: TaskStatus = args.status.parse().map_err(anyhow::Error::msg)?;
            let result = args
                .result
                .as_deref()
                .map(parse_json_arg)
                .transpose()
                .context("--result must be valid JSON")?;
            call_op(
                &home,
                "update_task",
                json!({
                    "task_id": args.task_id,
                    "status": status.to_string(),
                    "result": result,
                }),
            )
            .context("failed to update task")?
        }
    };

    print_json(&result)
}

fn parse_json_arg(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON: {raw}"))
}

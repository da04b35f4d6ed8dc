//! `foreman agent` — worker registration, health, and recovery.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use foreman_daemon::call_op;

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
    /// Register (or re-register) an agent with the coordinator.
    Register(RegisterArgs),
    /// Show one agent's health report.
    Health(AgentIdArg),
    /// Requeue an agent's tasks and put it into recovery.
    Recover(AgentIdArg),
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Unique agent id, e.g. coder-001.
    pub id: String,

    /// Agent role: auditor, planner, coder, tester, reviewer.
    #[arg(long)]
    pub role: String,

    /// Capability tag; repeat for multiple.
    #[arg(long = "capability")]
    pub capabilities: Vec<String>,
}

#[derive(Args, Debug)]
pub struct AgentIdArg {
    pub id: String,
}

pub fn run(command: AgentCommand) -> Result<()> {
    let home = home()?;

    let result = match command {
        AgentCommand::Register(args) => call_op(
            &home,
            "register_agent",
            json!({
                "id": args.id,
                "role": args.role,
                "capabilities": args.capabilities,
            }),
        )
        .context("failed to register agent")?,
        AgentCommand::Health(args) => call_op(
            &home,
            "get_agent_health",
            json!({ "agent_id": args.id }),
        )
        .context("failed to fetch agent health")?,
        AgentCommand::Recover(args) => call_op(
            &home,
            "recover_agent",
            json!({ "agent_id": args.id }),
        )
        .context("failed to recover agent")?,
    };

    print_json(&result)
}

//! `foreman finding` — audit finding submission.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use foreman_daemon::call_op;

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum FindingCommand {
    /// Submit an audit finding; new findings spawn a planning task.
    Submit(SubmitArgs),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub description: String,

    /// Severity: critical, high, medium, low.
    #[arg(long)]
    pub severity: String,

    /// Category, e.g. security, performance, correctness.
    #[arg(long)]
    pub category: String,

    /// File the finding points at.
    #[arg(long)]
    pub file: Option<String>,

    /// Line number within the file.
    #[arg(long)]
    pub line: Option<u64>,
}

pub fn run(command: FindingCommand) -> Result<()> {
    let home = home()?;

    let FindingCommand::Submit(args) = command;
    let result = call_op(
        &home,
        "submit_audit_finding",
        json!({
            "title": args.title,
            "description": args.description,
            "severity": args.severity,
            "category": args.category,
            "file_path": args.file,
            "line_number": args.line,
        }),
    )
    .context("failed to submit finding")?;

    print_json(&result)
}

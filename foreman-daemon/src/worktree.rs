//! Git worktree provisioning for agent workspaces.
//!
//! Every git call goes through [`run_git`], which enforces the engine's
//! command whitelist and bounds the process with [`COMMAND_TIMEOUT`]. A
//! stalled git can therefore stall one request, never the daemon.

use std::path::{Path, PathBuf};
use std::process::Output;

use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use foreman_core::error::CoordinatorError;
use foreman_engine::worktree::{ensure_command_allowed, validate_branch_name};

use crate::paths::COMMAND_TIMEOUT;

const WORKSPACES_DIR: &str = "agent-workspaces";
const ADD_ATTEMPTS: u32 = 3;

/// Create (or reuse) a worktree for `branch` under `agent-workspaces/`.
pub async fn create_worktree(repo_root: &Path, branch: &str) -> Result<Value, CoordinatorError> {
    validate_branch_name(branch)?;
    ensure_repo(repo_root).await?;

    let path = workspace_path(repo_root, branch);
    if path.exists() {
        tracing::info!(branch, path = %path.display(), "worktree already provisioned");
        return Ok(worktree_payload(&path, branch, false));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            CoordinatorError::Transient(format!(
                "cannot create workspace parent {}: {err}",
                parent.display()
            ))
        })?;
    }

    let path_arg = path.display().to_string();
    let mut last_failure = String::new();
    for attempt in 1..=ADD_ATTEMPTS {
        let output = run_git(
            repo_root,
            &["worktree", "add", "-b", branch, &path_arg],
        )
        .await?;
        if output.status.success() {
            tracing::info!(branch, path = %path_arg, attempt, "worktree created");
            return Ok(worktree_payload(&path, branch, true));
        }

        last_failure = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::warn!(branch, attempt, error = %last_failure, "worktree add failed, pruning");
        // Stale worktree metadata is the usual culprit; prune and retry.
        let _ = run_git(repo_root, &["worktree", "prune"]).await?;
    }

    Err(CoordinatorError::Transient(format!(
        "worktree add for '{branch}' failed after {ADD_ATTEMPTS} attempts: {last_failure}"
    )))
}

fn workspace_path(repo_root: &Path, branch: &str) -> PathBuf {
    repo_root
        .join(WORKSPACES_DIR)
        .join(branch.replace('/', "-"))
}

fn worktree_payload(path: &Path, branch: &str, created: bool) -> Value {
    json!({
        "path": path.display().to_string(),
        "branch": branch,
        "created": created,
    })
}

/// Make sure `repo_root` is a git repository with at least one commit, so
/// `worktree add` has a HEAD to branch from.
async fn ensure_repo(repo_root: &Path) -> Result<(), CoordinatorError> {
    std::fs::create_dir_all(repo_root).map_err(|err| {
        CoordinatorError::Transient(format!(
            "cannot create repository root {}: {err}",
            repo_root.display()
        ))
    })?;

    let probe = run_git(repo_root, &["rev-parse", "--git-dir"]).await?;
    if probe.status.success() {
        let head = run_git(repo_root, &["rev-parse", "--verify", "HEAD"]).await?;
        if head.status.success() {
            return Ok(());
        }
    } else {
        let init = run_git(repo_root, &["init"]).await?;
        check_success("git init", &init)?;
        tracing::info!(path = %repo_root.display(), "initialized repository for worktrees");
    }

    let commit = run_git(
        repo_root,
        &["commit", "--allow-empty", "-m", "Initialize coordination workspace"],
    )
    .await?;
    check_success("git commit", &commit)
}

fn check_success(what: &str, output: &Output) -> Result<(), CoordinatorError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(CoordinatorError::Transient(format!(
            "{what} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Run one whitelisted git subcommand under the external-command timeout.
async fn run_git(cwd: &Path, args: &[&str]) -> Result<Output, CoordinatorError> {
    let subcommand = args.first().copied().unwrap_or_default();
    ensure_command_allowed("git", subcommand)?;

    let invocation = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_AUTHOR_NAME", "foreman")
        .env("GIT_AUTHOR_EMAIL", "foreman@localhost")
        .env("GIT_COMMITTER_NAME", "foreman")
        .env("GIT_COMMITTER_EMAIL", "foreman@localhost")
        .output();

    match timeout(COMMAND_TIMEOUT, invocation).await {
        Ok(result) => result.map_err(|err| {
            CoordinatorError::Transient(format!("failed to spawn git {subcommand}: {err}"))
        }),
        Err(_) => Err(CoordinatorError::Transient(format!(
            "git {subcommand} timed out after {}s",
            COMMAND_TIMEOUT.as_secs()
        ))),
    }
}

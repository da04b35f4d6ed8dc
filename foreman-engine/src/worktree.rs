//! Input validation for worktree provisioning.
//!
//! Branch names and git invocations assembled from agent-supplied input are
//! checked here before any process is spawned. The daemon owns the actual
//! spawning; this module is pure so the rules are unit-testable.

use foreman_core::error::CoordinatorError;

/// Longest branch name accepted, in characters.
pub const MAX_BRANCH_LEN: usize = 100;

/// Substrings that must never appear in a branch name, regardless of the
/// character whitelist. Covers path traversal and shell metacharacters.
const DANGEROUS: &[&str] = &[
    "..", "~", "$", "`", ";", "&", "|", ">", "<", "\n", "\r", "\0",
];

/// Subcommands the coordinator is allowed to run, per binary.
const ALLOWED_COMMANDS: &[(&str, &[&str])] = &[(
    "git",
    &["init", "add", "commit", "worktree", "rev-parse"],
)];

/// Validate an agent-supplied branch name.
///
/// Accepts only `[A-Za-z0-9/_-]`, rejects empty and overlong names, and
/// refuses anything containing a dangerous substring.
pub fn validate_branch_name(branch: &str) -> Result<(), CoordinatorError> {
    if branch.is_empty() {
        return Err(CoordinatorError::Validation(
            "branch name must not be empty".into(),
        ));
    }
    if branch.chars().count() > MAX_BRANCH_LEN {
        return Err(CoordinatorError::Validation(format!(
            "branch name exceeds {MAX_BRANCH_LEN} characters"
        )));
    }
    for pattern in DANGEROUS {
        if branch.contains(pattern) {
            return Err(CoordinatorError::Validation(format!(
                "branch name contains forbidden sequence {pattern:?}"
            )));
        }
    }
    if let Some(bad) = branch
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-')))
    {
        return Err(CoordinatorError::Validation(format!(
            "branch name contains forbidden character {bad:?}"
        )));
    }
    Ok(())
}

/// Check a program + subcommand pair against the command whitelist.
pub fn ensure_command_allowed(program: &str, subcommand: &str) -> Result<(), CoordinatorError> {
    let allowed = ALLOWED_COMMANDS
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, subs)| *subs)
        .ok_or_else(|| {
            CoordinatorError::SecurityPolicy(format!("program {program:?} is not permitted"))
        })?;
    if !allowed.contains(&subcommand) {
        return Err(CoordinatorError::SecurityPolicy(format!(
            "{program} subcommand {subcommand:?} is not permitted"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_branch_names() {
        for name in ["main", "feature/retry-logic", "agent_7", "fix-123", "a/b/c"] {
            assert!(validate_branch_name(name).is_ok(), "rejected {name:?}");
        }
    }

    #[test]
    fn rejects_empty_and_overlong() {
        assert_eq!(validate_branch_name("").unwrap_err().kind(), "validation");
        let long = "a".repeat(MAX_BRANCH_LEN + 1);
        assert_eq!(validate_branch_name(&long).unwrap_err().kind(), "validation");
        let exactly = "a".repeat(MAX_BRANCH_LEN);
        assert!(validate_branch_name(&exactly).is_ok());
    }

    #[test]
    fn rejects_traversal_and_metacharacters() {
        for name in [
            "../etc/passwd",
            "feat;rm",
            "x&&y",
            "a|b",
            "a>b",
            "a<b",
            "~root",
            "$HOME",
            "`id`",
            "with space",
            "new\nline",
        ] {
            assert_eq!(
                validate_branch_name(name).unwrap_err().kind(),
                "validation",
                "accepted {name:?}"
            );
        }
    }

    #[test]
    fn command_whitelist_only_admits_known_git_subcommands() {
        for sub in ["init", "add", "commit", "worktree", "rev-parse"] {
            assert!(ensure_command_allowed("git", sub).is_ok());
        }
        assert_eq!(
            ensure_command_allowed("git", "push").unwrap_err().kind(),
            "security_policy"
        );
        assert_eq!(
            ensure_command_allowed("rm", "-rf").unwrap_err().kind(),
            "security_policy"
        );
    }
}

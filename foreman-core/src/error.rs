//! Error taxonomy for coordinator operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{AgentId, TaskId};

/// All errors that can arise from coordinator operations.
///
/// Every variant maps onto a stable wire kind via [`CoordinatorError::kind`];
/// the daemon façade converts these into structured error objects rather than
/// letting raw errors cross the operation boundary.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("security policy violation: {0}")]
    SecurityPolicy(String),

    /// State file unreadable or unwritable. Recovered via backup or empty
    /// state on load; logged and swallowed on save. Never fatal to startup.
    #[error("persistence error at {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    /// External call timed out or failed transiently; the caller may retry.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl CoordinatorError {
    /// Stable error kind string used in structured operation errors.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::AgentNotFound(_) | CoordinatorError::TaskNotFound(_) => "not_found",
            CoordinatorError::Validation(_) => "validation",
            CoordinatorError::SecurityPolicy(_) => "security_policy",
            CoordinatorError::Persistence { .. } => "persistence",
            CoordinatorError::Transient(_) => "transient",
        }
    }
}

pub fn persistence_err(
    path: impl Into<PathBuf>,
    message: impl std::fmt::Display,
) -> CoordinatorError {
    CoordinatorError::Persistence {
        path: path.into(),
        message: message.to_string(),
    }
}

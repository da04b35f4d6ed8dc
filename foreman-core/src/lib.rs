//! foreman-core — domain types and errors for the Foreman coordinator.
//!
//! Everything here is pure data: identifiers, agent/task/finding records,
//! and the error taxonomy shared by the engine, daemon, and CLI.

pub mod error;
pub mod types;

pub use error::CoordinatorError;
pub use types::{
    Agent, AgentHealth, AgentId, AgentStatus, Finding, FindingId, FindingStatus, HealthRating,
    KnowledgeBase, KnowledgeEntry, Priority, Severity, SimilarFinding, SimilarTask, StatusChange,
    Task, TaskContext, TaskId, TaskStatus,
};

//! foreman-engine — the agent coordination engine.
//!
//! A single [`Coordinator`] owns every collection (agents, health records,
//! task queue, findings, knowledge base) and is the only writer of the
//! persisted state document. All operations are synchronous and non-blocking;
//! periodic work (health sweep, queue aging) is driven externally by whoever
//! hosts the coordinator.

pub mod coordinator;
pub mod findings;
pub mod health;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod worktree;

pub use coordinator::Coordinator;
pub use findings::NewFinding;
pub use health::{AgentHealthReport, ProjectContext, SweepReport, SystemHealth, SystemStatus};
pub use scheduler::NewTask;
pub use state::{CoordinatorState, FileStateStore, MemoryStateStore, StateStore};

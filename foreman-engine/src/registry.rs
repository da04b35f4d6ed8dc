//! Agent registration and recovery.

use chrono::{DateTime, Duration, Utc};

use foreman_core::error::CoordinatorError;
use foreman_core::types::{Agent, AgentHealth, AgentId, AgentStatus, TaskStatus};

use crate::coordinator::Coordinator;

/// How long a recovering agent stays in `Recovering` before a sweep promotes
/// it back to `Active`.
pub const RECOVERY_DELAY_SECS: i64 = 30;

impl Coordinator {
    /// Register (or re-register) an agent.
    ///
    /// Idempotent upsert: re-registering an existing id replaces its role and
    /// capabilities, resets it to active, and starts a fresh health record.
    pub fn register_agent(
        &mut self,
        id: AgentId,
        role: String,
        capabilities: Vec<String>,
    ) -> Agent {
        self.register_agent_at(id, role, capabilities, Utc::now())
    }

    pub fn register_agent_at(
        &mut self,
        id: AgentId,
        role: String,
        capabilities: Vec<String>,
        now: DateTime<Utc>,
    ) -> Agent {
        let agent = Agent {
            id: id.clone(),
            role: role.clone(),
            capabilities,
            status: AgentStatus::Active,
            registered_at: now,
            last_seen: now,
        };
        self.agents.insert(id.clone(), agent.clone());
        self.health.insert(id.clone(), AgentHealth::fresh(now));
        self.persist();
        tracing::info!(agent = %id, role = %role, "agent registered");
        agent
    }

    /// Put an agent into recovery: its in-progress tasks return to the queue,
    /// its load and error count reset, and a later sweep reactivates it.
    pub fn recover_agent(&mut self, id: &AgentId) -> Result<(), CoordinatorError> {
        self.recover_agent_at(id, Utc::now())
    }

    pub fn recover_agent_at(
        &mut self,
        id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(id.clone()))?;
        agent.status = AgentStatus::Recovering;

        for task in &mut self.queue {
            if task.status == TaskStatus::InProgress && task.assigned_to.as_ref() == Some(id) {
                task.status = TaskStatus::Pending;
                task.assigned_to = None;
                task.updated_at = now;
                tracing::info!(task_id = %task.id, agent = %id, "task requeued from recovering agent");
            }
        }
        self.load.insert(id.clone(), 0);

        if let Some(health) = self.health.get_mut(id) {
            health.recovery_count += 1;
            health.error_count = 0;
            health.last_heartbeat = now;
            health.recovering_since = Some(now);
        }

        self.persist();
        tracing::info!(agent = %id, "agent recovery initiated");
        Ok(())
    }

    /// Promote agents whose recovery delay has elapsed back to `Active`.
    /// Called from the periodic health sweep. Returns the promoted ids.
    pub(crate) fn complete_due_recoveries(&mut self, now: DateTime<Utc>) -> Vec<AgentId> {
        let delay = Duration::seconds(RECOVERY_DELAY_SECS);
        let mut promoted = Vec::new();
        for (id, agent) in &mut self.agents {
            if agent.status != AgentStatus::Recovering {
                continue;
            }
            let due = self
                .health
                .get(id)
                .and_then(|h| h.recovering_since)
                .map_or(true, |since| now - since >= delay);
            if due {
                agent.status = AgentStatus::Active;
                if let Some(health) = self.health.get_mut(id) {
                    health.recovering_since = None;
                }
                promoted.push(id.clone());
                tracing::info!(agent = %id, "agent recovery completed");
            }
        }
        if !promoted.is_empty() {
            self.persist();
        }
        promoted
    }
}

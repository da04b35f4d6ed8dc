//! The coordinator instance owning all in-memory collections.
//!
//! Operation logic lives in sibling modules (`registry`, `scheduler`,
//! `findings`, `health`) as further `impl Coordinator` blocks; this module
//! holds construction, state snapshot/restore, and shared plumbing.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::Utc;

use foreman_core::types::{
    Agent, AgentHealth, AgentId, Finding, FindingStatus, KnowledgeBase, StatusChange, Task,
    TaskId, TaskStatus,
};

use crate::state::{CoordinatorState, MemoryStateStore, StateStore};

/// Bounded length of the task-transition history.
pub const HISTORY_CAP: usize = 1000;

pub struct Coordinator {
    pub(crate) agents: HashMap<AgentId, Agent>,
    pub(crate) health: HashMap<AgentId, AgentHealth>,
    /// Ordered task queue. Tasks are never removed; completed and terminally
    /// failed ones stay behind pending work after re-sorts.
    pub(crate) queue: Vec<Task>,
    pub(crate) findings: Vec<Finding>,
    /// `category:severity` → occurrence count. Rebuilt from findings on load.
    pub(crate) patterns: BTreeMap<String, u64>,
    /// Tasks currently assigned per agent. Rebuilt from the queue on load.
    pub(crate) load: HashMap<AgentId, u32>,
    pub(crate) history: VecDeque<StatusChange>,
    pub(crate) knowledge: KnowledgeBase,
    store: Box<dyn StateStore>,
}

impl Coordinator {
    /// Build a coordinator over the given store, restoring any prior snapshot.
    pub fn new(mut store: Box<dyn StateStore>) -> Self {
        let state = store.load();
        let mut coordinator = Self {
            agents: state.agents.into_iter().collect(),
            health: state.agent_health.into_iter().collect(),
            queue: state.task_queue,
            findings: state.audit_findings,
            patterns: BTreeMap::new(),
            load: HashMap::new(),
            history: VecDeque::new(),
            knowledge: state.knowledge_base,
            store,
        };
        coordinator.rebuild_derived_state();
        coordinator
    }

    /// Coordinator backed by an in-memory store. Used in tests and embedding.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStateStore::default()))
    }

    /// Pattern counters and per-agent load are not part of the persisted
    /// document; recompute them from findings and in-progress assignments.
    fn rebuild_derived_state(&mut self) {
        for finding in &self.findings {
            if finding.status == FindingStatus::New {
                *self
                    .patterns
                    .entry(finding.pattern_key())
                    .or_default() += 1;
            }
        }
        for task in &self.queue {
            if task.status == TaskStatus::InProgress {
                if let Some(agent_id) = &task.assigned_to {
                    *self.load.entry(agent_id.clone()).or_default() += 1;
                }
            }
        }
    }

    /// Full state document for persistence.
    pub fn snapshot(&self) -> CoordinatorState {
        CoordinatorState {
            agents: self.agents.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            task_queue: self.queue.clone(),
            audit_findings: self.findings.clone(),
            agent_health: self.health.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            knowledge_base: self.knowledge.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    /// Persist the current state. Failures are logged, never propagated —
    /// a broken disk must not take coordination down with it.
    pub(crate) fn persist(&mut self) {
        let state = self.snapshot();
        if let Err(err) = self.store.save(&state) {
            tracing::warn!(error = %err, "failed to persist coordinator state");
        }
    }

    pub(crate) fn record_transition(
        &mut self,
        task_id: &TaskId,
        from: TaskStatus,
        to: TaskStatus,
        timestamp: chrono::DateTime<Utc>,
    ) {
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(StatusChange {
            task_id: task_id.clone(),
            transition: format!("{from} -> {to}"),
            timestamp,
        });
    }

    // -- read accessors -----------------------------------------------------

    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.queue.iter().find(|t| &t.id == id)
    }

    pub fn queue(&self) -> &[Task] {
        &self.queue
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn history(&self) -> &VecDeque<StatusChange> {
        &self.history
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn agent_load(&self, id: &AgentId) -> u32 {
        self.load.get(id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::NewTask;
    use foreman_core::types::Priority;

    #[test]
    fn restore_rebuilds_load_and_patterns() {
        let mut first = Coordinator::in_memory();
        first.register_agent(AgentId::from("coder-001"), "coder".into(), vec![]);
        first.create_task(NewTask {
            task_type: "implement".into(),
            description: "implement retry logic".into(),
            priority: Priority::High,
            context: None,
            dependencies: vec![],
        });
        let assigned = first
            .next_task(&AgentId::from("coder-001"), "coder")
            .expect("task assigned");
        assert_eq!(first.agent_load(&AgentId::from("coder-001")), 1);

        let second = Coordinator::new(Box::new(store_with(first.snapshot())));
        assert_eq!(second.agent_load(&AgentId::from("coder-001")), 1);
        assert_eq!(
            second.task(&assigned.id).map(|t| t.status),
            Some(TaskStatus::InProgress)
        );
    }

    #[test]
    fn history_is_bounded() {
        let mut coordinator = Coordinator::in_memory();
        let id = TaskId::from("t");
        for _ in 0..(HISTORY_CAP + 10) {
            coordinator.record_transition(
                &id,
                TaskStatus::Pending,
                TaskStatus::InProgress,
                Utc::now(),
            );
        }
        assert_eq!(coordinator.history().len(), HISTORY_CAP);
    }

    fn store_with(state: CoordinatorState) -> MemoryStateStore {
        let mut store = MemoryStateStore::default();
        store.save(&state).unwrap();
        store
    }
}

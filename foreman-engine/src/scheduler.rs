//! Task scheduling: priority queue, enrichment, matching, retry, aging.

use chrono::{DateTime, Duration, Utc};

use foreman_core::error::CoordinatorError;
use foreman_core::types::{
    AgentId, Priority, SimilarTask, Task, TaskContext, TaskId, TaskStatus,
};

use crate::coordinator::Coordinator;

/// A task is retried until its retry count reaches this bound, then fails
/// terminally.
pub const MAX_RETRIES: u32 = 3;
/// Pending tasks older than this gain one priority score per aging pass.
pub const STALE_AFTER_MINS: i64 = 30;
/// Priority score ceiling (critical).
pub const MAX_SCORE: u8 = 4;
/// Token-overlap threshold at or above which two descriptions count as
/// similar.
pub const SIMILARITY_THRESHOLD: f64 = 0.3;

/// Arguments for task creation. Context is optional caller enrichment; the
/// scheduler always adds related findings, similar tasks, and an estimate.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_type: String,
    pub description: String,
    pub priority: Priority,
    pub context: Option<TaskContext>,
    pub dependencies: Vec<TaskId>,
}

/// Role → task keyword table. A task suits a role when its type or
/// description contains one of the role's keywords.
fn role_keywords(role: &str) -> &'static [&'static str] {
    match role {
        "auditor" => &["audit", "scan", "check", "review", "analyze", "inspect", "security"],
        "planner" => &["plan", "design", "architect", "breakdown", "strategy", "organize"],
        "coder" => &["implement", "code", "fix", "refactor", "develop", "build", "create"],
        "tester" => &["test", "verify", "validate", "qa", "check", "assert"],
        "reviewer" => &["review", "approve", "check_pr", "merge", "feedback", "comment"],
        _ => &[],
    }
}

fn is_suitable_for_role(task: &Task, role: &str) -> bool {
    let task_type = task.task_type.to_lowercase();
    let description = task.description.to_lowercase();
    role_keywords(role)
        .iter()
        .any(|kw| task_type.contains(kw) || description.contains(kw))
}

/// Intersection-over-union of the lowercase word sets of two descriptions.
fn token_overlap(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let a: HashSet<&str> = a.split_whitespace().collect();
    let b: HashSet<&str> = b.split_whitespace().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Fallback duration estimates per task type, in seconds.
fn default_estimate(task_type: &str) -> f64 {
    match task_type {
        "audit" => 300.0,
        "plan" => 600.0,
        "implement" => 1800.0,
        "test" => 900.0,
        "review" => 600.0,
        _ => 600.0,
    }
}

impl Coordinator {
    /// Create a task and place it in the queue by priority.
    pub fn create_task(&mut self, new: NewTask) -> Task {
        self.create_task_at(new, Utc::now())
    }

    pub fn create_task_at(&mut self, new: NewTask, now: DateTime<Utc>) -> Task {
        let mut context = new.context.unwrap_or_default();
        context.related_findings = self.related_findings(&new.description);
        context.similar_tasks = self.similar_tasks(&new.description);
        context.estimated_secs =
            estimate_duration(&new.task_type, &context.similar_tasks);

        let task = Task {
            id: TaskId::generate(),
            task_type: new.task_type.clone(),
            description: new.description,
            priority: new.priority,
            priority_score: new.priority.score(),
            status: TaskStatus::Pending,
            assigned_to: None,
            context,
            dependencies: new.dependencies,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            actual_duration_secs: None,
            result: None,
        };

        self.knowledge.record_created(&new.task_type);
        let position = self.insertion_point(task.priority_score);
        self.queue.insert(position, task.clone());
        self.persist();
        tracing::info!(
            task_id = %task.id,
            priority = %task.priority,
            "task created: {}",
            task.description
        );
        task
    }

    /// Queue index immediately before the first pending task of strictly
    /// lower score. Equal-priority tasks keep arrival order.
    fn insertion_point(&self, score: u8) -> usize {
        self.queue
            .iter()
            .position(|t| t.status == TaskStatus::Pending && t.priority_score < score)
            .unwrap_or(self.queue.len())
    }

    /// Ids of findings whose title or description contains any of the first
    /// five words of `description`. Capped at three.
    fn related_findings(&self, description: &str) -> Vec<foreman_core::types::FindingId> {
        let description = description.to_lowercase();
        let words: Vec<&str> = description.split_whitespace().take(5).collect();
        self.findings
            .iter()
            .filter(|f| {
                let title = f.title.to_lowercase();
                let body = f.description.to_lowercase();
                words.iter().any(|w| title.contains(w) || body.contains(w))
            })
            .map(|f| f.id.clone())
            .take(3)
            .collect()
    }

    /// Previously created tasks whose descriptions overlap this one, by
    /// token-overlap similarity. Top three, most similar first.
    fn similar_tasks(&self, description: &str) -> Vec<SimilarTask> {
        let description = description.to_lowercase();
        let mut similar: Vec<SimilarTask> = self
            .queue
            .iter()
            .filter_map(|t| {
                let similarity = token_overlap(&description, &t.description.to_lowercase());
                (similarity >= SIMILARITY_THRESHOLD).then(|| SimilarTask {
                    task_id: t.id.clone(),
                    description: t.description.clone(),
                    duration_secs: t.actual_duration_secs,
                    similarity,
                })
            })
            .collect();
        similar.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        similar.truncate(3);
        similar
    }

    /// Pick and assign the next task for an agent, or record it idle.
    pub fn next_task(&mut self, agent_id: &AgentId, role: &str) -> Option<Task> {
        self.next_task_at(agent_id, role, Utc::now())
    }

    pub fn next_task_at(
        &mut self,
        agent_id: &AgentId,
        role: &str,
        now: DateTime<Utc>,
    ) -> Option<Task> {
        // Polling doubles as a heartbeat.
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.last_seen = now;
            agent.status = foreman_core::types::AgentStatus::Busy;
        }
        if let Some(health) = self.health.get_mut(agent_id) {
            health.last_heartbeat = now;
        }

        let capabilities: Vec<String> = self
            .agents
            .get(agent_id)
            .map(|a| a.capabilities.clone())
            .unwrap_or_default();
        let threshold = self.load_threshold(agent_id);
        let current_load = self.agent_load(agent_id);

        // Scan pending tasks in descending score order; stable within a score.
        let mut order: Vec<usize> = (0..self.queue.len())
            .filter(|&i| self.queue[i].status == TaskStatus::Pending)
            .collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.queue[i].priority_score));

        for index in order {
            let task = &self.queue[index];
            if !is_suitable_for_role(task, role) {
                continue;
            }
            if !self.dependencies_met(task) {
                continue;
            }
            if !task
                .context
                .required_capabilities
                .iter()
                .all(|cap| capabilities.contains(cap))
            {
                continue;
            }
            if current_load >= threshold {
                tracing::info!(agent = %agent_id, load = current_load, "agent overloaded, skipping assignment");
                continue;
            }

            let task = &mut self.queue[index];
            task.status = TaskStatus::InProgress;
            task.assigned_to = Some(agent_id.clone());
            task.started_at = Some(now);
            task.updated_at = now;
            let assigned = task.clone();
            *self.load.entry(agent_id.clone()).or_default() += 1;
            self.persist();
            tracing::info!(task_id = %assigned.id, agent = %agent_id, "task assigned");
            return Some(assigned);
        }

        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.status = foreman_core::types::AgentStatus::Idle;
        }
        self.persist();
        None
    }

    /// All dependencies must exist and be completed.
    fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.queue
                .iter()
                .any(|t| &t.id == dep && t.status == TaskStatus::Completed)
        })
    }

    /// Concurrent-assignment ceiling for an agent, derived from its record:
    /// struggling agents get less, slow agents a little less, the rest 3.
    fn load_threshold(&self, agent_id: &AgentId) -> u32 {
        match self.health.get(agent_id) {
            Some(h) if h.error_count > 5 => 1,
            Some(h) if h.average_task_secs > 3600.0 => 2,
            _ => 3,
        }
    }

    /// Apply a status transition reported by a worker.
    pub fn update_task(
        &mut self,
        task_id: &TaskId,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> Result<Task, CoordinatorError> {
        self.update_task_at(task_id, status, result, Utc::now())
    }

    pub fn update_task_at(
        &mut self,
        task_id: &TaskId,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Task, CoordinatorError> {
        let index = self
            .queue
            .iter()
            .position(|t| &t.id == task_id)
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.clone()))?;

        let previous = self.queue[index].status;
        let mut recorded_status = status;
        {
            let task = &mut self.queue[index];
            task.status = status;
            task.updated_at = now;
            if let Some(result) = result {
                task.result = Some(result);
            }
        }

        match status {
            TaskStatus::Completed => {
                let (assignee, duration) = {
                    let task = &mut self.queue[index];
                    task.completed_at = Some(now);
                    let duration = task.started_at.map(|started| {
                        (now - started).num_milliseconds() as f64 / 1000.0
                    });
                    task.actual_duration_secs = duration;
                    (task.assigned_to.take(), duration)
                };
                if let Some(agent_id) = &assignee {
                    self.decrement_load(agent_id);
                    if let (Some(health), Some(duration)) =
                        (self.health.get_mut(agent_id), duration)
                    {
                        health.tasks_completed += 1;
                        let completed = health.tasks_completed as f64;
                        health.average_task_secs =
                            (health.average_task_secs * (completed - 1.0) + duration) / completed;
                    }
                }
                if let Some(duration) = duration {
                    let task_type = self.queue[index].task_type.clone();
                    self.knowledge.record_duration(&task_type, duration);
                }
            }
            TaskStatus::Failed if previous == TaskStatus::Failed => {
                // Already terminal; nothing left to retry.
            }
            TaskStatus::Failed => {
                let assignee = {
                    let task = &mut self.queue[index];
                    task.failed_at = Some(now);
                    task.assigned_to.take()
                };
                if let Some(agent_id) = &assignee {
                    self.decrement_load(agent_id);
                    if let Some(health) = self.health.get_mut(agent_id) {
                        health.tasks_failed += 1;
                        health.error_count += 1;
                    }
                }

                let task = &mut self.queue[index];
                task.retry_count += 1;
                if task.retry_count < MAX_RETRIES {
                    task.status = TaskStatus::Pending;
                    recorded_status = TaskStatus::Pending;
                    tracing::info!(
                        task_id = %task_id,
                        retry = task.retry_count,
                        max = MAX_RETRIES,
                        "task failed, requeued for retry"
                    );
                } else {
                    tracing::error!(task_id = %task_id, "task failed terminally after {MAX_RETRIES} retries");
                }
            }
            TaskStatus::Pending | TaskStatus::InProgress => {}
        }

        self.record_transition(task_id, previous, recorded_status, now);
        self.persist();
        Ok(self.queue[index].clone())
    }

    pub(crate) fn decrement_load(&mut self, agent_id: &AgentId) {
        if let Some(load) = self.load.get_mut(agent_id) {
            *load = load.saturating_sub(1);
        }
    }

    /// Anti-starvation pass: boost pending tasks older than
    /// [`STALE_AFTER_MINS`] by one score (capped), then re-sort the queue so
    /// pending tasks come first, by score descending, oldest first within a
    /// score. Returns the number of boosted tasks.
    pub fn age_pending_tasks(&mut self) -> usize {
        self.age_pending_tasks_at(Utc::now())
    }

    pub fn age_pending_tasks_at(&mut self, now: DateTime<Utc>) -> usize {
        let stale_cutoff = Duration::minutes(STALE_AFTER_MINS);
        let mut boosted = 0;
        for task in &mut self.queue {
            if task.status == TaskStatus::Pending
                && now - task.created_at > stale_cutoff
                && task.priority_score < MAX_SCORE
            {
                task.priority_score += 1;
                boosted += 1;
                tracing::debug!(task_id = %task.id, score = task.priority_score, "boosted stale task");
            }
        }
        self.queue.sort_by_key(|t| {
            (
                t.status != TaskStatus::Pending,
                std::cmp::Reverse(t.priority_score),
                t.created_at,
            )
        });
        self.persist();
        boosted
    }
}

pub(crate) fn estimate_duration(task_type: &str, similar: &[SimilarTask]) -> f64 {
    let durations: Vec<f64> = similar.iter().filter_map(|t| t.duration_secs).collect();
    if durations.is_empty() {
        default_estimate(&task_type.to_lowercase())
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    }
}

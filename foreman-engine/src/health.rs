//! Health scoring, the periodic liveness sweep, and system-wide reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use foreman_core::error::CoordinatorError;
use foreman_core::types::{
    AgentId, AgentStatus, HealthRating, Severity, StatusChange, TaskStatus,
};

use crate::coordinator::Coordinator;

/// Heartbeats older than this mark an agent failed (and health critical).
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 300;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub last_heartbeat: DateTime<Utc>,
    pub seconds_since_heartbeat: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    pub average_task_secs: f64,
    pub error_count: u64,
    pub recovery_count: u64,
    pub current_load: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentHealthReport {
    pub agent_id: AgentId,
    pub role: String,
    pub status: AgentStatus,
    pub health: HealthRating,
    pub metrics: HealthMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Healthy,
    Degraded,
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemStatus::Healthy => f.write_str("healthy"),
            SystemStatus::Degraded => f.write_str("degraded"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCounts {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub busy: usize,
    pub failed: usize,
    pub recovering: usize,
    pub unhealthy: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindingCounts {
    pub total: usize,
    pub patterns: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: SystemStatus,
    pub timestamp: DateTime<Utc>,
    pub agents: AgentCounts,
    pub tasks: TaskCounts,
    pub findings: FindingCounts,
    /// Task types the knowledge base has duration statistics for.
    pub knowledge_task_types: Vec<String>,
}

/// Outcome of one liveness sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Agents whose heartbeat went stale and were sent into recovery.
    pub failed: Vec<AgentId>,
    /// Agents promoted from recovering back to active.
    pub reactivated: Vec<AgentId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternCount {
    pub pattern: String,
    pub count: u64,
}

/// Aggregated snapshot plus derived insights.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectContext {
    pub timestamp: DateTime<Utc>,
    pub agents_by_role: BTreeMap<String, usize>,
    pub agents_by_status: BTreeMap<String, usize>,
    pub tasks_by_status: BTreeMap<String, usize>,
    pub tasks_by_type: BTreeMap<String, usize>,
    pub tasks_by_priority: BTreeMap<String, usize>,
    pub average_completion_secs: f64,
    pub findings_by_severity: BTreeMap<String, usize>,
    pub findings_by_category: BTreeMap<String, usize>,
    pub top_patterns: Vec<PatternCount>,
    pub system_health: SystemHealth,
    pub recent_activity: Vec<StatusChange>,
    pub insights: Vec<String>,
}

// ---------------------------------------------------------------------------
// Coordinator impl
// ---------------------------------------------------------------------------

impl Coordinator {
    /// Detailed health report for one agent.
    pub fn agent_health_report(
        &self,
        id: &AgentId,
    ) -> Result<AgentHealthReport, CoordinatorError> {
        self.agent_health_report_at(id, Utc::now())
    }

    pub fn agent_health_report_at(
        &self,
        id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<AgentHealthReport, CoordinatorError> {
        let agent = self
            .agents
            .get(id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(id.clone()))?;
        let health = self
            .health
            .get(id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(id.clone()))?;

        let seconds_since = (now - health.last_heartbeat).num_milliseconds() as f64 / 1000.0;
        let ratio = health.failure_ratio();
        let rating = if seconds_since > HEARTBEAT_TIMEOUT_SECS as f64 {
            HealthRating::Critical
        } else if health.error_count > 10 || ratio > 0.3 {
            HealthRating::Poor
        } else if health.error_count > 5 || ratio > 0.1 {
            HealthRating::Fair
        } else {
            HealthRating::Good
        };

        let attempts = health.tasks_completed + health.tasks_failed;
        let success_rate = health.tasks_completed as f64 / attempts.max(1) as f64;

        Ok(AgentHealthReport {
            agent_id: id.clone(),
            role: agent.role.clone(),
            status: agent.status,
            health: rating,
            metrics: HealthMetrics {
                last_heartbeat: health.last_heartbeat,
                seconds_since_heartbeat: seconds_since,
                tasks_completed: health.tasks_completed,
                tasks_failed: health.tasks_failed,
                success_rate,
                average_task_secs: health.average_task_secs,
                error_count: health.error_count,
                recovery_count: health.recovery_count,
                current_load: self.agent_load(id),
            },
        })
    }

    /// Liveness sweep: agents with a stale heartbeat (and not already failed)
    /// are marked failed and sent straight into recovery; agents whose
    /// recovery delay elapsed are promoted back to active.
    pub fn sweep_agents(&mut self) -> SweepReport {
        self.sweep_agents_at(Utc::now())
    }

    pub fn sweep_agents_at(&mut self, now: DateTime<Utc>) -> SweepReport {
        let stale: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(id, agent)| {
                if agent.status == AgentStatus::Failed {
                    return false;
                }
                self.health.get(id).map_or(false, |h| {
                    (now - h.last_heartbeat).num_seconds() > HEARTBEAT_TIMEOUT_SECS
                })
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            tracing::warn!(agent = %id, "agent unresponsive, initiating recovery");
            if let Some(agent) = self.agents.get_mut(id) {
                agent.status = AgentStatus::Failed;
            }
            // Heartbeat is refreshed by recover, so one sweep cannot loop.
            let _ = self.recover_agent_at(id, now);
        }

        let reactivated = self.complete_due_recoveries(now);
        SweepReport {
            failed: stale,
            reactivated,
        }
    }

    /// System-wide health report.
    pub fn system_health(&self) -> SystemHealth {
        self.system_health_at(Utc::now())
    }

    pub fn system_health_at(&self, now: DateTime<Utc>) -> SystemHealth {
        let count_agents = |status: AgentStatus| {
            self.agents.values().filter(|a| a.status == status).count()
        };
        let count_tasks = |status: TaskStatus| {
            self.queue.iter().filter(|t| t.status == status).count()
        };

        let completed = count_tasks(TaskStatus::Completed);
        let failed = count_tasks(TaskStatus::Failed);
        let completion_rate = if completed + failed == 0 {
            1.0
        } else {
            completed as f64 / (completed + failed) as f64
        };

        let unhealthy = self
            .agents
            .keys()
            .filter_map(|id| self.agent_health_report_at(id, now).ok())
            .filter(|r| r.health.is_unhealthy())
            .count();

        let status = if unhealthy == 0 && completion_rate > 0.8 {
            SystemStatus::Healthy
        } else {
            SystemStatus::Degraded
        };

        SystemHealth {
            status,
            timestamp: now,
            agents: AgentCounts {
                total: self.agents.len(),
                active: count_agents(AgentStatus::Active),
                idle: count_agents(AgentStatus::Idle),
                busy: count_agents(AgentStatus::Busy),
                failed: count_agents(AgentStatus::Failed),
                recovering: count_agents(AgentStatus::Recovering),
                unhealthy,
            },
            tasks: TaskCounts {
                total: self.queue.len(),
                pending: count_tasks(TaskStatus::Pending),
                in_progress: count_tasks(TaskStatus::InProgress),
                completed,
                failed,
                completion_rate,
            },
            findings: FindingCounts {
                total: self.findings.len(),
                patterns: self.patterns.clone(),
            },
            knowledge_task_types: self.knowledge.task_durations.keys().cloned().collect(),
        }
    }

    /// Aggregated project snapshot with derived insights.
    pub fn project_context(&self) -> ProjectContext {
        self.project_context_at(Utc::now())
    }

    pub fn project_context_at(&self, now: DateTime<Utc>) -> ProjectContext {
        let mut agents_by_role = BTreeMap::new();
        let mut agents_by_status = BTreeMap::new();
        for agent in self.agents.values() {
            *agents_by_role.entry(agent.role.clone()).or_default() += 1;
            *agents_by_status
                .entry(agent.status.to_string())
                .or_default() += 1;
        }

        let mut tasks_by_status = BTreeMap::new();
        let mut tasks_by_type = BTreeMap::new();
        let mut tasks_by_priority = BTreeMap::new();
        let mut completed_durations = Vec::new();
        for task in &self.queue {
            *tasks_by_status.entry(task.status.to_string()).or_default() += 1;
            *tasks_by_type.entry(task.task_type.clone()).or_default() += 1;
            *tasks_by_priority
                .entry(task.priority.to_string())
                .or_default() += 1;
            if task.status == TaskStatus::Completed {
                if let Some(duration) = task.actual_duration_secs {
                    completed_durations.push(duration);
                }
            }
        }
        let average_completion_secs = if completed_durations.is_empty() {
            0.0
        } else {
            completed_durations.iter().sum::<f64>() / completed_durations.len() as f64
        };

        let mut findings_by_severity = BTreeMap::new();
        let mut findings_by_category = BTreeMap::new();
        for finding in &self.findings {
            *findings_by_severity
                .entry(finding.severity.to_string())
                .or_default() += 1;
            *findings_by_category
                .entry(finding.category.clone())
                .or_default() += 1;
        }

        let mut top_patterns: Vec<PatternCount> = self
            .patterns
            .iter()
            .map(|(pattern, count)| PatternCount {
                pattern: pattern.clone(),
                count: *count,
            })
            .collect();
        top_patterns.sort_by(|a, b| b.count.cmp(&a.count).then(a.pattern.cmp(&b.pattern)));
        top_patterns.truncate(5);

        let recent_activity: Vec<StatusChange> = self
            .history
            .iter()
            .rev()
            .take(10)
            .rev()
            .cloned()
            .collect();

        let system_health = self.system_health_at(now);
        let insights = self.derive_insights(
            &tasks_by_status,
            &findings_by_severity,
            &agents_by_status,
            &top_patterns,
        );

        ProjectContext {
            timestamp: now,
            agents_by_role,
            agents_by_status,
            tasks_by_status,
            tasks_by_type,
            tasks_by_priority,
            average_completion_secs,
            findings_by_severity,
            findings_by_category,
            top_patterns,
            system_health,
            recent_activity,
            insights,
        }
    }

    fn derive_insights(
        &self,
        tasks_by_status: &BTreeMap<String, usize>,
        findings_by_severity: &BTreeMap<String, usize>,
        agents_by_status: &BTreeMap<String, usize>,
        top_patterns: &[PatternCount],
    ) -> Vec<String> {
        let mut insights = Vec::new();
        let total_tasks = self.queue.len();
        let failed_tasks = tasks_by_status.get("failed").copied().unwrap_or(0);
        let pending_tasks = tasks_by_status.get("pending").copied().unwrap_or(0);

        if failed_tasks as f64 > total_tasks as f64 * 0.2 {
            insights.push(
                "High task failure rate detected. Review task complexity or agent capabilities."
                    .to_string(),
            );
        }
        if pending_tasks > 50 {
            insights.push(
                "Large task backlog. Consider scaling up agents or optimizing task processing."
                    .to_string(),
            );
        }
        let failed_agents = agents_by_status.get("failed").copied().unwrap_or(0);
        if failed_agents > 0 {
            insights.push(format!(
                "{failed_agents} agents in failed state. Recovery initiated."
            ));
        }
        let critical = findings_by_severity
            .get(&Severity::Critical.to_string())
            .copied()
            .unwrap_or(0);
        if critical > 0 {
            insights.push(format!(
                "{critical} critical findings require immediate attention."
            ));
        }
        if let Some(top) = top_patterns.first() {
            insights.push(format!(
                "Most common issue pattern: {} ({} occurrences)",
                top.pattern, top.count
            ));
        }
        insights
    }
}

//! Domain types for the Foreman coordinator.
//!
//! All timestamps are `DateTime<Utc>`; all types serialize via serde +
//! serde_json (the persisted state document and the wire protocol share
//! these definitions).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Caller-supplied unique identifier for a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Unique identifier for a task. Generated, never caller-supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Unique identifier for an audit finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindingId(pub String);

impl FindingId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FindingId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Failed,
    Recovering,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Failed => "failed",
            AgentStatus::Recovering => "recovering",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!(
                "unknown task status '{other}'; expected: pending, in_progress, completed, failed"
            )),
        }
    }
}

/// Task priority. The numeric score drives queue ordering (4 = critical .. 1 = low).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn score(self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!(
                "unknown priority '{other}'; expected: critical, high, medium, low"
            )),
        }
    }
}

/// Severity of an audit finding. Maps 1:1 onto task priority when a finding
/// spawns follow-up work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        f.write_str(s)
    }
}

impl From<Severity> for Priority {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Critical => Priority::Critical,
            Severity::High => Priority::High,
            Severity::Medium => Priority::Medium,
            Severity::Low => Priority::Low,
        }
    }
}

/// Derived qualitative health rating for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthRating {
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthRating {
    /// Poor and critical agents count against system health.
    pub fn is_unhealthy(self) -> bool {
        matches!(self, HealthRating::Poor | HealthRating::Critical)
    }
}

impl fmt::Display for HealthRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthRating::Good => "good",
            HealthRating::Fair => "fair",
            HealthRating::Poor => "poor",
            HealthRating::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Status of an audit finding.
///
/// The engine only ever sets `New` or `Duplicate`; `Resolved` is part of the
/// data model so that dedup can skip findings an operator has marked resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    New,
    Duplicate,
    Resolved,
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// A registered worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub role: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Per-agent health record, created at registration and mutated on every
/// heartbeat, assignment, completion, failure, and recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_task_secs: f64,
    pub error_count: u64,
    pub recovery_count: u64,
    /// Set while the agent is in `Recovering`; cleared on promotion to `Active`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovering_since: Option<DateTime<Utc>>,
}

impl AgentHealth {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            last_heartbeat: now,
            tasks_completed: 0,
            tasks_failed: 0,
            average_task_secs: 0.0,
            error_count: 0,
            recovery_count: 0,
            recovering_since: None,
        }
    }

    /// failed / (completed + failed); 0.0 when the agent has done nothing yet.
    pub fn failure_ratio(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            0.0
        } else {
            self.tasks_failed as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A historical task surfaced as context for a newly created one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarTask {
    pub task_id: TaskId,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub similarity: f64,
}

/// Enrichment attached to a task at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskContext {
    #[serde(default)]
    pub related_findings: Vec<FindingId>,
    #[serde(default)]
    pub similar_tasks: Vec<SimilarTask>,
    #[serde(default)]
    pub estimated_secs: f64,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding_id: Option<FindingId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub similar_findings: Vec<SimilarFinding>,
    /// Caller-supplied context fields that the engine carries through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A unit of work in the coordinator queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub description: String,
    pub priority: Priority,
    /// Numeric ordering value. Starts at `priority.score()` and can be
    /// boosted by the anti-starvation pass, so it is stored separately.
    pub priority_score: u8,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<AgentId>,
    pub context: TaskContext,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// One entry in the bounded task-transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub task_id: TaskId,
    /// Rendered as `"old -> new"`.
    pub transition: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// A prior finding in the same category, attached to a new one for context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarFinding {
    pub id: FindingId,
    pub title: String,
    pub resolution: String,
}

/// A reported issue. Immutable after creation apart from status bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    pub status: FindingStatus,
    /// Dedup key: sha256 of category + locator + title prefix.
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub similar: Vec<SimilarFinding>,
    pub submitted_at: DateTime<Utc>,
    /// Id of the follow-up task this finding spawned (absent for duplicates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl Finding {
    /// `category:severity` — the aggregation key for pattern learning.
    pub fn pattern_key(&self) -> String {
        format!("{}:{}", self.category, self.severity)
    }
}

// ---------------------------------------------------------------------------
// Knowledge base
// ---------------------------------------------------------------------------

/// Accumulated duration statistics for one task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KnowledgeEntry {
    pub count: u64,
    pub total_secs: f64,
    pub average_secs: f64,
}

impl KnowledgeEntry {
    pub fn observe(&mut self, duration_secs: f64) {
        self.count += 1;
        self.total_secs += duration_secs;
        self.average_secs = self.total_secs / self.count as f64;
    }
}

/// Typed knowledge base keyed by task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KnowledgeBase {
    /// Completed-task duration statistics per task type.
    #[serde(default)]
    pub task_durations: BTreeMap<String, KnowledgeEntry>,
    /// How many tasks of each type have been created.
    #[serde(default)]
    pub tasks_created: BTreeMap<String, u64>,
}

impl KnowledgeBase {
    pub fn record_duration(&mut self, task_type: &str, duration_secs: f64) {
        self.task_durations
            .entry(task_type.to_owned())
            .or_default()
            .observe(duration_secs);
    }

    pub fn record_created(&mut self, task_type: &str) {
        *self.tasks_created.entry(task_type.to_owned()).or_default() += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_scores() {
        assert_eq!(Priority::Critical.score(), 4);
        assert_eq!(Priority::High.score(), 3);
        assert_eq!(Priority::Medium.score(), 2);
        assert_eq!(Priority::Low.score(), 1);
    }

    #[test]
    fn priority_parse_is_case_insensitive() {
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn task_status_roundtrips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn task_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn severity_maps_onto_priority() {
        assert_eq!(Priority::from(Severity::Critical), Priority::Critical);
        assert_eq!(Priority::from(Severity::Low), Priority::Low);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(TaskId::generate(), TaskId::generate());
        assert_ne!(FindingId::generate(), FindingId::generate());
    }

    #[test]
    fn failure_ratio_handles_empty_record() {
        let health = AgentHealth::fresh(Utc::now());
        assert_eq!(health.failure_ratio(), 0.0);
    }

    #[test]
    fn knowledge_entry_running_average() {
        let mut entry = KnowledgeEntry::default();
        entry.observe(100.0);
        entry.observe(300.0);
        assert_eq!(entry.count, 2);
        assert_eq!(entry.average_secs, 200.0);
    }

    #[test]
    fn task_context_preserves_unknown_fields() {
        let raw = r#"{"required_capabilities":["python"],"ticket":"AB-12"}"#;
        let ctx: TaskContext = serde_json::from_str(raw).unwrap();
        assert_eq!(ctx.required_capabilities, vec!["python"]);
        assert_eq!(ctx.extra.get("ticket").unwrap(), "AB-12");
    }

    #[test]
    fn finding_pattern_key_joins_category_and_severity() {
        let finding = Finding {
            id: FindingId::generate(),
            title: "SQL Injection".into(),
            description: "raw string interpolation".into(),
            severity: Severity::Critical,
            category: "security".into(),
            file_path: Some("a.py".into()),
            line_number: Some(10),
            status: FindingStatus::New,
            hash: String::new(),
            pattern: None,
            pattern_count: None,
            similar: vec![],
            submitted_at: Utc::now(),
            task_id: None,
        };
        assert_eq!(finding.pattern_key(), "security:critical");
    }
}

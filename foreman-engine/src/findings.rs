//! Finding intake: deduplication, pattern learning, follow-up task spawning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use foreman_core::error::CoordinatorError;
use foreman_core::types::{
    Finding, FindingId, FindingStatus, Priority, Severity, SimilarFinding, TaskContext,
};

use crate::coordinator::Coordinator;
use crate::scheduler::NewTask;

/// How many recent findings the similar-finding scan looks back over.
const SIMILAR_SCAN_WINDOW: usize = 50;
/// Cap on similar findings attached to a new one.
const SIMILAR_CAP: usize = 5;
/// Title prefix length that participates in the dedup hash.
const TITLE_HASH_PREFIX: usize = 50;

/// An incoming finding submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFinding {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line_number: Option<u64>,
}

/// Stable dedup key: sha256 over category, locator, and title prefix.
fn finding_hash(new: &NewFinding) -> String {
    let title_prefix: String = new.title.chars().take(TITLE_HASH_PREFIX).collect();
    let mut hasher = Sha256::new();
    hasher.update(new.category.as_bytes());
    hasher.update(b"|");
    hasher.update(new.file_path.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(
        new.line_number
            .map(|n| n.to_string())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(b"|");
    hasher.update(title_prefix.as_bytes());
    hex::encode(hasher.finalize())
}

impl Coordinator {
    /// Submit a finding. Duplicates (same hash as a prior unresolved finding)
    /// are marked and returned without spawning work; new findings feed the
    /// pattern counters and spawn a `plan` follow-up task at the finding's
    /// severity.
    pub fn submit_finding(&mut self, new: NewFinding) -> Result<Finding, CoordinatorError> {
        self.submit_finding_at(new, Utc::now())
    }

    pub fn submit_finding_at(
        &mut self,
        new: NewFinding,
        now: DateTime<Utc>,
    ) -> Result<Finding, CoordinatorError> {
        validate(&new)?;

        let hash = finding_hash(&new);
        let mut finding = Finding {
            id: FindingId::generate(),
            title: new.title.clone(),
            description: new.description.clone(),
            severity: new.severity,
            category: new.category.clone(),
            file_path: new.file_path.clone(),
            line_number: new.line_number,
            status: FindingStatus::New,
            hash: hash.clone(),
            pattern: None,
            pattern_count: None,
            similar: vec![],
            submitted_at: now,
            task_id: None,
        };

        let is_duplicate = self
            .findings
            .iter()
            .any(|f| f.hash == hash && f.status != FindingStatus::Resolved);
        if is_duplicate {
            finding.status = FindingStatus::Duplicate;
            tracing::info!(title = %finding.title, "duplicate finding, no task spawned");
            return Ok(finding);
        }

        let pattern = finding.pattern_key();
        let count = {
            let entry = self.patterns.entry(pattern.clone()).or_default();
            *entry += 1;
            *entry
        };
        finding.pattern = Some(pattern.clone());
        finding.pattern_count = Some(count);
        finding.similar = self.similar_findings(&new.category);

        self.findings.push(finding.clone());

        let task = self.create_task_at(
            NewTask {
                task_type: "plan".into(),
                description: format!("Create implementation plan for: {}", finding.title),
                priority: Priority::from(finding.severity),
                context: Some(TaskContext {
                    finding_id: Some(finding.id.clone()),
                    pattern: Some(pattern),
                    similar_findings: finding.similar.clone(),
                    ..TaskContext::default()
                }),
                dependencies: vec![],
            },
            now,
        );
        finding.task_id = Some(task.id.clone());
        if let Some(stored) = self.findings.iter_mut().find(|f| f.id == finding.id) {
            stored.task_id = Some(task.id);
        }

        self.persist();
        tracing::info!(title = %finding.title, severity = %finding.severity, "finding accepted");
        Ok(finding)
    }

    /// Up to five prior findings in the same category, scanning only the most
    /// recent window.
    fn similar_findings(&self, category: &str) -> Vec<SimilarFinding> {
        let start = self.findings.len().saturating_sub(SIMILAR_SCAN_WINDOW);
        self.findings[start..]
            .iter()
            .filter(|f| f.category == category)
            .map(|f| SimilarFinding {
                id: f.id.clone(),
                title: f.title.clone(),
                resolution: match f.status {
                    FindingStatus::Resolved => "resolved".to_string(),
                    _ => "pending".to_string(),
                },
            })
            .take(SIMILAR_CAP)
            .collect()
    }
}

fn validate(new: &NewFinding) -> Result<(), CoordinatorError> {
    for (field, value) in [
        ("title", &new.title),
        ("description", &new.description),
        ("category", &new.category),
    ] {
        if value.trim().is_empty() {
            return Err(CoordinatorError::Validation(format!(
                "finding {field} must not be empty"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewFinding {
        NewFinding {
            title: "SQL Injection".into(),
            description: "user input concatenated into a query".into(),
            severity: Severity::Critical,
            category: "security".into(),
            file_path: Some("a.py".into()),
            line_number: Some(10),
        }
    }

    #[test]
    fn hash_is_stable_and_locator_sensitive() {
        let a = finding_hash(&sample());
        assert_eq!(a, finding_hash(&sample()));

        let mut moved = sample();
        moved.line_number = Some(11);
        assert_ne!(a, finding_hash(&moved));

        let mut retitled = sample();
        retitled.title = "Command Injection".into();
        assert_ne!(a, finding_hash(&retitled));
    }

    #[test]
    fn hash_ignores_title_beyond_prefix() {
        let mut long_a = sample();
        long_a.title = format!("{}{}", "x".repeat(TITLE_HASH_PREFIX), "tail one");
        let mut long_b = sample();
        long_b.title = format!("{}{}", "x".repeat(TITLE_HASH_PREFIX), "tail two");
        assert_eq!(finding_hash(&long_a), finding_hash(&long_b));
    }

    #[test]
    fn empty_title_is_rejected() {
        let mut c = Coordinator::in_memory();
        let mut bad = sample();
        bad.title = "  ".into();
        let err = c.submit_finding(bad).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn new_finding_spawns_plan_task_at_severity() {
        let mut c = Coordinator::in_memory();
        let finding = c.submit_finding(sample()).unwrap();
        assert_eq!(finding.status, FindingStatus::New);
        let task_id = finding.task_id.expect("spawned task");
        let task = c.task(&task_id).expect("task queued");
        assert_eq!(task.task_type, "plan");
        assert_eq!(task.priority, Priority::Critical);
        assert_eq!(task.context.finding_id, Some(finding.id));
        assert_eq!(task.context.pattern.as_deref(), Some("security:critical"));
    }

    #[test]
    fn duplicate_submission_spawns_nothing() {
        let mut c = Coordinator::in_memory();
        c.submit_finding(sample()).unwrap();
        let before = c.queue().len();

        let second = c.submit_finding(sample()).unwrap();
        assert_eq!(second.status, FindingStatus::Duplicate);
        assert!(second.task_id.is_none());
        assert_eq!(c.queue().len(), before);
        // Only the original is recorded.
        assert_eq!(c.findings().len(), 1);
    }

    #[test]
    fn similar_findings_share_category_and_exclude_self() {
        let mut c = Coordinator::in_memory();
        c.submit_finding(sample()).unwrap();
        let mut other = sample();
        other.title = "XSS in template".into();
        other.line_number = Some(99);
        let finding = c.submit_finding(other).unwrap();
        assert_eq!(finding.similar.len(), 1);
        assert_eq!(finding.similar[0].title, "SQL Injection");
    }

    #[test]
    fn pattern_counter_accumulates() {
        let mut c = Coordinator::in_memory();
        c.submit_finding(sample()).unwrap();
        let mut other = sample();
        other.title = "Hardcoded credentials".into();
        other.file_path = Some("b.py".into());
        let second = c.submit_finding(other).unwrap();
        assert_eq!(second.pattern_count, Some(2));
    }
}

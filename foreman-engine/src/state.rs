//! Crash-safe persistence of the full coordinator state.
//!
//! The backing medium sits behind [`StateStore`] so it can be swapped without
//! touching the engine. The file implementation writes a `.tmp` sibling,
//! rotates the live file into a single-generation backup, then renames the
//! temp file into place — the live file is always a complete snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use foreman_core::error::{persistence_err, CoordinatorError};
use foreman_core::types::{Agent, AgentHealth, AgentId, Finding, KnowledgeBase, Task};

pub const STATE_FILE: &str = "state.json";
pub const BACKUP_FILE: &str = "state.backup.json";
pub const TEMP_FILE: &str = "state.tmp.json";

/// The persisted state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CoordinatorState {
    #[serde(default)]
    pub agents: BTreeMap<AgentId, Agent>,
    /// Ordered — queue position is part of the state.
    #[serde(default)]
    pub task_queue: Vec<Task>,
    #[serde(default)]
    pub audit_findings: Vec<Finding>,
    #[serde(default)]
    pub agent_health: BTreeMap<AgentId, AgentHealth>,
    #[serde(default)]
    pub knowledge_base: KnowledgeBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Durable storage for [`CoordinatorState`].
///
/// `load` never fails: a missing or malformed snapshot degrades to the backup
/// and finally to an empty state, so startup cannot be blocked by bad data.
pub trait StateStore: Send + Sync {
    fn save(&mut self, state: &CoordinatorState) -> Result<(), CoordinatorError>;
    fn load(&mut self) -> CoordinatorState;
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// JSON file store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn live_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(TEMP_FILE)
    }

    fn read_snapshot(path: &Path) -> Option<CoordinatorState> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "state file unreadable");
                }
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "state file malformed");
                None
            }
        }
    }
}

impl StateStore for FileStateStore {
    fn save(&mut self, state: &CoordinatorState) -> Result<(), CoordinatorError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| persistence_err(&self.dir, e))?;

        let tmp = self.temp_path();
        let live = self.live_path();
        let backup = self.backup_path();

        let json =
            serde_json::to_string_pretty(state).map_err(|e| persistence_err(&live, e))?;
        std::fs::write(&tmp, json).map_err(|e| persistence_err(&tmp, e))?;

        // Rotate the previous snapshot into the single-generation backup.
        if live.exists() {
            std::fs::rename(&live, &backup).map_err(|e| persistence_err(&backup, e))?;
        }
        std::fs::rename(&tmp, &live).map_err(|e| persistence_err(&live, e))?;
        Ok(())
    }

    fn load(&mut self) -> CoordinatorState {
        if let Some(state) = Self::read_snapshot(&self.live_path()) {
            return state;
        }
        if let Some(state) = Self::read_snapshot(&self.backup_path()) {
            tracing::warn!(dir = %self.dir.display(), "loaded state from backup");
            return state;
        }
        tracing::info!(dir = %self.dir.display(), "starting with empty state");
        CoordinatorState::default()
    }
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// In-memory store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: Option<CoordinatorState>,
}

impl MemoryStateStore {
    pub fn snapshot(&self) -> Option<&CoordinatorState> {
        self.snapshot.as_ref()
    }
}

impl StateStore for MemoryStateStore {
    fn save(&mut self, state: &CoordinatorState) -> Result<(), CoordinatorError> {
        self.snapshot = Some(state.clone());
        Ok(())
    }

    fn load(&mut self) -> CoordinatorState {
        self.snapshot.clone().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foreman_core::types::{AgentStatus, TaskId};
    use tempfile::TempDir;

    fn agent(id: &str) -> Agent {
        let now = Utc::now();
        Agent {
            id: AgentId::from(id),
            role: "coder".into(),
            capabilities: vec!["rust".into()],
            status: AgentStatus::Active,
            registered_at: now,
            last_seen: now,
        }
    }

    fn state_with_agent(id: &str) -> CoordinatorState {
        let mut state = CoordinatorState::default();
        state
            .agents
            .insert(AgentId::from(id), agent(id));
        state.saved_at = Some(Utc::now());
        state
    }

    #[test]
    fn load_missing_file_returns_empty_state() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::new(dir.path());
        let state = store.load();
        assert!(state.agents.is_empty());
        assert!(state.task_queue.is_empty());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::new(dir.path());
        let state = state_with_agent("coder-001");
        store.save(&state).unwrap();
        let loaded = store.load();
        assert_eq!(loaded.agents, state.agents);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::new(dir.path());
        store.save(&CoordinatorState::default()).unwrap();
        assert!(!dir.path().join(TEMP_FILE).exists());
        assert!(dir.path().join(STATE_FILE).exists());
    }

    #[test]
    fn second_save_rotates_backup() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::new(dir.path());
        store.save(&state_with_agent("first")).unwrap();
        store.save(&state_with_agent("second")).unwrap();

        let backup = FileStateStore::read_snapshot(&store.backup_path()).unwrap();
        assert!(backup.agents.contains_key(&AgentId::from("first")));
        let live = FileStateStore::read_snapshot(&store.live_path()).unwrap();
        assert!(live.agents.contains_key(&AgentId::from("second")));
    }

    #[test]
    fn corrupt_live_file_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::new(dir.path());
        store.save(&state_with_agent("kept")).unwrap();
        store.save(&state_with_agent("clobbered")).unwrap();
        std::fs::write(store.live_path(), "{not json").unwrap();

        let loaded = store.load();
        assert!(loaded.agents.contains_key(&AgentId::from("kept")));
    }

    #[test]
    fn both_files_corrupt_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::new(dir.path());
        std::fs::write(store.live_path(), "oops").unwrap();
        std::fs::write(store.backup_path(), "also oops").unwrap();

        let loaded = store.load();
        assert_eq!(loaded, CoordinatorState::default());
    }

    #[test]
    fn task_queue_order_survives_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::new(dir.path());
        let mut state = CoordinatorState::default();
        for n in 0..3 {
            let now = Utc::now();
            state.task_queue.push(Task {
                id: TaskId::from(format!("task-{n}")),
                task_type: "audit".into(),
                description: format!("audit pass {n}"),
                priority: Default::default(),
                priority_score: 2,
                status: Default::default(),
                assigned_to: None,
                context: Default::default(),
                dependencies: vec![],
                retry_count: 0,
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
                failed_at: None,
                actual_duration_secs: None,
                result: None,
            });
        }
        store.save(&state).unwrap();
        let loaded = store.load();
        let ids: Vec<_> = loaded.task_queue.iter().map(|t| t.id.0.as_str()).collect();
        assert_eq!(ids, vec!["task-0", "task-1", "task-2"]);
    }
}

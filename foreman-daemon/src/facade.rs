//! Tool façade: maps named operations onto the coordinator.
//!
//! Each operation deserializes its own argument struct, takes the coordinator
//! lock for exactly one call, and serializes the result. Coordinator errors
//! cross the boundary as structured `OpError`s, never as panics.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use foreman_core::error::CoordinatorError;
use foreman_core::types::{AgentId, Priority, TaskContext, TaskId};
use foreman_engine::{Coordinator, NewFinding, NewTask};

use crate::protocol::OpResponse;

pub struct Facade {
    coordinator: Arc<RwLock<Coordinator>>,
    repo_root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RegisterAgentArgs {
    id: AgentId,
    role: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NextTaskArgs {
    agent_id: AgentId,
    agent_role: String,
}

#[derive(Debug, Deserialize)]
struct UpdateTaskArgs {
    task_id: TaskId,
    status: String,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskArgs {
    #[serde(rename = "type")]
    task_type: String,
    description: String,
    #[serde(default)]
    priority: Option<Priority>,
    /// Accepted for wire compatibility; assignment only ever happens through
    /// `get_next_task`.
    #[serde(default)]
    #[allow(dead_code)]
    assigned_to: Option<AgentId>,
    #[serde(default)]
    context: Option<TaskContext>,
    #[serde(default)]
    dependencies: Vec<TaskId>,
}

#[derive(Debug, Deserialize)]
struct AgentArgs {
    agent_id: AgentId,
}

#[derive(Debug, Deserialize)]
struct WorktreeArgs {
    branch_name: String,
}

impl Facade {
    pub fn new(coordinator: Arc<RwLock<Coordinator>>, repo_root: PathBuf) -> Self {
        Self {
            coordinator,
            repo_root,
        }
    }

    pub fn coordinator(&self) -> Arc<RwLock<Coordinator>> {
        self.coordinator.clone()
    }

    /// Run one named operation and shape the outcome into a response.
    pub async fn dispatch(&self, op: &str, args: Value) -> OpResponse {
        match self.handle(op, args).await {
            Ok(data) => OpResponse::ok(data),
            Err(err) => {
                tracing::warn!(op, error = %err, "operation failed");
                OpResponse::error(err.kind(), err.to_string(), op)
            }
        }
    }

    async fn handle(&self, op: &str, args: Value) -> Result<Value, CoordinatorError> {
        match op {
            "register_agent" => {
                let args: RegisterAgentArgs = parse(args)?;
                let mut coordinator = self.coordinator.write().await;
                let agent = coordinator.register_agent(args.id, args.role, args.capabilities);
                to_value(&agent)
            }
            "get_next_task" => {
                let args: NextTaskArgs = parse(args)?;
                let mut coordinator = self.coordinator.write().await;
                match coordinator.next_task(&args.agent_id, &args.agent_role) {
                    Some(task) => to_value(&task),
                    None => Ok(Value::Null),
                }
            }
            "update_task" => {
                let args: UpdateTaskArgs = parse(args)?;
                let status = args
                    .status
                    .parse()
                    .map_err(CoordinatorError::Validation)?;
                let mut coordinator = self.coordinator.write().await;
                let task = coordinator.update_task(&args.task_id, status, args.result)?;
                to_value(&task)
            }
            "submit_audit_finding" => {
                let args: NewFinding = parse(args)?;
                let mut coordinator = self.coordinator.write().await;
                let finding = coordinator.submit_finding(args)?;
                to_value(&finding)
            }
            "create_task" => {
                let args: CreateTaskArgs = parse(args)?;
                let mut coordinator = self.coordinator.write().await;
                let task = coordinator.create_task(NewTask {
                    task_type: args.task_type,
                    description: args.description,
                    priority: args.priority.unwrap_or_default(),
                    context: args.context,
                    dependencies: args.dependencies,
                });
                to_value(&task)
            }
            "get_agent_health" => {
                let args: AgentArgs = parse(args)?;
                let coordinator = self.coordinator.read().await;
                let report = coordinator.agent_health_report(&args.agent_id)?;
                to_value(&report)
            }
            "get_system_health" => {
                let coordinator = self.coordinator.read().await;
                to_value(&coordinator.system_health())
            }
            "recover_agent" => {
                let args: AgentArgs = parse(args)?;
                let mut coordinator = self.coordinator.write().await;
                coordinator.recover_agent(&args.agent_id)?;
                Ok(json!({
                    "success": true,
                    "message": format!("recovery initiated for agent {}", args.agent_id),
                }))
            }
            "create_worktree" => {
                let args: WorktreeArgs = parse(args)?;
                crate::worktree::create_worktree(&self.repo_root, &args.branch_name).await
            }
            "get_project_context" => {
                let coordinator = self.coordinator.read().await;
                to_value(&coordinator.project_context())
            }
            other => Err(CoordinatorError::Validation(format!(
                "unknown operation '{other}'"
            ))),
        }
    }
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, CoordinatorError> {
    serde_json::from_value(args)
        .map_err(|err| CoordinatorError::Validation(format!("invalid arguments: {err}")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, CoordinatorError> {
    serde_json::to_value(value)
        .map_err(|err| CoordinatorError::Transient(format!("response serialization: {err}")))
}

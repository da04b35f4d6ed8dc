//! End-to-end coordination scenarios exercising the engine as a whole.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use foreman_core::types::{AgentId, Priority, Severity, TaskContext, TaskStatus};
use foreman_engine::{Coordinator, FileStateStore, NewFinding, NewTask};

fn task(task_type: &str, description: &str, priority: Priority) -> NewTask {
    NewTask {
        task_type: task_type.into(),
        description: description.into(),
        priority,
        context: None,
        dependencies: vec![],
    }
}

fn finding(title: &str, severity: Severity, file: &str, line: u64) -> NewFinding {
    NewFinding {
        title: title.into(),
        description: format!("{title} observed during audit"),
        severity,
        category: "security".into(),
        file_path: Some(file.into()),
        line_number: Some(line),
    }
}

#[test]
fn queue_orders_by_priority_with_stable_arrival() {
    let mut c = Coordinator::in_memory();
    c.create_task(task("implement", "low priority cleanup", Priority::Low));
    c.create_task(task("implement", "critical hotfix", Priority::Critical));
    c.create_task(task("implement", "medium feature", Priority::Medium));
    c.create_task(task("implement", "second medium feature", Priority::Medium));

    let descriptions: Vec<&str> = c.queue().iter().map(|t| t.description.as_str()).collect();
    assert_eq!(
        descriptions,
        vec![
            "critical hotfix",
            "medium feature",
            "second medium feature",
            "low priority cleanup",
        ]
    );
}

#[test]
fn assignment_respects_role_dependencies_and_single_owner() {
    let mut c = Coordinator::in_memory();
    let coder = AgentId::from("coder-001");
    let other_coder = AgentId::from("coder-002");
    c.register_agent(coder.clone(), "coder".into(), vec![]);
    c.register_agent(other_coder.clone(), "coder".into(), vec![]);

    let base = c.create_task(task("implement", "build the parser", Priority::High));
    let dependent = c.create_task(NewTask {
        task_type: "implement".into(),
        description: "wire the parser into the pipeline".into(),
        priority: Priority::Critical,
        context: None,
        dependencies: vec![base.id.clone()],
    });

    // The dependent task outranks the base one but its dependency is unmet.
    let first = c.next_task(&coder, "coder").expect("base task assigned");
    assert_eq!(first.id, base.id);

    // The only remaining pending task is still blocked.
    assert!(c.next_task(&other_coder, "coder").is_none());

    c.update_task(&base.id, TaskStatus::Completed, None).unwrap();
    let second = c.next_task(&other_coder, "coder").expect("unblocked");
    assert_eq!(second.id, dependent.id);
    assert_eq!(second.assigned_to.as_ref(), Some(&other_coder));

    // An in-progress task is never handed out twice.
    assert!(c.next_task(&coder, "coder").is_none());
}

#[test]
fn unsuitable_role_gets_nothing() {
    let mut c = Coordinator::in_memory();
    let planner = AgentId::from("planner-001");
    c.register_agent(planner.clone(), "planner".into(), vec![]);
    c.create_task(task("implement", "refactor the cache", Priority::High));
    assert!(c.next_task(&planner, "planner").is_none());
}

#[test]
fn required_capabilities_gate_assignment() {
    let mut c = Coordinator::in_memory();
    let generalist = AgentId::from("coder-001");
    let specialist = AgentId::from("coder-002");
    c.register_agent(generalist.clone(), "coder".into(), vec!["rust".into()]);
    c.register_agent(
        specialist.clone(),
        "coder".into(),
        vec!["rust".into(), "docker".into()],
    );

    let created = c.create_task(NewTask {
        task_type: "implement".into(),
        description: "containerize the build".into(),
        priority: Priority::High,
        context: Some(TaskContext {
            required_capabilities: vec!["docker".into()],
            ..TaskContext::default()
        }),
        dependencies: vec![],
    });

    // Right role, missing capability: the task stays pending.
    assert!(c.next_task(&generalist, "coder").is_none());
    assert_eq!(
        c.task(&created.id).map(|t| t.status),
        Some(TaskStatus::Pending)
    );

    let assigned = c.next_task(&specialist, "coder").expect("capable agent");
    assert_eq!(assigned.id, created.id);
}

#[test]
fn error_prone_agent_is_throttled_to_one_task() {
    let mut c = Coordinator::in_memory();
    let coder = AgentId::from("coder-001");
    c.register_agent(coder.clone(), "coder".into(), vec![]);

    // Six terminal-path failures push the agent's error count past five,
    // which drops its concurrency ceiling to one.
    c.create_task(task("implement", "flaky job one", Priority::High));
    c.create_task(task("implement", "flaky job two", Priority::High));
    for _ in 0..6 {
        let assigned = c.next_task(&coder, "coder").expect("assigned");
        c.update_task(&assigned.id, TaskStatus::Failed, None).unwrap();
    }
    assert_eq!(c.agent_load(&coder), 0);

    let fresh = c.create_task(task("implement", "steady feature work", Priority::Medium));
    let assigned = c.next_task(&coder, "coder").expect("one slot remains");
    assert_eq!(assigned.id, fresh.id);

    // At the reduced ceiling a second concurrent task is refused.
    let waiting = c.create_task(task("implement", "second feature", Priority::Medium));
    assert!(c.next_task(&coder, "coder").is_none());
    assert_eq!(
        c.task(&waiting.id).map(|t| t.status),
        Some(TaskStatus::Pending)
    );
}

#[test]
fn failed_task_retries_then_fails_terminally() {
    let mut c = Coordinator::in_memory();
    let coder = AgentId::from("coder-001");
    c.register_agent(coder.clone(), "coder".into(), vec![]);
    let created = c.create_task(task("implement", "flaky integration", Priority::High));

    for attempt in 1..=2 {
        let assigned = c.next_task(&coder, "coder").expect("assigned");
        assert_eq!(assigned.id, created.id);
        let failed = c.update_task(&created.id, TaskStatus::Failed, None).unwrap();
        assert_eq!(failed.status, TaskStatus::Pending, "attempt {attempt} requeues");
        assert_eq!(failed.retry_count, attempt);
        assert!(failed.assigned_to.is_none());
    }

    c.next_task(&coder, "coder").expect("third attempt");
    let terminal = c.update_task(&created.id, TaskStatus::Failed, None).unwrap();
    assert_eq!(terminal.status, TaskStatus::Failed);
    assert_eq!(terminal.retry_count, 3);
    assert!(terminal.failed_at.is_some());

    // Terminal tasks are never reassigned.
    assert!(c.next_task(&coder, "coder").is_none());
}

#[test]
fn completion_clears_assignment_and_feeds_knowledge() {
    let mut c = Coordinator::in_memory();
    let coder = AgentId::from("coder-001");
    c.register_agent(coder.clone(), "coder".into(), vec![]);
    let created = c.create_task(task("implement", "add pagination", Priority::Medium));
    c.next_task(&coder, "coder").expect("assigned");

    let done = c
        .update_task(&created.id, TaskStatus::Completed, Some(serde_json::json!({"pr": 42})))
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.assigned_to.is_none());
    assert!(done.actual_duration_secs.is_some());
    assert_eq!(c.agent_load(&coder), 0);
    assert!(c.knowledge().task_durations.contains_key("implement"));

    let report = c.agent_health_report(&coder).unwrap();
    assert_eq!(report.metrics.tasks_completed, 1);
    assert_eq!(report.metrics.success_rate, 1.0);
}

#[test]
fn finding_intake_spawns_plan_and_dedups_resubmission() {
    let mut c = Coordinator::in_memory();
    let first = c
        .submit_finding(finding("SQL Injection in login", Severity::Critical, "auth.py", 42))
        .unwrap();
    let plan_id = first.task_id.clone().expect("plan task spawned");
    let plan = c.task(&plan_id).expect("queued").clone();
    assert_eq!(plan.task_type, "plan");
    assert_eq!(plan.priority, Priority::Critical);

    let queue_before = c.queue().len();
    let resubmitted = c
        .submit_finding(finding("SQL Injection in login", Severity::Critical, "auth.py", 42))
        .unwrap();
    assert!(resubmitted.task_id.is_none());
    assert_eq!(c.queue().len(), queue_before);

    // A planner can pick the plan task up.
    let planner = AgentId::from("planner-001");
    c.register_agent(planner.clone(), "planner".into(), vec![]);
    let assigned = c.next_task(&planner, "planner").expect("plan assigned");
    assert_eq!(assigned.id, plan_id);
}

#[test]
fn recover_requeues_in_flight_work() {
    let mut c = Coordinator::in_memory();
    let coder = AgentId::from("coder-001");
    c.register_agent(coder.clone(), "coder".into(), vec![]);
    let created = c.create_task(task("implement", "migrate schema", Priority::High));
    c.next_task(&coder, "coder").expect("assigned");

    c.recover_agent(&coder).unwrap();
    let requeued = c.task(&created.id).unwrap();
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert!(requeued.assigned_to.is_none());
    assert_eq!(c.agent_load(&coder), 0);

    // A healthy peer can take the requeued task over.
    let peer = AgentId::from("coder-002");
    c.register_agent(peer.clone(), "coder".into(), vec![]);
    let taken = c.next_task(&peer, "coder").expect("reassigned");
    assert_eq!(taken.id, created.id);
}

#[test]
fn aging_promotes_stale_low_priority_work() {
    let mut c = Coordinator::in_memory();
    let old = Utc::now() - Duration::minutes(45);
    c.create_task_at(task("implement", "stale chore", Priority::Low), old);
    c.create_task(task("implement", "fresh medium task", Priority::Medium));

    // One pass lifts the stale task from 1 to 2; ties break by age.
    let boosted = c.age_pending_tasks();
    assert_eq!(boosted, 1);
    let descriptions: Vec<&str> = c.queue().iter().map(|t| t.description.as_str()).collect();
    assert_eq!(descriptions, vec!["stale chore", "fresh medium task"]);
    assert_eq!(c.queue()[0].priority_score, 2);
}

#[test]
fn aging_never_boosts_past_the_critical_score() {
    let mut c = Coordinator::in_memory();
    let old = Utc::now() - Duration::minutes(120);
    c.create_task_at(task("implement", "ancient chore", Priority::Low), old);

    // Low starts at 1; three passes walk it up to the ceiling.
    for expected in [2, 3, 4] {
        assert_eq!(c.age_pending_tasks(), 1);
        assert_eq!(c.queue()[0].priority_score, expected);
    }

    // Further passes leave the score alone.
    assert_eq!(c.age_pending_tasks(), 0);
    assert_eq!(c.age_pending_tasks(), 0);
    assert_eq!(c.queue()[0].priority_score, 4);
}

#[test]
fn overlap_exactly_at_the_threshold_counts_as_similar() {
    let mut c = Coordinator::in_memory();
    let earlier = c.create_task(task(
        "implement",
        "tune cache eviction for session store shard",
        Priority::Medium,
    ));

    // Three shared words out of a ten-word union: overlap is exactly 0.3.
    let created = c.create_task(task(
        "implement",
        "tune cache eviction during nightly imports",
        Priority::Medium,
    ));
    let similar = &created.context.similar_tasks;
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].task_id, earlier.id);
    assert_eq!(similar[0].similarity, 0.3);
}

#[test]
fn state_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let coder = AgentId::from("coder-001");
    let created;
    {
        let mut c = Coordinator::new(Box::new(FileStateStore::new(dir.path())));
        c.register_agent(coder.clone(), "coder".into(), vec!["rust".into()]);
        created = c.create_task(task("implement", "persist me", Priority::High));
        c.next_task(&coder, "coder").expect("assigned");
        c.submit_finding(finding("Path traversal", Severity::High, "files.py", 7))
            .unwrap();
    }

    let restored = Coordinator::new(Box::new(FileStateStore::new(dir.path())));
    assert!(restored.agent(&coder).is_some());
    assert_eq!(
        restored.task(&created.id).map(|t| t.status),
        Some(TaskStatus::InProgress)
    );
    assert_eq!(restored.agent_load(&coder), 1);
    assert_eq!(restored.findings().len(), 1);
    let health = restored.system_health();
    assert_eq!(health.findings.total, 1);
    assert_eq!(health.findings.patterns.get("security:high"), Some(&1));
}

#[test]
fn sweep_then_delay_reactivates_a_silent_agent() {
    let mut c = Coordinator::in_memory();
    let coder = AgentId::from("coder-001");
    let start = Utc::now();
    c.register_agent_at(coder.clone(), "coder".into(), vec![], start);
    let created = c.create_task_at(task("implement", "long running job", Priority::High), start);
    c.next_task_at(&coder, "coder", start).expect("assigned");

    // Agent goes silent past the heartbeat timeout.
    let stale = start + Duration::seconds(400);
    let report = c.sweep_agents_at(stale);
    assert_eq!(report.failed, vec![coder.clone()]);
    assert_eq!(
        c.task(&created.id).map(|t| t.status),
        Some(TaskStatus::Pending)
    );

    // The next sweep after the recovery delay brings it back.
    let later = stale + Duration::seconds(30);
    let report = c.sweep_agents_at(later);
    assert_eq!(report.reactivated, vec![coder.clone()]);
    assert_eq!(
        c.agent(&coder).unwrap().status,
        foreman_core::types::AgentStatus::Active
    );
}

//! Integration tests for the orchestrator's decision protocol and project driver.
//!
//! The advisor is scripted per role; tools are the real artifact tool behind
//! the audited invoker.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskwright_agent::EscalationGates;
use taskwright_config::{AgentProfile, EngineConfig};
use taskwright_core::advisor::{Advisor, AdvisorRequest, AdvisorResponse, AdvisorRole};
use taskwright_core::error::AdvisorError;
use taskwright_core::event::{DomainEvent, EventBus};
use taskwright_core::gate::{GateDecision, GateStatus};
use taskwright_core::state::{TaskResult, TaskState};
use taskwright_core::store::{RecordKind, StateStore};
use taskwright_core::task::{ArtifactRef, ProjectId, Task, TaskStatus};
use taskwright_core::tool::{ToolInvoker, ToolRegistry};
use taskwright_memory::{ArtifactStore, ArtifactTool, InMemoryStore};
use taskwright_orchestrator::{Orchestrator, OrchestratorError, Outcome, ProjectState};
use taskwright_security::audit::{AuditLogger, AuditOutcome};
use taskwright_security::invoker::AuditedInvoker;
use taskwright_security::policy::ToolPolicy;

// ── Scripted advisor ─────────────────────────────────────────────────────

type Scripted = Result<AdvisorResponse, AdvisorError>;

#[derive(Default)]
struct ScriptedAdvisor {
    queues: Mutex<HashMap<AdvisorRole, VecDeque<Scripted>>>,
    calls: Mutex<Vec<AdvisorRole>>,
    delays: Mutex<HashMap<AdvisorRole, Duration>>,
    // (active, peak) concurrent calls per role
    concurrency: Mutex<HashMap<AdvisorRole, (usize, usize)>>,
}

impl ScriptedAdvisor {
    fn delay(&self, role: AdvisorRole, delay: Duration) {
        self.delays.lock().unwrap().insert(role, delay);
    }

    fn peak(&self, role: AdvisorRole) -> usize {
        self.concurrency.lock().unwrap().get(&role).map_or(0, |(_, peak)| *peak)
    }

    fn push(&self, role: AdvisorRole, response: Scripted) {
        self.queues.lock().unwrap().entry(role).or_default().push_back(response);
    }

    fn decide(&self, decision: serde_json::Value) {
        self.push(AdvisorRole::DecideNextAction, Ok(AdvisorResponse::new(decision)));
    }

    fn calls_for(&self, role: AdvisorRole) -> usize {
        self.calls.lock().unwrap().iter().filter(|r| **r == role).count()
    }
}

#[async_trait::async_trait]
impl Advisor for ScriptedAdvisor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn consult(&self, request: AdvisorRequest) -> Result<AdvisorResponse, AdvisorError> {
        self.calls.lock().unwrap().push(request.role);
        {
            let mut concurrency = self.concurrency.lock().unwrap();
            let (active, peak) = concurrency.entry(request.role).or_default();
            *active += 1;
            *peak = (*peak).max(*active);
        }
        let delay = self.delays.lock().unwrap().get(&request.role).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((active, _)) = self.concurrency.lock().unwrap().get_mut(&request.role) {
            *active -= 1;
        }

        self.queues
            .lock()
            .unwrap()
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(AdvisorError::Transport(format!("nothing scripted for {}", request.role))))
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────

struct Fixture {
    advisor: Arc<ScriptedAdvisor>,
    artifacts: ArtifactStore,
    audit: Arc<AuditLogger>,
    store: Arc<InMemoryStore>,
    event_bus: Arc<EventBus>,
    orchestrator: Orchestrator,
    project_id: ProjectId,
}

async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

async fn fixture_with(configure: impl FnOnce(&mut EngineConfig)) -> Fixture {
    let mut config = EngineConfig::default();
    config.agents = vec![
        AgentProfile::new("writer", "Writes documents").with_allowed_tools(["artifacts"]),
        AgentProfile::new("reviewer", "Reviews documents").with_allowed_tools(["artifacts"]),
    ];
    config.agent.backoff_base_ms = 0;
    config.orchestrator.advisor_retry_backoff_ms = 0;
    config.escalation.block_on_escalation = false;
    configure(&mut config);

    let advisor = Arc::new(ScriptedAdvisor::default());
    let artifacts = ArtifactStore::new();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ArtifactTool::new(artifacts.clone())));
    let audit = Arc::new(AuditLogger::new());
    let tools: Arc<dyn ToolInvoker> = Arc::new(AuditedInvoker::new(
        Arc::new(registry),
        ToolPolicy::from_profiles(&config.agents),
        audit.clone(),
    ));

    let store = Arc::new(InMemoryStore::new());
    let event_bus = Arc::new(EventBus::default());
    let gates = Arc::new(EscalationGates::new(event_bus.clone()).with_store(store.clone()));
    let orchestrator =
        Orchestrator::new(advisor.clone(), tools, gates, event_bus.clone(), config).with_store(store.clone());
    let project_id = orchestrator
        .create_project(ProjectId::from("docs"), "publish the design document")
        .await;

    Fixture {
        advisor,
        artifacts,
        audit,
        store,
        event_bus,
        orchestrator,
        project_id,
    }
}

fn finished(project_id: &ProjectId, status: TaskStatus, artifacts: &[(&str, &str)]) -> (Task, TaskResult) {
    let task = Task::new(project_id.clone(), "writer", "draft the design");
    let mut state = TaskState::new(&task, "writer-1", 20);
    for (name, content) in artifacts {
        state.record_artifact(*name, *content);
    }
    let result = state.finalize(status, None, None);
    (task, result)
}

fn create_task(agent_type: &str, refs: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "decision": "create-task",
        "agent_type": agent_type,
        "description": "review the design",
        "context_refs": refs,
        "acceptance_criteria": ["review notes list every open issue"],
    })
}

// ── Decision protocol ────────────────────────────────────────────────────

#[tokio::test]
async fn create_task_references_exactly_the_named_artifacts() {
    let f = fixture().await;
    f.artifacts.write(&f.project_id, "design.md", "# Design\nQueues and gates.").await;
    f.advisor.decide(create_task("reviewer", &["design.md", "missing.md"]));

    let (task, result) = finished(&f.project_id, TaskStatus::Success, &[("design.md", "stale copy")]);
    let outcome = f.orchestrator.on_task_completed(&task, &result).await.unwrap();
    let Outcome::TaskCreated(task_id) = outcome else {
        panic!("expected a created task, got {outcome:?}");
    };

    let queued = f.orchestrator.queued_tasks(&f.project_id).await.unwrap();
    assert_eq!(queued.len(), 1);
    let next = &queued[0];
    assert_eq!(next.task_id, task_id);
    assert_eq!(next.agent_type, "reviewer");
    let names: Vec<&str> = next.context.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["design.md", "missing.md"]);
    // previews come from a fresh read, not the completed task's copy
    assert_eq!(next.context[0].preview.as_deref(), Some("# Design\nQueues and gates."));
    assert!(next.context[1].preview.is_none());
    assert!(next.rationale.as_deref().unwrap().contains(&task.task_id.0));
}

#[tokio::test]
async fn completed_task_artifacts_are_reread_through_the_invoker() {
    let f = fixture().await;
    f.artifacts.write(&f.project_id, "design.md", "current").await;
    f.advisor
        .decide(serde_json::json!({"decision": "wait", "reason": "reviewer busy"}));

    let (task, result) = finished(&f.project_id, TaskStatus::Exhausted, &[("design.md", "old")]);
    f.orchestrator.on_task_completed(&task, &result).await.unwrap();

    let reads = f
        .audit
        .entries()
        .into_iter()
        .filter(|e| e.actor == "orchestrator")
        .count();
    assert_eq!(reads, 1);
}

#[tokio::test]
async fn seeded_context_is_not_reread_on_completion() {
    let f = fixture().await;
    f.artifacts.write(&f.project_id, "brief.md", "the brief").await;
    f.advisor
        .decide(serde_json::json!({"decision": "wait", "reason": "nothing new"}));

    let task = Task::new(f.project_id.clone(), "reviewer", "review the brief")
        .with_context(vec![ArtifactRef::with_preview("brief.md", "the brief", 100)]);
    let state = TaskState::new(&task, "reviewer-1", 20);
    assert!(state.artifacts.contains_key("brief.md"));
    let result = state.finalize(TaskStatus::Success, None, None);
    f.orchestrator.on_task_completed(&task, &result).await.unwrap();

    let reads = f
        .audit
        .entries()
        .into_iter()
        .filter(|e| e.actor == "orchestrator")
        .count();
    assert_eq!(reads, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_decision_is_retried_once_then_defaults_to_wait() {
    let f = fixture().await;
    let mut events = f.event_bus.subscribe();
    f.advisor.push(
        AdvisorRole::DecideNextAction,
        Err(AdvisorError::Transport("connection reset".into())),
    );
    f.advisor.push(
        AdvisorRole::DecideNextAction,
        Ok(AdvisorResponse::new(serde_json::json!({"decision": "teleport"}))),
    );

    let (task, result) = finished(&f.project_id, TaskStatus::Success, &[]);
    let outcome = f.orchestrator.on_task_completed(&task, &result).await.unwrap();

    assert_eq!(outcome, Outcome::Waiting { defaulted: true });
    assert_eq!(f.advisor.calls_for(AdvisorRole::DecideNextAction), 2);
    let snapshot = f.orchestrator.snapshot(&f.project_id).await.unwrap();
    assert_eq!(snapshot.state, ProjectState::Idle);

    let mut defaulted = false;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::DecisionMade { defaulted: d, decision, .. } = event.as_ref() {
            assert_eq!(decision, "wait");
            defaulted = *d;
        }
    }
    assert!(defaulted);
}

#[tokio::test]
async fn malformed_decision_then_valid_one() {
    let f = fixture().await;
    f.advisor.push(
        AdvisorRole::DecideNextAction,
        Ok(AdvisorResponse::new(serde_json::json!({"decision": "create-task"}))),
    );
    f.advisor.decide(create_task("reviewer", &[]));

    let (task, result) = finished(&f.project_id, TaskStatus::Success, &[]);
    let outcome = f.orchestrator.on_task_completed(&task, &result).await.unwrap();

    assert!(matches!(outcome, Outcome::TaskCreated(_)));
    assert_eq!(f.advisor.calls_for(AdvisorRole::DecideNextAction), 2);
}

#[tokio::test]
async fn unknown_agent_type_is_a_protocol_error() {
    let f = fixture().await;
    f.advisor.decide(create_task("astronaut", &[]));

    let (task, result) = finished(&f.project_id, TaskStatus::Success, &[]);
    let err = f.orchestrator.on_task_completed(&task, &result).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Protocol(_)));
    assert!(f.orchestrator.queued_tasks(&f.project_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn escalation_suspends_until_approved() {
    let f = fixture().await;
    f.advisor
        .decide(serde_json::json!({"decision": "escalate-to-human", "reason": "scope unclear"}));

    let (task, result) = finished(&f.project_id, TaskStatus::Escalated, &[]);
    let Outcome::Escalated(gate_id) = f.orchestrator.on_task_completed(&task, &result).await.unwrap() else {
        panic!("expected escalation");
    };
    let snapshot = f.orchestrator.snapshot(&f.project_id).await.unwrap();
    assert_eq!(snapshot.state, ProjectState::Suspended { gate_id: gate_id.clone() });

    // completions while suspended are recorded, not decided
    let (late, late_result) = finished(&f.project_id, TaskStatus::Success, &[]);
    assert_eq!(
        f.orchestrator.on_task_completed(&late, &late_result).await.unwrap(),
        Outcome::Deferred
    );
    assert_eq!(f.advisor.calls_for(AdvisorRole::DecideNextAction), 1);

    // still pending: nothing changes
    let state = f.orchestrator.resume(&f.project_id).await.unwrap();
    assert!(matches!(state, ProjectState::Suspended { .. }));

    f.orchestrator
        .gates()
        .resolve(&gate_id, GateDecision::Approved, Some(serde_json::json!({"scope": "v1 only"})))
        .await
        .unwrap();
    f.advisor
        .decide(serde_json::json!({"decision": "mark-project-complete", "summary": "v1 shipped"}));

    let state = f.orchestrator.resume(&f.project_id).await.unwrap();
    assert_eq!(
        state,
        ProjectState::Completed {
            summary: Some("v1 shipped".into())
        }
    );
}

#[tokio::test]
async fn rejected_escalation_halts_the_project() {
    let f = fixture().await;
    f.advisor
        .decide(serde_json::json!({"decision": "escalate-to-human", "reason": "budget"}));
    let (task, result) = finished(&f.project_id, TaskStatus::Exhausted, &[]);
    let Outcome::Escalated(gate_id) = f.orchestrator.on_task_completed(&task, &result).await.unwrap() else {
        panic!("expected escalation");
    };

    f.orchestrator
        .gates()
        .resolve(&gate_id, GateDecision::Rejected, None)
        .await
        .unwrap();
    let state = f.orchestrator.resume(&f.project_id).await.unwrap();
    assert!(state.is_closed());
    assert_eq!(f.orchestrator.gates().get(&gate_id).await.unwrap().status, GateStatus::Rejected);
}

#[tokio::test]
async fn completed_project_rejects_new_tasks() {
    let f = fixture().await;
    f.advisor
        .decide(serde_json::json!({"decision": "mark-project-complete"}));
    let (task, result) = finished(&f.project_id, TaskStatus::Success, &[]);
    assert_eq!(
        f.orchestrator.on_task_completed(&task, &result).await.unwrap(),
        Outcome::Completed
    );

    let err = f
        .orchestrator
        .enqueue(Task::new(f.project_id.clone(), "writer", "one more thing"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ProjectClosed(_)));
}

#[tokio::test]
async fn unknown_project_is_an_error() {
    let f = fixture().await;
    let (task, result) = finished(&ProjectId::from("elsewhere"), TaskStatus::Success, &[]);
    let err = f.orchestrator.on_task_completed(&task, &result).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownProject(_)));
}

// ── Project driver ───────────────────────────────────────────────────────

fn plan_write(project_id: &ProjectId, name: &str, content: &str) -> Scripted {
    Ok(AdvisorResponse::new(serde_json::json!({
        "reasoning": format!("write {name}"),
        "action": {
            "kind": "tool",
            "tool_name": "artifacts",
            "operation": "write",
            "parameters": {"project_id": project_id.0, "name": name, "content": content},
        },
        "goal_met": true,
    })))
}

#[tokio::test]
async fn project_runs_tasks_in_sequence_until_complete() {
    let f = fixture().await;
    f.advisor.push(AdvisorRole::Plan, plan_write(&f.project_id, "design.md", "# Design"));
    f.advisor.push(AdvisorRole::Plan, plan_write(&f.project_id, "review.md", "looks good"));
    f.advisor.push(
        AdvisorRole::EvaluateProgress,
        Ok(AdvisorResponse::new(serde_json::json!({"score": 0.9}))),
    );
    f.advisor.push(
        AdvisorRole::EvaluateProgress,
        Ok(AdvisorResponse::new(serde_json::json!({"score": 0.9}))),
    );
    f.advisor.decide(create_task("reviewer", &["design.md"]));
    f.advisor
        .decide(serde_json::json!({"decision": "mark-project-complete", "summary": "done"}));

    f.orchestrator
        .enqueue(Task::new(f.project_id.clone(), "writer", "draft the design").with_criteria(["design drafted"]))
        .await
        .unwrap();
    let snapshot = f.orchestrator.run_project(&f.project_id).await.unwrap();

    assert!(matches!(snapshot.state, ProjectState::Completed { .. }));
    assert_eq!(snapshot.tasks_completed, 2);
    let agents: Vec<&str> = snapshot.history.iter().map(|s| s.agent_type.as_str()).collect();
    assert_eq!(agents, vec!["writer", "reviewer"]);
    assert!(snapshot.history.iter().all(|s| s.status == TaskStatus::Success));

    assert_eq!(f.artifacts.read(&f.project_id, "review.md").await.as_deref(), Some("looks good"));
    assert!(f.audit.entries_by_outcome(&AuditOutcome::Denied).is_empty());

    let results = f
        .store
        .query(taskwright_core::store::StoreQuery::kind(RecordKind::TaskResult).in_project(f.project_id.clone()))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn project_with_nothing_to_do_goes_idle() {
    let f = fixture().await;
    let snapshot = f.orchestrator.run_project(&f.project_id).await.unwrap();
    assert_eq!(snapshot.state, ProjectState::Idle);
    assert_eq!(snapshot.tasks_completed, 0);
}

#[tokio::test]
async fn independent_projects_run_together() {
    let f = fixture().await;
    let other = f.orchestrator.create_project(ProjectId::from("site"), "publish the site").await;
    f.advisor.push(AdvisorRole::Plan, plan_write(&f.project_id, "a.md", "a"));
    f.advisor.push(AdvisorRole::Plan, plan_write(&other, "b.md", "b"));
    for _ in 0..2 {
        f.advisor.push(
            AdvisorRole::EvaluateProgress,
            Ok(AdvisorResponse::new(serde_json::json!({"score": 0.5}))),
        );
        f.advisor.decide(serde_json::json!({"decision": "mark-project-complete"}));
    }

    f.orchestrator
        .enqueue(Task::new(f.project_id.clone(), "writer", "write a"))
        .await
        .unwrap();
    f.orchestrator
        .enqueue(Task::new(other.clone(), "writer", "write b"))
        .await
        .unwrap();

    let snapshots = f
        .orchestrator
        .run_projects(&[f.project_id.clone(), other.clone()])
        .await;
    assert_eq!(snapshots.len(), 2);
    for snapshot in snapshots {
        let snapshot = snapshot.unwrap();
        assert!(snapshot.state.is_closed());
        assert_eq!(snapshot.tasks_completed, 1);
    }
}

fn score(value: f64) -> Scripted {
    Ok(AdvisorResponse::new(serde_json::json!({"score": value})))
}

#[tokio::test]
async fn concurrent_tasks_stay_within_the_project_limit() {
    let f = fixture_with(|config| config.orchestrator.project_concurrency = 2).await;
    let mut events = f.event_bus.subscribe();
    f.advisor.delay(AdvisorRole::Plan, Duration::from_millis(50));
    for name in ["a.md", "b.md", "c.md"] {
        f.advisor.push(AdvisorRole::Plan, plan_write(&f.project_id, name, name));
        f.advisor.push(AdvisorRole::EvaluateProgress, score(0.9));
        f.advisor.decide(serde_json::json!({"decision": "wait", "reason": "more to come"}));
    }
    for goal in ["write a", "write b", "write c"] {
        f.orchestrator
            .enqueue(Task::new(f.project_id.clone(), "writer", goal))
            .await
            .unwrap();
    }

    let snapshot = f.orchestrator.run_project(&f.project_id).await.unwrap();
    assert_eq!(snapshot.tasks_completed, 3);

    let (mut running, mut peak) = (0usize, 0usize);
    while let Ok(event) = events.try_recv() {
        match event.as_ref() {
            DomainEvent::TaskStarted { .. } => {
                running += 1;
                peak = peak.max(running);
            }
            DomainEvent::TaskFinished { .. } => running -= 1,
            _ => {}
        }
    }
    assert_eq!(peak, 2);
    assert_eq!(f.advisor.peak(AdvisorRole::Plan), 2);
    assert_eq!(f.advisor.peak(AdvisorRole::DecideNextAction), 1);
}

#[tokio::test]
async fn simultaneous_completions_are_decided_one_at_a_time() {
    let f = fixture().await;
    f.advisor.delay(AdvisorRole::DecideNextAction, Duration::from_millis(20));
    f.advisor.decide(serde_json::json!({"decision": "wait", "reason": "first"}));
    f.advisor.decide(serde_json::json!({"decision": "wait", "reason": "second"}));

    let (first, first_result) = finished(&f.project_id, TaskStatus::Success, &[]);
    let (second, second_result) = finished(&f.project_id, TaskStatus::Success, &[]);
    let (a, b) = tokio::join!(
        f.orchestrator.on_task_completed(&first, &first_result),
        f.orchestrator.on_task_completed(&second, &second_result),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(f.advisor.calls_for(AdvisorRole::DecideNextAction), 2);
    assert_eq!(f.advisor.peak(AdvisorRole::DecideNextAction), 1);
    assert_eq!(f.orchestrator.snapshot(&f.project_id).await.unwrap().tasks_completed, 2);
}

/// Wait for the first `TaskStarted` on the bus.
async fn started_task(events: &mut tokio::sync::broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        if let DomainEvent::TaskStarted { .. } = events.recv().await.unwrap().as_ref() {
            return;
        }
    }
}

#[tokio::test]
async fn cancelling_a_running_task_stops_it() {
    let f = fixture().await;
    let mut events = f.event_bus.subscribe();
    f.advisor.delay(AdvisorRole::Plan, Duration::from_secs(30));
    f.advisor
        .decide(serde_json::json!({"decision": "wait", "reason": "cancelled"}));
    let task_id = f
        .orchestrator
        .enqueue(Task::new(f.project_id.clone(), "writer", "draft slowly"))
        .await
        .unwrap();

    let control = async {
        started_task(&mut events).await;
        let cancelled = f.orchestrator.cancel_task(&f.project_id, &task_id).await.unwrap();
        let unknown = f
            .orchestrator
            .cancel_task(&f.project_id, &taskwright_core::task::TaskId::from("nope"))
            .await
            .unwrap();
        (cancelled, unknown)
    };
    let (snapshot, (cancelled, unknown)) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(f.orchestrator.run_project(&f.project_id), control)
    })
    .await
    .unwrap();

    assert!(cancelled);
    assert!(!unknown);
    let snapshot = snapshot.unwrap();
    assert_eq!(snapshot.tasks_completed, 1);
    assert_eq!(snapshot.history[0].status, TaskStatus::Cancelled);
    assert!(!f.orchestrator.cancel_task(&f.project_id, &task_id).await.unwrap());
}

#[tokio::test]
async fn confidence_check_can_be_requested_for_a_running_task() {
    let f = fixture().await;
    let mut events = f.event_bus.subscribe();
    f.advisor.delay(AdvisorRole::Plan, Duration::from_millis(100));
    f.advisor.push(
        AdvisorRole::Plan,
        Ok(AdvisorResponse::new(serde_json::json!({"reasoning": "think first", "action": {"kind": "reason"}}))),
    );
    f.advisor.push(AdvisorRole::Plan, plan_write(&f.project_id, "notes.md", "done"));
    f.advisor.push(AdvisorRole::EvaluateProgress, score(0.3));
    f.advisor.push(AdvisorRole::EvaluateProgress, score(0.9));
    f.advisor.push(
        AdvisorRole::EvaluateConfidence,
        Ok(AdvisorResponse::new(serde_json::json!({"score": 0.8, "rationale": "on track"}))),
    );
    f.advisor.decide(serde_json::json!({"decision": "mark-project-complete"}));
    let task_id = f
        .orchestrator
        .enqueue(Task::new(f.project_id.clone(), "writer", "write notes"))
        .await
        .unwrap();

    let control = async {
        started_task(&mut events).await;
        f.orchestrator
            .request_confidence_check(&f.project_id, &task_id)
            .await
            .unwrap()
    };
    let (snapshot, requested) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(f.orchestrator.run_project(&f.project_id), control)
    })
    .await
    .unwrap();

    assert!(requested);
    assert_eq!(snapshot.unwrap().history[0].status, TaskStatus::Success);
    assert_eq!(f.advisor.calls_for(AdvisorRole::EvaluateConfidence), 1);
    assert!(
        !f.orchestrator
            .request_confidence_check(&f.project_id, &task_id)
            .await
            .unwrap()
    );
}

//! The orchestrator: owns every project's task queue and reacts to each
//! task completion by deciding what happens next.
//!
//! Per completion:
//!
//! 1. Record a bounded summary in the project history
//! 2. Re-read the artifacts the task produced through the tool invoker
//! 3. Ask the advisor for one decision from a closed set
//!    (`create-task`, `escalate-to-human`, `mark-project-complete`, `wait`)
//! 4. Execute it
//!
//! Completions for one project are handled one at a time: the project's
//! lock is held from the moment a completion arrives until its decision has
//! been carried out.

use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use taskwright_agent::{AgentLoop, EscalationGates, TaskHandle};
use taskwright_config::EngineConfig;
use taskwright_core::advisor::{Advisor, AdvisorRequest, AdvisorRole, NextAction};
use taskwright_core::error::GateError;
use taskwright_core::event::{DomainEvent, EventBus};
use taskwright_core::gate::{GateId, GateScope, GateStatus};
use taskwright_core::state::TaskResult;
use taskwright_core::store::{RecordKind, StateStore, StoredRecord};
use taskwright_core::task::{ArtifactRef, ProjectId, Task, TaskId, bounded_preview};
use taskwright_core::tool::{ToolInvoker, ToolResponse};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::project::{InFlight, Project, ProjectSnapshot, ProjectState, TaskSummary};

/// Requester id the orchestrator uses for its own tool calls.
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// A failed decision request is retried once.
const DECISION_ATTEMPTS: u32 = 2;

/// What a decision did to the project.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    TaskCreated(TaskId),
    Escalated(GateId),
    Completed,
    Waiting {
        /// The advisor failed and `wait` was chosen on its behalf
        defaulted: bool,
    },
    /// Completion recorded, no decision made (project suspended, closed, or shutting down)
    Deferred,
}

pub struct Orchestrator {
    advisor: Arc<dyn Advisor>,
    tools: Arc<dyn ToolInvoker>,
    gates: Arc<EscalationGates>,
    event_bus: Arc<EventBus>,
    config: EngineConfig,
    store: Option<Arc<dyn StateStore>>,
    projects: RwLock<HashMap<ProjectId, Arc<Mutex<Project>>>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        advisor: Arc<dyn Advisor>,
        tools: Arc<dyn ToolInvoker>,
        gates: Arc<EscalationGates>,
        event_bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            advisor,
            tools,
            gates,
            event_bus,
            config,
            store: None,
            projects: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Persist project snapshots, and hand the store to every agent loop.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn gates(&self) -> &Arc<EscalationGates> {
        &self.gates
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Register a new, active project.
    pub async fn create_project(&self, project_id: ProjectId, goal: impl Into<String>) -> ProjectId {
        let project = Project::new(project_id.clone(), goal, self.config.orchestrator.history_window);
        info!(project_id = %project_id, goal = %project.goal, "Project created");
        self.publish_state(&project);
        self.persist(&project).await;
        self.projects
            .write()
            .await
            .insert(project_id.clone(), Arc::new(Mutex::new(project)));
        project_id
    }

    pub async fn set_phase(&self, project_id: &ProjectId, phase: impl Into<String>) -> Result<()> {
        let project = self.project(project_id).await?;
        project.lock().await.phase = Some(phase.into());
        Ok(())
    }

    /// Queue a task on its project.
    pub async fn enqueue(&self, task: Task) -> Result<TaskId> {
        if !self.knows_agent_type(&task.agent_type) {
            return Err(OrchestratorError::Protocol(format!("unknown agent type '{}'", task.agent_type)));
        }
        let project = self.project(&task.project_id).await?;
        let mut p = project.lock().await;
        self.push_task(&mut p, task)
    }

    pub async fn snapshot(&self, project_id: &ProjectId) -> Result<ProjectSnapshot> {
        let project = self.project(project_id).await?;
        let p = project.lock().await;
        Ok(p.snapshot())
    }

    /// Tasks waiting to run, highest priority first.
    pub async fn queued_tasks(&self, project_id: &ProjectId) -> Result<Vec<Task>> {
        let project = self.project(project_id).await?;
        let p = project.lock().await;
        Ok(p.queue.ordered())
    }

    /// Cancel one running task. Returns whether it was in flight.
    pub async fn cancel_task(&self, project_id: &ProjectId, task_id: &TaskId) -> Result<bool> {
        let project = self.project(project_id).await?;
        let p = project.lock().await;
        match p.in_flight.get(task_id) {
            Some(running) => {
                info!(project_id = %project_id, task_id = %task_id, "Cancelling task");
                running.handle.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ask a running task for a confidence check after its next step.
    pub async fn request_confidence_check(&self, project_id: &ProjectId, task_id: &TaskId) -> Result<bool> {
        let project = self.project(project_id).await?;
        let p = project.lock().await;
        match p.in_flight.get(task_id) {
            Some(running) => {
                running.handle.request_confidence_check();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop dispatching and cancel every running task.
    pub fn shutdown(&self) {
        info!("Orchestrator shutting down");
        self.cancel.cancel();
    }

    /// React to one finished task. Called exactly once per completion.
    pub async fn on_task_completed(&self, task: &Task, result: &TaskResult) -> Result<Outcome> {
        let project = self.project(&task.project_id).await?;
        let mut p = project.lock().await;

        p.in_flight.remove(&task.task_id);
        p.tasks_completed += 1;
        let summary = TaskSummary::new(task, result);
        p.remember(summary.clone());
        info!(
            project_id = %p.project_id,
            task_id = %task.task_id,
            status = result.status.as_str(),
            steps = result.step_count(),
            "Task completion received"
        );

        let deferred = p.state.is_closed()
            || matches!(p.state, ProjectState::Suspended { .. })
            || self.cancel.is_cancelled();
        if deferred {
            debug!(project_id = %p.project_id, state = p.state.as_str(), "Decision deferred");
            self.persist(&p).await;
            return Ok(Outcome::Deferred);
        }

        let artifacts = self.reread_artifacts(&p.project_id, result).await;
        let trigger = serde_json::json!({
            "event": "task-completed",
            "task": summary,
            "artifacts": artifacts,
            "escalation": result.escalation,
        });
        let rationale = format!("follows task {} ({})", task.task_id, result.status);
        self.decide(&mut p, trigger, rationale).await
    }

    /// Re-check a suspended project's gate; approval resumes and asks for a
    /// fresh decision, rejection halts the project.
    pub async fn resume(&self, project_id: &ProjectId) -> Result<ProjectState> {
        let project = self.project(project_id).await?;
        let mut p = project.lock().await;
        let ProjectState::Suspended { gate_id } = p.state.clone() else {
            return Ok(p.state.clone());
        };
        let gate = self
            .gates
            .get(&gate_id)
            .await
            .ok_or_else(|| GateError::NotFound(gate_id.0.clone()))?;

        match gate.status {
            GateStatus::Pending => {}
            GateStatus::Approved => {
                self.set_state(&mut p, ProjectState::Active);
                let trigger = serde_json::json!({
                    "event": "gate-approved",
                    "gate_id": gate_id,
                    "reason": gate.reason,
                    "payload": gate.resolution_payload,
                });
                let rationale = format!("resumed after gate {gate_id} was approved");
                self.decide(&mut p, trigger, rationale).await?;
            }
            GateStatus::Rejected => {
                let dropped = p.queue.drain();
                if !dropped.is_empty() {
                    warn!(project_id = %project_id, dropped = dropped.len(), "Dropping queued tasks of halted project");
                }
                self.set_state(&mut p, ProjectState::Halted { gate_id });
                self.persist(&p).await;
            }
        }
        Ok(p.state.clone())
    }

    /// Drive one project until nothing is left to run.
    ///
    /// Up to `project_concurrency` tasks run at once. Returns when the
    /// project is idle or closed, when a project gate times out, or on
    /// shutdown.
    pub async fn run_project(&self, project_id: &ProjectId) -> Result<ProjectSnapshot> {
        let project = self.project(project_id).await?;
        let concurrency = self.config.orchestrator.project_concurrency.max(1);
        let mut running: JoinSet<(Task, Option<TaskResult>)> = JoinSet::new();

        info!(project_id = %project_id, concurrency, "Running project");
        loop {
            {
                let mut p = project.lock().await;
                while p.state.can_dispatch() && running.len() < concurrency && !self.cancel.is_cancelled() {
                    let Some(task) = p.queue.pop() else {
                        break;
                    };
                    let handle = TaskHandle::child_of(&self.cancel);
                    p.in_flight.insert(
                        task.task_id.clone(),
                        InFlight {
                            agent_type: task.agent_type.clone(),
                            goal: task.goal.clone(),
                            handle: handle.clone(),
                        },
                    );
                    debug!(project_id = %project_id, task_id = %task.task_id, agent_type = %task.agent_type, "Dispatching task");

                    let agent = self.agent_for(&task.agent_type);
                    running.spawn(async move {
                        let result = AssertUnwindSafe(agent.run(task.clone(), &handle))
                            .catch_unwind()
                            .await
                            .ok();
                        (task, result)
                    });
                }
            }

            match running.join_next().await {
                Some(Ok((task, Some(result)))) => {
                    if let Err(e) = self.on_task_completed(&task, &result).await {
                        warn!(project_id = %project_id, task_id = %task.task_id, error = %e, "Completion handling failed");
                        self.event_bus.publish(DomainEvent::ErrorOccurred {
                            context: format!("project {project_id}"),
                            error_message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
                Some(Ok((task, None))) => {
                    error!(project_id = %project_id, task_id = %task.task_id, "Agent loop panicked");
                    project.lock().await.in_flight.remove(&task.task_id);
                    self.event_bus.publish(DomainEvent::ErrorOccurred {
                        context: format!("task {}", task.task_id),
                        error_message: "agent loop panicked".into(),
                        timestamp: Utc::now(),
                    });
                }
                Some(Err(e)) => {
                    error!(project_id = %project_id, error = %e, "Agent loop task failed to join");
                }
                None => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let state = project.lock().await.state.clone();
                    match state {
                        ProjectState::Suspended { gate_id } => {
                            if !self.wait_for_gate(project_id, &gate_id).await? {
                                break;
                            }
                        }
                        ProjectState::Active => {
                            let mut p = project.lock().await;
                            if p.is_quiescent() {
                                self.set_state(&mut p, ProjectState::Idle);
                                self.persist(&p).await;
                                break;
                            }
                        }
                        ProjectState::Idle | ProjectState::Completed { .. } | ProjectState::Halted { .. } => break,
                    }
                }
            }
        }

        let snapshot = project.lock().await.snapshot();
        info!(
            project_id = %project_id,
            state = snapshot.state.as_str(),
            tasks = snapshot.tasks_completed,
            "Project run finished"
        );
        Ok(snapshot)
    }

    /// Drive independent projects in parallel.
    pub async fn run_projects(&self, project_ids: &[ProjectId]) -> Vec<Result<ProjectSnapshot>> {
        futures::future::join_all(project_ids.iter().map(|id| self.run_project(id))).await
    }

    /// Block on a project gate. Returns false when the run should stop.
    async fn wait_for_gate(&self, project_id: &ProjectId, gate_id: &GateId) -> Result<bool> {
        info!(project_id = %project_id, gate_id = %gate_id, "Project suspended; waiting for decision");
        let timeout = Duration::from_secs(self.config.escalation.timeout_secs);
        match self.gates.await_resolution(gate_id, timeout, &self.cancel).await {
            Ok(_) => {
                self.resume(project_id).await?;
                Ok(true)
            }
            Err(GateError::TimedOut { .. }) => {
                warn!(project_id = %project_id, gate_id = %gate_id, "Project gate unresolved; leaving project suspended");
                Ok(false)
            }
            Err(GateError::Cancelled(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn decide(&self, p: &mut Project, trigger: serde_json::Value, rationale: String) -> Result<Outcome> {
        let payload = self.decision_payload(p, trigger).await;
        let (action, defaulted) = match self.consult(&p.project_id, payload).await {
            Some(action) => (action, false),
            None => (
                NextAction::Wait {
                    reason: Some("advisor unavailable".into()),
                },
                true,
            ),
        };

        info!(project_id = %p.project_id, decision = action.kind(), defaulted, "Orchestrator decision");
        self.event_bus.publish(DomainEvent::DecisionMade {
            project_id: p.project_id.clone(),
            decision: action.kind().to_string(),
            defaulted,
            timestamp: Utc::now(),
        });

        let outcome = self.execute(p, action, defaulted, rationale).await;
        self.persist(p).await;
        outcome
    }

    /// Ask for a decision, retrying once. `None` means both attempts failed.
    async fn consult(&self, project_id: &ProjectId, payload: serde_json::Value) -> Option<NextAction> {
        let backoff = Duration::from_millis(self.config.orchestrator.advisor_retry_backoff_ms);
        for attempt in 1..=DECISION_ATTEMPTS {
            let request = AdvisorRequest::new(AdvisorRole::DecideNextAction, ORCHESTRATOR_ID, payload.clone());
            let decided = match self.advisor.consult(request).await {
                Ok(response) => response.decode::<NextAction>(),
                Err(e) => Err(e),
            };
            match decided {
                Ok(action) => return Some(action),
                Err(e) => {
                    warn!(project_id = %project_id, attempt, error = %e, "Decision request failed");
                    if attempt < DECISION_ATTEMPTS && !backoff.is_zero() {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return None,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }

        warn!(project_id = %project_id, "Advisor failed twice; defaulting to wait");
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: format!("decision for project {project_id}"),
            error_message: "advisor failed twice; defaulted to wait".into(),
            timestamp: Utc::now(),
        });
        None
    }

    async fn execute(&self, p: &mut Project, action: NextAction, defaulted: bool, rationale: String) -> Result<Outcome> {
        match action {
            NextAction::CreateTask {
                agent_type,
                description,
                context_refs,
                acceptance_criteria,
                rationale: advised,
                priority,
            } => {
                if !self.knows_agent_type(&agent_type) {
                    warn!(project_id = %p.project_id, agent_type = %agent_type, "Decision named an unknown agent type");
                    return Err(OrchestratorError::Protocol(format!("unknown agent type '{agent_type}'")));
                }
                let mut context = Vec::with_capacity(context_refs.len());
                for name in context_refs {
                    context.push(self.artifact_ref(&p.project_id, name).await);
                }
                let task = Task::new(p.project_id.clone(), agent_type, description)
                    .with_criteria(acceptance_criteria)
                    .with_context(context)
                    .with_priority(priority)
                    .with_rationale(advised.unwrap_or(rationale));
                let task_id = self.push_task(p, task)?;
                Ok(Outcome::TaskCreated(task_id))
            }
            NextAction::EscalateToHuman { reason } => {
                let context = serde_json::json!({
                    "goal": p.goal,
                    "phase": p.phase,
                    "history": p.history().collect::<Vec<_>>(),
                    "queued": p.queued(),
                    "in_flight": p.in_flight(),
                });
                let gate_id = self
                    .gates
                    .create(
                        GateScope::Project {
                            project_id: p.project_id.clone(),
                        },
                        reason,
                        context,
                    )
                    .await;
                self.set_state(p, ProjectState::Suspended {
                    gate_id: gate_id.clone(),
                });
                Ok(Outcome::Escalated(gate_id))
            }
            NextAction::MarkProjectComplete { summary } => {
                let dropped = p.queue.drain();
                if !dropped.is_empty() {
                    warn!(project_id = %p.project_id, dropped = dropped.len(), "Dropping queued tasks of completed project");
                }
                self.set_state(p, ProjectState::Completed { summary });
                Ok(Outcome::Completed)
            }
            NextAction::Wait { reason } => {
                debug!(project_id = %p.project_id, reason = ?reason, "Waiting");
                if p.is_quiescent() {
                    self.set_state(p, ProjectState::Idle);
                }
                Ok(Outcome::Waiting { defaulted })
            }
        }
    }

    /// Fresh content of every artifact a finished task wrote. Context it
    /// was seeded with is not re-read.
    async fn reread_artifacts(&self, project_id: &ProjectId, result: &TaskResult) -> Vec<serde_json::Value> {
        let preview_chars = self.config.orchestrator.artifact_preview_chars;
        let mut artifacts = Vec::with_capacity(result.produced_artifacts.len());
        for name in &result.produced_artifacts {
            match self.tools.read_artifact(project_id, name, ORCHESTRATOR_ID).await {
                ToolResponse::Success { data, .. } => {
                    let content = data["content"].as_str().unwrap_or_default();
                    artifacts.push(serde_json::json!({
                        "name": name,
                        "preview": bounded_preview(content, preview_chars),
                    }));
                }
                other => {
                    warn!(project_id = %project_id, artifact = %name, response = ?other, "Could not re-read artifact");
                }
            }
        }
        artifacts
    }

    /// A context reference with a bounded preview, or a bare name when the
    /// artifact cannot be read.
    async fn artifact_ref(&self, project_id: &ProjectId, name: String) -> ArtifactRef {
        match self.tools.read_artifact(project_id, &name, ORCHESTRATOR_ID).await {
            ToolResponse::Success { data, .. } => match data["content"].as_str() {
                Some(content) => ArtifactRef::with_preview(name, content, self.config.orchestrator.artifact_preview_chars),
                None => ArtifactRef::named(name),
            },
            other => {
                warn!(project_id = %project_id, artifact = %name, response = ?other, "Context artifact unavailable");
                ArtifactRef::named(name)
            }
        }
    }

    async fn decision_payload(&self, p: &Project, trigger: serde_json::Value) -> serde_json::Value {
        let pending_gates: Vec<serde_json::Value> = self
            .gates
            .pending_for_project(&p.project_id)
            .await
            .into_iter()
            .map(|g| serde_json::json!({"gate_id": g.gate_id, "reason": g.reason}))
            .collect();

        serde_json::json!({
            "project_id": p.project_id,
            "goal": p.goal,
            "phase": p.phase,
            "state": p.state.as_str(),
            "trigger": trigger,
            "history": p.history().collect::<Vec<_>>(),
            "agent_types": self.config.agents.iter().map(|a| serde_json::json!({
                "agent_type": a.agent_type,
                "description": a.description,
            })).collect::<Vec<_>>(),
            "in_flight": p.in_flight.iter().map(|(id, running)| serde_json::json!({
                "task_id": id,
                "agent_type": running.agent_type,
                "goal": running.goal,
            })).collect::<Vec<_>>(),
            "queued": p.queued(),
            "pending_gates": pending_gates,
        })
    }

    fn push_task(&self, p: &mut Project, task: Task) -> Result<TaskId> {
        if p.state.is_closed() {
            return Err(OrchestratorError::ProjectClosed(p.project_id.clone()));
        }
        let task_id = task.task_id.clone();
        info!(
            project_id = %p.project_id,
            task_id = %task_id,
            agent_type = %task.agent_type,
            priority = task.priority,
            context = task.context.len(),
            "Task queued"
        );
        p.queue.push(task);
        if p.state == ProjectState::Idle {
            self.set_state(p, ProjectState::Active);
        }
        Ok(task_id)
    }

    fn knows_agent_type(&self, agent_type: &str) -> bool {
        self.config.agents.is_empty() || self.config.agent_profile(agent_type).is_some()
    }

    fn agent_for(&self, agent_type: &str) -> AgentLoop {
        let max_steps = self
            .config
            .agent_profile(agent_type)
            .and_then(|profile| profile.max_steps)
            .unwrap_or(self.config.agent.max_steps);
        let agent = AgentLoop::new(
            self.advisor.clone(),
            self.tools.clone(),
            self.gates.clone(),
            self.event_bus.clone(),
            self.config.agent.clone(),
        )
        .with_escalation(self.config.escalation.clone())
        .with_max_steps(max_steps);
        match &self.store {
            Some(store) => agent.with_store(store.clone()),
            None => agent,
        }
    }

    async fn project(&self, project_id: &ProjectId) -> Result<Arc<Mutex<Project>>> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownProject(project_id.clone()))
    }

    fn set_state(&self, p: &mut Project, state: ProjectState) {
        if p.state == state {
            return;
        }
        info!(project_id = %p.project_id, from = p.state.as_str(), to = state.as_str(), "Project state changed");
        p.state = state;
        self.publish_state(p);
    }

    fn publish_state(&self, p: &Project) {
        self.event_bus.publish(DomainEvent::ProjectStateChanged {
            project_id: p.project_id.clone(),
            state: p.state.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn persist(&self, p: &Project) {
        let Some(store) = &self.store else {
            return;
        };
        let saved = match StoredRecord::encode(
            RecordKind::Project,
            p.project_id.0.clone(),
            Some(p.project_id.clone()),
            &p.snapshot(),
        ) {
            Ok(record) => store.save(record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            warn!(project_id = %p.project_id, error = %e, "Failed to persist project");
        }
    }
}

//! `taskwright simulate` — run one project against a scripted advisor.
//!
//! The script names the project, seeds its artifacts and task queue, and
//! lists the advisor's answers per role. Everything else is the real engine:
//! agent loops, the artifacts tool behind the audited invoker, escalation
//! gates, and the configured state store.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use taskwright_agent::EscalationGates;
use taskwright_config::{AgentProfile, EngineConfig};
use taskwright_core::advisor::{Advisor, AdvisorRequest, AdvisorResponse, AdvisorRole};
use taskwright_core::error::AdvisorError;
use taskwright_core::event::{DomainEvent, EventBus};
use taskwright_core::gate::{GateDecision, GateRecord};
use taskwright_core::store::StateStore;
use taskwright_core::task::{ProjectId, Task};
use taskwright_core::tool::{ToolInvoker, ToolRegistry};
use taskwright_memory::{ArtifactStore, ArtifactTool, InMemoryStore, JsonFileStore};
use taskwright_orchestrator::{Orchestrator, ProjectSnapshot};
use taskwright_security::{AuditLogger, AuditOutcome, AuditedInvoker, ToolPolicy, TracingSink};

#[derive(Debug, Deserialize)]
pub struct Script {
    pub project: ScriptProject,

    /// Artifacts present before the first task runs
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,

    /// Tasks queued up front
    #[serde(default)]
    pub tasks: Vec<ScriptTask>,

    /// Agent profiles; replaces the configured ones when present
    #[serde(default)]
    pub agents: Option<Vec<AgentProfile>>,

    /// How every escalation gate is answered. Unset leaves gates pending.
    #[serde(default)]
    pub on_escalation: Option<GateDecision>,

    pub advisor: ScriptAnswers,
}

#[derive(Debug, Deserialize)]
pub struct ScriptProject {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub phase: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptTask {
    pub agent_type: String,
    pub goal: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub priority: u8,
}

/// Advisor answers, consumed in order per role.
#[derive(Debug, Default, Deserialize)]
pub struct ScriptAnswers {
    #[serde(default)]
    pub plan: Vec<ScriptReply>,
    #[serde(default)]
    pub evaluate_progress: Vec<ScriptReply>,
    #[serde(default)]
    pub evaluate_confidence: Vec<ScriptReply>,
    #[serde(default)]
    pub decide_next_action: Vec<ScriptReply>,
}

/// One advisor answer: a simulated transport failure, or a response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptReply {
    Fail { fail: String },
    Body(serde_json::Value),
}

/// Answers advisor requests from the script. An exhausted role fails as a
/// transport error, which the engine treats like any other advisor outage.
pub struct ScriptAdvisor {
    queues: Mutex<HashMap<AdvisorRole, VecDeque<ScriptReply>>>,
    calls: Mutex<usize>,
}

impl ScriptAdvisor {
    pub fn new(answers: ScriptAnswers) -> Self {
        let queues = [
            (AdvisorRole::Plan, answers.plan),
            (AdvisorRole::EvaluateProgress, answers.evaluate_progress),
            (AdvisorRole::EvaluateConfidence, answers.evaluate_confidence),
            (AdvisorRole::DecideNextAction, answers.decide_next_action),
        ]
        .into_iter()
        .map(|(role, replies)| (role, replies.into()))
        .collect();
        Self {
            queues: Mutex::new(queues),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|calls| *calls).unwrap_or_default()
    }

    fn next(&self, role: AdvisorRole) -> Option<ScriptReply> {
        let mut queues = self.queues.lock().ok()?;
        queues.get_mut(&role)?.pop_front()
    }
}

#[async_trait]
impl Advisor for ScriptAdvisor {
    fn name(&self) -> &str {
        "script"
    }

    async fn consult(&self, request: AdvisorRequest) -> Result<AdvisorResponse, AdvisorError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        tracing::debug!(role = %request.role, requester = %request.requester_id, "Scripted advisor consulted");
        match self.next(request.role) {
            Some(ScriptReply::Body(body)) => Ok(AdvisorResponse::new(body)),
            Some(ScriptReply::Fail { fail }) => Err(AdvisorError::Transport(fail)),
            None => Err(AdvisorError::Transport(format!("script has no more {} answers", request.role))),
        }
    }
}

/// What a simulation produced.
#[derive(Debug, Serialize)]
pub struct Report {
    pub project: ProjectSnapshot,
    pub artifacts: BTreeMap<String, String>,
    pub gates: Vec<GateRecord>,
    pub advisor_calls: usize,
    pub tool_calls: usize,
    pub tool_denials: usize,
}

pub async fn run(script_path: &Path, config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(script_path)
        .with_context(|| format!("cannot read script {}", script_path.display()))?;
    let script: Script =
        serde_json::from_str(&raw).with_context(|| format!("invalid script {}", script_path.display()))?;

    let config = match config_path {
        Some(path) => {
            let mut config = EngineConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
        None => EngineConfig::load()?,
    };

    let report = simulate(script, config).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Build the engine around the script's advisor and drive the project.
pub async fn simulate(script: Script, mut config: EngineConfig) -> anyhow::Result<Report> {
    if let Some(agents) = script.agents {
        config.agents = agents;
        config.validate()?;
    }

    let store: Arc<dyn StateStore> = match config.store.backend.as_str() {
        "file" => {
            let path = config.store.path.clone().unwrap_or_else(JsonFileStore::default_path);
            Arc::new(JsonFileStore::new(path))
        }
        _ => Arc::new(InMemoryStore::new()),
    };

    let project_id = ProjectId::from(script.project.id.as_str());
    let artifacts = ArtifactStore::new();
    for (name, content) in &script.artifacts {
        artifacts.write(&project_id, name, content).await;
    }

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ArtifactTool::new(artifacts.clone())));
    let audit = Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)]));
    let tools: Arc<dyn ToolInvoker> = Arc::new(AuditedInvoker::new(
        Arc::new(registry),
        ToolPolicy::from_profiles(&config.agents),
        audit.clone(),
    ));

    let advisor = Arc::new(ScriptAdvisor::new(script.advisor));
    let event_bus = Arc::new(EventBus::default());
    let gates = Arc::new(EscalationGates::new(event_bus.clone()).with_store(store.clone()));
    let orchestrator = Orchestrator::new(advisor.clone(), tools, gates.clone(), event_bus.clone(), config)
        .with_store(store);

    let responder = script.on_escalation.map(|decision| {
        let mut events = event_bus.subscribe();
        let gates = gates.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let DomainEvent::GateOpened { gate_id, reason, .. } = event.as_ref() {
                    tracing::info!(gate_id = %gate_id, reason = %reason, decision = ?decision, "Answering escalation");
                    if let Err(e) = gates.resolve(gate_id, decision, None).await {
                        tracing::warn!(gate_id = %gate_id, error = %e, "Could not answer escalation");
                    }
                }
            }
        })
    });

    orchestrator
        .create_project(project_id.clone(), script.project.goal)
        .await;
    if let Some(phase) = script.project.phase {
        orchestrator.set_phase(&project_id, phase).await?;
    }
    for task in script.tasks {
        let task = Task::new(project_id.clone(), task.agent_type, task.goal)
            .with_criteria(task.acceptance_criteria)
            .with_constraints(task.constraints)
            .with_priority(task.priority);
        orchestrator.enqueue(task).await?;
    }

    let snapshot = orchestrator.run_project(&project_id).await?;
    orchestrator.shutdown();
    if let Some(responder) = responder {
        responder.abort();
    }

    let mut produced = BTreeMap::new();
    for name in artifacts.list(&project_id).await {
        if let Some(content) = artifacts.read(&project_id, &name).await {
            produced.insert(name, content);
        }
    }

    Ok(Report {
        project: snapshot,
        artifacts: produced,
        gates: gates.pending_for_project(&project_id).await,
        advisor_calls: advisor.calls(),
        tool_calls: audit.count(),
        tool_denials: audit.entries_by_outcome(&AuditOutcome::Denied).len(),
    })
}

fn print_report(report: &Report) {
    let project = &report.project;
    println!("Project {}: {}", project.project_id, project.state.as_str());
    println!("   Goal:          {}", project.goal);
    println!("   Tasks done:    {}", project.tasks_completed);
    println!("   Queued:        {}", project.queued);
    for summary in &project.history {
        println!(
            "     - {} [{}] {} ({} steps, progress {:.2})",
            summary.task_id,
            summary.agent_type,
            summary.status.as_str(),
            summary.steps,
            summary.progress_score
        );
        if let Some(reason) = &summary.reason {
            println!("         {reason}");
        }
    }
    println!("   Artifacts:     {}", report.artifacts.len());
    for name in report.artifacts.keys() {
        println!("     - {name}");
    }
    if !report.gates.is_empty() {
        println!("   Pending gates: {}", report.gates.len());
        for gate in &report.gates {
            println!("     - {} {}", gate.gate_id, gate.reason);
        }
    }
    println!("   Advisor calls: {}", report.advisor_calls);
    println!("   Tool calls:    {} ({} denied)", report.tool_calls, report.tool_denials);
}

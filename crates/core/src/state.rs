//! Per-task execution state and the immutable step history.
//!
//! A [`TaskState`] is owned by exactly one agent loop for the task's
//! lifetime. When the loop stops it is consumed by [`TaskState::finalize`],
//! producing a read-only [`TaskResult`] for the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::gate::{GateDecision, GateId};
use crate::task::{ProjectId, Task, TaskId, TaskStatus};

/// How many recent errors a task remembers.
pub const LAST_ERRORS_CAPACITY: usize = 3;

/// A tool call planned by the advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, operation: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            operation: operation.into(),
            parameters,
        }
    }
}

/// What happened when a step's final attempt ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ExecutionResult {
    /// Pure reasoning, no tool call
    Reasoned,
    Completed {
        data: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audit_ref: Option<String>,
    },
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audit_ref: Option<String>,
    },
    Denied {
        reason: String,
        allowed_alternatives: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audit_ref: Option<String>,
    },
    /// The advisor never produced a usable plan
    PlanFailed { error: String },
}

/// Where a progress score came from, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSource {
    Checks,
    Heuristic,
    Advisor,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub score: f64,
    pub source: ValidationSource,
    pub detail: String,
    /// Coverage fraction reported by automated checks, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
}

/// Resource consumption, per step or accumulated per task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub advisor_calls: u32,
    pub tool_calls: u32,
    pub tokens: u64,
    pub cost: f64,
    pub duration_ms: u64,
}

impl ResourceUsage {
    pub fn add(&mut self, other: &ResourceUsage) {
        self.advisor_calls += other.advisor_calls;
        self.tool_calls += other.tool_calls;
        self.tokens += other.tokens;
        self.cost += other.cost;
        self.duration_ms += other.duration_ms;
    }
}

/// One iteration's immutable audit record.
///
/// Steps are only constructed by [`TaskState::append_step`], which assigns
/// the step number, so a history is always `1, 2, 3, …`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    step_number: u32,
    reasoning: String,
    planned_action: Option<Action>,
    execution_result: ExecutionResult,
    attempt_number: u32,
    validation_result: Option<Validation>,
    acceptance_progress: f64,
    success: bool,
    error: Option<String>,
    resource_usage: ResourceUsage,
    recorded_at: DateTime<Utc>,
}

impl Step {
    pub fn step_number(&self) -> u32 {
        self.step_number
    }
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }
    pub fn planned_action(&self) -> Option<&Action> {
        self.planned_action.as_ref()
    }
    pub fn execution_result(&self) -> &ExecutionResult {
        &self.execution_result
    }
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }
    pub fn validation_result(&self) -> Option<&Validation> {
        self.validation_result.as_ref()
    }
    pub fn acceptance_progress(&self) -> f64 {
        self.acceptance_progress
    }
    pub fn success(&self) -> bool {
        self.success
    }
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
    pub fn resource_usage(&self) -> &ResourceUsage {
        &self.resource_usage
    }
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

/// Everything needed to record a step, minus its number.
#[derive(Debug, Clone)]
pub struct StepDraft {
    pub reasoning: String,
    pub planned_action: Option<Action>,
    pub execution_result: ExecutionResult,
    pub attempt_number: u32,
    pub validation_result: Option<Validation>,
    pub success: bool,
    pub error: Option<String>,
    pub resource_usage: ResourceUsage,
}

/// The live execution state of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: TaskId,
    pub agent_id: String,
    pub project_id: ProjectId,
    pub goal: String,
    pub acceptance_criteria: Vec<String>,
    pub constraints: Vec<String>,
    pub current_step: u32,
    pub max_steps: u32,
    steps_history: Vec<Step>,
    pub artifacts: BTreeMap<String, String>,
    /// Names of artifacts this task wrote, as opposed to seeded context
    #[serde(default)]
    produced: BTreeSet<String>,
    pub failure_count: u32,
    last_errors: VecDeque<String>,
    pub consecutive_failures: u32,
    progress_score: f64,
    pub resources: ResourceUsage,
    pub escalation_triggered: bool,
    pub escalation_reason: Option<String>,
    pub timeout_reached: bool,
    pub resource_limit_hit: bool,
    pub last_confidence_check_step: Option<u32>,
    pub last_confidence_score: Option<f64>,
    /// The advisor declared the goal met
    pub advisor_confirmed: bool,
    pub started_at: DateTime<Utc>,
}

impl TaskState {
    /// Fresh state for a task about to start.
    ///
    /// Context artifacts that carry a preview are seeded into `artifacts`
    /// so the first plan can see them.
    pub fn new(task: &Task, agent_id: impl Into<String>, max_steps: u32) -> Self {
        let artifacts = task
            .context
            .iter()
            .filter_map(|r| r.preview.as_ref().map(|p| (r.name.clone(), p.clone())))
            .collect();

        Self {
            task_id: task.task_id.clone(),
            agent_id: agent_id.into(),
            project_id: task.project_id.clone(),
            goal: task.goal.clone(),
            acceptance_criteria: task.acceptance_criteria.clone(),
            constraints: task.constraints.clone(),
            current_step: 0,
            max_steps,
            steps_history: Vec::new(),
            artifacts,
            produced: BTreeSet::new(),
            failure_count: 0,
            last_errors: VecDeque::with_capacity(LAST_ERRORS_CAPACITY),
            consecutive_failures: 0,
            progress_score: 0.0,
            resources: ResourceUsage::default(),
            escalation_triggered: false,
            escalation_reason: None,
            timeout_reached: false,
            resource_limit_hit: false,
            last_confidence_check_step: None,
            last_confidence_score: None,
            advisor_confirmed: false,
            started_at: Utc::now(),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps_history
    }

    /// Keep an artifact the task itself produced.
    pub fn record_artifact(&mut self, name: impl Into<String>, content: impl Into<String>) {
        let name = name.into();
        self.produced.insert(name.clone());
        self.artifacts.insert(name, content.into());
    }

    pub fn produced_artifacts(&self) -> &BTreeSet<String> {
        &self.produced
    }

    /// The most recent `n` steps, oldest first.
    pub fn recent_steps(&self, n: usize) -> &[Step] {
        let start = self.steps_history.len().saturating_sub(n);
        &self.steps_history[start..]
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps_history.last()
    }

    pub fn last_errors(&self) -> impl Iterator<Item = &str> {
        self.last_errors.iter().map(String::as_str)
    }

    pub fn progress_score(&self) -> f64 {
        self.progress_score
    }

    /// Remember an error; only the last [`LAST_ERRORS_CAPACITY`] are kept.
    pub fn note_error(&mut self, error: impl Into<String>) {
        if self.last_errors.len() == LAST_ERRORS_CAPACITY {
            self.last_errors.pop_front();
        }
        self.last_errors.push_back(error.into());
        self.failure_count += 1;
    }

    /// Monotonic aggregation: progress never goes down.
    pub fn raise_progress(&mut self, score: f64) -> f64 {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        if score > self.progress_score {
            self.progress_score = score;
        }
        self.progress_score
    }

    /// Append an immutable step with the next step number.
    pub fn append_step(&mut self, draft: StepDraft) -> &Step {
        self.current_step += 1;
        if draft.success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.resources.add(&draft.resource_usage);
        self.steps_history.push(Step {
            step_number: self.current_step,
            reasoning: draft.reasoning,
            planned_action: draft.planned_action,
            execution_result: draft.execution_result,
            attempt_number: draft.attempt_number,
            validation_result: draft.validation_result,
            acceptance_progress: self.progress_score,
            success: draft.success,
            error: draft.error,
            resource_usage: draft.resource_usage,
            recorded_at: Utc::now(),
        });
        // Just pushed.
        &self.steps_history[self.steps_history.len() - 1]
    }

    /// Consume the state into the read-only result handed to the orchestrator.
    pub fn finalize(
        self,
        status: TaskStatus,
        reason: Option<String>,
        escalation: Option<EscalationSummary>,
    ) -> TaskResult {
        TaskResult {
            task_id: self.task_id,
            project_id: self.project_id,
            agent_id: self.agent_id,
            status,
            reason,
            progress_score: self.progress_score,
            steps: self.steps_history,
            artifacts: self.artifacts,
            produced_artifacts: self.produced,
            failure_count: self.failure_count,
            last_errors: self.last_errors.into_iter().collect(),
            resources: self.resources,
            last_confidence_score: self.last_confidence_score,
            escalation,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// How a task-scoped escalation ended, if the loop opened one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSummary {
    pub gate_id: GateId,
    pub reason: String,
    /// `None` when the gate was not resolved (not awaited, or timed out)
    pub decision: Option<GateDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// The finalized outcome of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub agent_id: String,
    pub status: TaskStatus,
    pub reason: Option<String>,
    pub progress_score: f64,
    pub steps: Vec<Step>,
    pub artifacts: BTreeMap<String, String>,
    #[serde(default)]
    pub produced_artifacts: BTreeSet<String>,
    pub failure_count: u32,
    pub last_errors: Vec<String>,
    pub resources: ResourceUsage,
    pub last_confidence_score: Option<f64>,
    pub escalation: Option<EscalationSummary>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

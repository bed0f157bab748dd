//! The agent execution loop.
//!
//! One loop drives one task. Each iteration:
//!
//! 1. **Plan**: ask the advisor for the next action, given the goal, recent
//!    steps, artifacts, and (on retries) the previous failure
//! 2. **Execute**: run the action through the tool invoker, replanning and
//!    backing off on failure, up to `max_attempts`
//! 3. **Validate**: score progress and raise the running maximum
//! 4. **Record**: append an immutable step
//! 5. **Check**: loop detection, then confidence
//!
//! Before every iteration the loop checks cancellation and the termination
//! conditions (success, step/time/cost budgets).

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use taskwright_config::{AgentLoopConfig, EscalationConfig};
use taskwright_core::advisor::{Advisor, AdvisorRequest, AdvisorRole, PlanDecision};
use taskwright_core::error::{AdvisorError, GateError};
use taskwright_core::event::{DomainEvent, EventBus};
use taskwright_core::gate::GateScope;
use taskwright_core::state::{
    Action, EscalationSummary, ExecutionResult, ResourceUsage, Step, StepDraft, TaskResult, TaskState,
};
use taskwright_core::store::{RecordKind, StateStore, StoredRecord};
use taskwright_core::task::{Task, TaskStatus, bounded_preview};
use taskwright_core::tool::{Requester, ToolInvoker, ToolRequest, ToolResponse};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attempt::{AttemptCycle, AttemptState, DeniedActions, Denial, FailureKind, ReplanContext, backoff_delay};
use crate::checks::{Halt, Verdict, confidence_check, loop_check, termination_check};
use crate::confidence::{ConfidenceProbe, confidence_due};
use crate::escalation::EscalationGates;
use crate::loop_detector::LoopDetector;
use crate::progress::ProgressEvaluator;

/// Characters of each artifact shown to the planner.
const PLAN_PREVIEW_CHARS: usize = 400;

/// External control over one running task.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancel: CancellationToken,
    confidence_requested: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle cancelled whenever `parent` is.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            confidence_requested: Arc::default(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask for a confidence check after the next recorded step.
    pub fn request_confidence_check(&self) {
        self.confidence_requested.store(true, Ordering::SeqCst);
    }

    fn take_confidence_request(&self) -> bool {
        self.confidence_requested.swap(false, Ordering::SeqCst)
    }
}

enum StepOutcome {
    Recorded {
        /// Error of the failed step, fed to loop detection
        failure: Option<String>,
        uncertain: bool,
        halt: Option<Halt>,
    },
    Cancelled,
}

/// Drives one task from its first plan to a [`TaskResult`].
pub struct AgentLoop {
    advisor: Arc<dyn Advisor>,
    tools: Arc<dyn ToolInvoker>,
    gates: Arc<EscalationGates>,
    event_bus: Arc<EventBus>,
    evaluator: ProgressEvaluator,
    probe: ConfidenceProbe,
    config: AgentLoopConfig,
    escalation: EscalationConfig,
    max_steps: u32,
    store: Option<Arc<dyn StateStore>>,
}

impl AgentLoop {
    pub fn new(
        advisor: Arc<dyn Advisor>,
        tools: Arc<dyn ToolInvoker>,
        gates: Arc<EscalationGates>,
        event_bus: Arc<EventBus>,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            evaluator: ProgressEvaluator::new(advisor.clone()),
            probe: ConfidenceProbe::new(advisor.clone(), config.history_in_prompt),
            advisor,
            tools,
            gates,
            event_bus,
            max_steps: config.max_steps,
            config,
            escalation: EscalationConfig::default(),
            store: None,
        }
    }

    pub fn with_escalation(mut self, escalation: EscalationConfig) -> Self {
        self.escalation = escalation;
        self
    }

    /// Override the step budget (per agent type).
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Persist each step and the final result.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run `task` to completion.
    pub async fn run(&self, task: Task, handle: &TaskHandle) -> TaskResult {
        let agent_id = format!("{}-{}", task.agent_type, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let mut state = TaskState::new(&task, agent_id, self.max_steps);
        let mut detector = LoopDetector::new(self.config.loop_window);
        let mut denials = DeniedActions::default();
        let started = Instant::now();

        info!(
            task_id = %task.task_id,
            project_id = %task.project_id,
            agent_id = %state.agent_id,
            max_steps = state.max_steps,
            "Task started"
        );
        self.event_bus.publish(DomainEvent::TaskStarted {
            task_id: task.task_id.clone(),
            project_id: task.project_id.clone(),
            agent_type: task.agent_type.clone(),
            timestamp: Utc::now(),
        });

        let halt = loop {
            if handle.is_cancelled() {
                break Halt::Cancelled;
            }
            if let Verdict::Stop(halt) = termination_check(&state, &self.config, started.elapsed()) {
                break halt;
            }

            debug!(task_id = %state.task_id, step = state.current_step + 1, "Agent loop iteration");
            let (failure, uncertain, halt) = match self.step(&mut state, &task, handle, &mut denials).await {
                StepOutcome::Recorded {
                    failure,
                    uncertain,
                    halt,
                } => (failure, uncertain, halt),
                StepOutcome::Cancelled => break Halt::Cancelled,
            };
            self.step_recorded(&state).await;

            if let Some(halt) = halt {
                break halt;
            }

            match &failure {
                Some(error) => detector.record_failure(error),
                None => detector.record_success(),
            }
            if let Verdict::Stop(halt) = loop_check(&detector) {
                if let Halt::RepeatingFailure { category } = &halt {
                    warn!(task_id = %state.task_id, category = %category, step = state.current_step, "Repeating failure pattern");
                    self.event_bus.publish(DomainEvent::LoopDetected {
                        task_id: state.task_id.clone(),
                        category: category.clone(),
                        timestamp: Utc::now(),
                    });
                }
                break halt;
            }

            if let Verdict::Stop(halt) = self.confidence_gate(&mut state, uncertain, handle).await {
                break halt;
            }
        };

        self.finish(state, halt, handle).await
    }

    /// One step: plan, execute with retries, validate, record.
    async fn step(
        &self,
        state: &mut TaskState,
        task: &Task,
        handle: &TaskHandle,
        denials: &mut DeniedActions,
    ) -> StepOutcome {
        let cancel = handle.cancellation_token();
        let mut cycle = AttemptCycle::new(self.config.max_attempts).with_carried(denials.take_carried());
        let mut usage = ResourceUsage::default();
        let started = Instant::now();

        loop {
            let attempt = cycle.attempt();
            let delay = backoff_delay(self.config.backoff_base_ms, self.config.backoff_max_ms, attempt);
            if !delay.is_zero() {
                debug!(task_id = %state.task_id, attempt, delay_ms = delay.as_millis() as u64, "Backing off before replanning");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return StepOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let (planned, plan_usage) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StepOutcome::Cancelled,
                planned = self.plan(state, cycle.replan_context(), attempt) => planned,
            };
            usage.add(&plan_usage);

            let decision = match planned {
                Ok(decision) => decision,
                Err(e) => {
                    let error = e.to_string();
                    warn!(task_id = %state.task_id, step = state.current_step + 1, attempt, error = %error, "Plan request failed");
                    state.note_error(&error);
                    if cycle.fail(error.clone(), None, FailureKind::Retryable) == AttemptState::FailedRetryable {
                        cycle.replan();
                        continue;
                    }
                    let result = ExecutionResult::PlanFailed { error: error.clone() };
                    return self.record_failure(state, String::new(), None, result, attempt, usage, started, error);
                }
            };

            let PlanDecision {
                reasoning,
                action,
                goal_met,
                uncertain,
            } = decision;

            let Some(action) = action.into_action() else {
                cycle.succeed();
                denials.clear_carried();
                return self
                    .record_success(
                        state,
                        handle,
                        reasoning,
                        None,
                        ExecutionResult::Reasoned,
                        attempt,
                        usage,
                        started,
                        goal_met,
                        uncertain,
                    )
                    .await;
            };

            if let Some(denial) = denials.denial_for(&action).cloned() {
                warn!(task_id = %state.task_id, tool = %action.tool_name, "Planner resubmitted a denied action");
                let next = cycle.refuse(action.clone(), denial.clone());
                let error = cycle
                    .replan_context()
                    .map(|c| c.prior_error.clone())
                    .unwrap_or_default();
                state.note_error(&error);
                denials.remember(action.clone(), denial, cycle.replan_context().cloned());
                if next == AttemptState::FailedRetryable {
                    cycle.replan();
                    continue;
                }
                let result = ExecutionResult::Failed {
                    error: error.clone(),
                    audit_ref: None,
                };
                return self.record_failure(state, reasoning, Some(action), result, attempt, usage, started, error);
            }

            cycle.start_execution();
            let request = ToolRequest::from_action(
                &action,
                state.agent_id.clone(),
                Requester::agent(task.agent_type.clone(), state.project_id.clone()),
            );
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StepOutcome::Cancelled,
                response = self.tools.invoke(request) => response,
            };
            usage.tool_calls += 1;

            match response {
                ToolResponse::Success {
                    data,
                    artifacts,
                    audit_ref,
                } => {
                    for (name, content) in artifacts {
                        debug!(task_id = %state.task_id, artifact = %name, "Artifact produced");
                        state.record_artifact(name, content);
                    }
                    cycle.succeed();
                    denials.clear_carried();
                    return self
                        .record_success(
                            state,
                            handle,
                            reasoning,
                            Some(action),
                            ExecutionResult::Completed { data, audit_ref },
                            attempt,
                            usage,
                            started,
                            goal_met,
                            uncertain,
                        )
                        .await;
                }
                ToolResponse::Failure { error, audit_ref } => {
                    debug!(task_id = %state.task_id, tool = %action.tool_name, attempt, error = %error, "Tool call failed");
                    state.note_error(&error);
                    if cycle.fail(error.clone(), Some(action.clone()), FailureKind::Retryable)
                        == AttemptState::FailedRetryable
                    {
                        cycle.replan();
                        continue;
                    }
                    let result = ExecutionResult::Failed {
                        error: error.clone(),
                        audit_ref,
                    };
                    return self.record_failure(state, reasoning, Some(action), result, attempt, usage, started, error);
                }
                ToolResponse::PermissionDenied {
                    reason,
                    allowed_alternatives,
                    audit_ref,
                } => {
                    let error = format!("permission-denied: {reason}");
                    info!(
                        task_id = %state.task_id,
                        tool = %action.tool_name,
                        alternatives = ?allowed_alternatives,
                        "Tool call denied"
                    );
                    state.note_error(&error);
                    let result = ExecutionResult::Denied {
                        reason: reason.clone(),
                        allowed_alternatives: allowed_alternatives.clone(),
                        audit_ref,
                    };

                    if allowed_alternatives.is_empty() {
                        cycle.fail(error.clone(), Some(action.clone()), FailureKind::Terminal);
                        let outcome =
                            self.record_failure(state, reasoning, Some(action), result, attempt, usage, started, error);
                        return match outcome {
                            StepOutcome::Recorded { failure, uncertain, .. } => StepOutcome::Recorded {
                                failure,
                                uncertain,
                                halt: Some(Halt::PermissionDenied { reason }),
                            },
                            cancelled => cancelled,
                        };
                    }

                    let denial = Denial {
                        reason,
                        allowed_alternatives,
                    };
                    let next = cycle.deny(action.clone(), denial.clone());
                    denials.remember(action.clone(), denial, cycle.replan_context().cloned());
                    if next == AttemptState::FailedRetryable {
                        cycle.replan();
                        continue;
                    }
                    return self.record_failure(state, reasoning, Some(action), result, attempt, usage, started, error);
                }
            }
        }
    }

    async fn plan(
        &self,
        state: &TaskState,
        replan: Option<&ReplanContext>,
        attempt: u32,
    ) -> (Result<PlanDecision, AdvisorError>, ResourceUsage) {
        let payload = serde_json::json!({
            "project_id": state.project_id,
            "goal": state.goal,
            "acceptance_criteria": state.acceptance_criteria,
            "constraints": state.constraints,
            "step": state.current_step + 1,
            "max_steps": state.max_steps,
            "attempt": attempt,
            "progress_score": state.progress_score(),
            "recent_steps": state
                .recent_steps(self.config.history_in_prompt)
                .iter()
                .map(step_summary)
                .collect::<Vec<_>>(),
            "artifacts": state
                .artifacts
                .iter()
                .map(|(name, content)| serde_json::json!({
                    "name": name,
                    "preview": bounded_preview(content, PLAN_PREVIEW_CHARS),
                }))
                .collect::<Vec<_>>(),
            "last_errors": state.last_errors().collect::<Vec<_>>(),
            "replan": replan,
        });

        let mut usage = ResourceUsage {
            advisor_calls: 1,
            ..Default::default()
        };
        let request = AdvisorRequest::new(AdvisorRole::Plan, state.agent_id.clone(), payload);
        let result = match self.advisor.consult(request).await {
            Ok(response) => {
                if let Some(u) = &response.usage {
                    usage.tokens += u.tokens;
                    usage.cost += u.cost;
                }
                response.decode::<PlanDecision>()
            }
            Err(e) => Err(e),
        };
        (result, usage)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_success(
        &self,
        state: &mut TaskState,
        handle: &TaskHandle,
        reasoning: String,
        action: Option<Action>,
        execution_result: ExecutionResult,
        attempt: u32,
        mut usage: ResourceUsage,
        started: Instant,
        goal_met: bool,
        uncertain: bool,
    ) -> StepOutcome {
        let evaluation = tokio::select! {
            biased;
            _ = handle.cancellation_token().cancelled() => return StepOutcome::Cancelled,
            evaluation = self.evaluator.evaluate(state) => evaluation,
        };
        usage.add(&evaluation.usage);
        usage.duration_ms = started.elapsed().as_millis() as u64;

        let progress = state.raise_progress(evaluation.validation.score);
        if goal_met {
            state.advisor_confirmed = true;
        }
        debug!(
            task_id = %state.task_id,
            step = state.current_step + 1,
            score = evaluation.validation.score,
            progress,
            "Step validated"
        );

        state.append_step(StepDraft {
            reasoning,
            planned_action: action,
            execution_result,
            attempt_number: attempt,
            validation_result: Some(evaluation.validation),
            success: true,
            error: None,
            resource_usage: usage,
        });
        StepOutcome::Recorded {
            failure: None,
            uncertain,
            halt: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_failure(
        &self,
        state: &mut TaskState,
        reasoning: String,
        action: Option<Action>,
        execution_result: ExecutionResult,
        attempt: u32,
        mut usage: ResourceUsage,
        started: Instant,
        error: String,
    ) -> StepOutcome {
        usage.duration_ms = started.elapsed().as_millis() as u64;
        state.append_step(StepDraft {
            reasoning,
            planned_action: action,
            execution_result,
            attempt_number: attempt,
            validation_result: None,
            success: false,
            error: Some(error.clone()),
            resource_usage: usage,
        });
        StepOutcome::Recorded {
            failure: Some(error),
            uncertain: false,
            halt: None,
        }
    }

    /// Persist and announce the step just appended.
    async fn step_recorded(&self, state: &TaskState) {
        let Some(step) = state.last_step() else {
            return;
        };
        self.event_bus.publish(DomainEvent::StepRecorded {
            task_id: state.task_id.clone(),
            step_number: step.step_number(),
            success: step.success(),
            progress: step.acceptance_progress(),
            timestamp: Utc::now(),
        });
        if let Some(store) = &self.store {
            let id = format!("{}:{}", state.task_id, step.step_number());
            let saved = match StoredRecord::encode(RecordKind::Step, id, Some(state.project_id.clone()), step) {
                Ok(record) => store.save(record).await,
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                warn!(task_id = %state.task_id, step = step.step_number(), error = %e, "Failed to persist step");
            }
        }
    }

    async fn confidence_gate(&self, state: &mut TaskState, uncertain: bool, handle: &TaskHandle) -> Verdict {
        let requested = handle.take_confidence_request();
        let Some(trigger) = confidence_due(state, self.config.confidence_interval, uncertain, requested) else {
            return Verdict::Continue;
        };
        state.last_confidence_check_step = Some(state.current_step);

        let (result, usage) = tokio::select! {
            biased;
            _ = handle.cancellation_token().cancelled() => return Verdict::Stop(Halt::Cancelled),
            assessed = self.probe.assess(state, trigger) => assessed,
        };
        state.resources.add(&usage);

        match result {
            Ok(estimate) => {
                debug!(
                    task_id = %state.task_id,
                    step = state.current_step,
                    trigger = trigger.as_str(),
                    score = estimate.score,
                    "Confidence checked"
                );
                state.last_confidence_score = Some(estimate.score);
                confidence_check(Some(estimate.score), self.config.confidence_floor)
            }
            Err(e) => {
                warn!(task_id = %state.task_id, step = state.current_step, error = %e, "Confidence check unavailable");
                Verdict::Continue
            }
        }
    }

    async fn finish(&self, mut state: TaskState, halt: Halt, handle: &TaskHandle) -> TaskResult {
        match &halt {
            Halt::WallClockExceeded { .. } => state.timeout_reached = true,
            Halt::StepsExhausted { .. } | Halt::CostExceeded { .. } => state.resource_limit_hit = true,
            _ => {}
        }

        let reason = halt.reason().to_string();
        let (status, escalation) = if halt.escalates() {
            state.escalation_triggered = true;
            state.escalation_reason = Some(reason.clone());
            let (status, summary) = self.escalate(&state, &halt, handle).await;
            (status, Some(summary))
        } else {
            (halt.status(), None)
        };

        info!(
            task_id = %state.task_id,
            status = status.as_str(),
            steps = state.current_step,
            progress = state.progress_score(),
            detail = %halt,
            "Task finished"
        );
        let result = state.finalize(status, Some(reason), escalation);

        self.event_bus.publish(DomainEvent::TaskFinished {
            task_id: result.task_id.clone(),
            project_id: result.project_id.clone(),
            status: result.status,
            steps: result.step_count(),
            timestamp: Utc::now(),
        });
        if let Some(store) = &self.store {
            let saved = match StoredRecord::encode(
                RecordKind::TaskResult,
                result.task_id.0.clone(),
                Some(result.project_id.clone()),
                &result,
            ) {
                Ok(record) => store.save(record).await,
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                warn!(task_id = %result.task_id, error = %e, "Failed to persist task result");
            }
        }
        result
    }

    /// Open a gate and, when configured, wait for the human decision.
    async fn escalate(&self, state: &TaskState, halt: &Halt, handle: &TaskHandle) -> (TaskStatus, EscalationSummary) {
        let reason = halt.reason();
        let context = serde_json::json!({
            "task_id": state.task_id,
            "agent_id": state.agent_id,
            "goal": state.goal,
            "acceptance_criteria": state.acceptance_criteria,
            "detail": halt.to_string(),
            "progress_score": state.progress_score(),
            "failure_count": state.failure_count,
            "last_errors": state.last_errors().collect::<Vec<_>>(),
            "steps": state.steps(),
        });
        let scope = GateScope::Task {
            task_id: state.task_id.clone(),
            project_id: state.project_id.clone(),
        };
        let gate_id = self.gates.create(scope, reason, context).await;
        let mut summary = EscalationSummary {
            gate_id: gate_id.clone(),
            reason: reason.to_string(),
            decision: None,
            payload: None,
        };

        if !self.escalation.block_on_escalation {
            return (TaskStatus::Escalated, summary);
        }

        info!(task_id = %state.task_id, gate_id = %gate_id, "Waiting for escalation decision");
        let timeout = Duration::from_secs(self.escalation.timeout_secs);
        match self
            .gates
            .await_resolution(&gate_id, timeout, handle.cancellation_token())
            .await
        {
            Ok(resolution) => {
                summary.decision = Some(resolution.decision);
                summary.payload = resolution.payload;
                (TaskStatus::Escalated, summary)
            }
            Err(GateError::TimedOut { .. }) => (TaskStatus::EscalationTimeout, summary),
            Err(GateError::Cancelled(_)) => (TaskStatus::Cancelled, summary),
            Err(e) => {
                warn!(task_id = %state.task_id, gate_id = %gate_id, error = %e, "Escalation wait failed");
                (TaskStatus::Escalated, summary)
            }
        }
    }
}

fn step_summary(step: &Step) -> serde_json::Value {
    serde_json::json!({
        "step": step.step_number(),
        "reasoning": step.reasoning(),
        "action": step.planned_action(),
        "result": step.execution_result(),
        "success": step.success(),
        "error": step.error(),
        "progress": step.acceptance_progress(),
    })
}

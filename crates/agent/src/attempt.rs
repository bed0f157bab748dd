//! Per-step attempt state machine.
//!
//! ```text
//! Planned → Executing → Succeeded
//!                     → FailedRetryable → Planned (replan with prior error)
//!                     → FailedTerminal
//! Planned → FailedRetryable | FailedTerminal   (plan itself failed)
//! ```
//!
//! Replanning is a transition that carries the previous error, action and
//! any permission denial forward into the next plan request. Denials also
//! outlive the step: [`DeniedActions`] keeps them for the whole task.

use serde::Serialize;
use std::time::Duration;
use taskwright_core::state::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Planned,
    Executing,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

impl AttemptState {
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Planned, Executing)
                | (Planned, FailedRetryable)
                | (Planned, FailedTerminal)
                | (Planned, Succeeded)
                | (Executing, Succeeded)
                | (Executing, FailedRetryable)
                | (Executing, FailedTerminal)
                | (FailedRetryable, Planned)
        )
    }

    pub fn is_final(self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::FailedTerminal)
    }
}

/// A permission denial carried into the next plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Denial {
    pub reason: String,
    pub allowed_alternatives: Vec<String>,
}

/// What the next plan request must know about the failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplanContext {
    /// The attempt that failed
    pub attempt: u32,
    pub prior_error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
}

/// How a failed attempt may continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Replan and try again if attempts remain
    Retryable,
    /// Stop this step now
    Terminal,
}

/// Attempts of one step.
#[derive(Debug)]
pub struct AttemptCycle {
    max_attempts: u32,
    attempt: u32,
    state: AttemptState,
    replan: Option<ReplanContext>,
}

impl AttemptCycle {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt: 1,
            state: AttemptState::Planned,
            replan: None,
        }
    }

    /// Start from context left by an earlier step, so its first plan
    /// already knows what was denied.
    pub fn with_carried(mut self, carried: Option<ReplanContext>) -> Self {
        self.replan = carried;
        self
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Context for the current plan request; `None` on a first attempt with
    /// nothing carried.
    pub fn replan_context(&self) -> Option<&ReplanContext> {
        self.replan.as_ref()
    }

    fn transition(&mut self, next: AttemptState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid attempt transition {:?} -> {next:?}",
            self.state
        );
        self.state = next;
    }

    pub fn start_execution(&mut self) {
        self.transition(AttemptState::Executing);
    }

    pub fn succeed(&mut self) {
        self.transition(AttemptState::Succeeded);
    }

    /// Record a failure. Returns the resulting state: retryable only while
    /// attempts remain.
    pub fn fail(&mut self, error: impl Into<String>, action: Option<Action>, kind: FailureKind) -> AttemptState {
        let next = if kind == FailureKind::Retryable && self.attempt < self.max_attempts {
            AttemptState::FailedRetryable
        } else {
            AttemptState::FailedTerminal
        };
        self.transition(next);
        self.replan = Some(ReplanContext {
            attempt: self.attempt,
            prior_error: error.into(),
            previous_action: action,
            denial: None,
        });
        next
    }

    /// Record a permission denial with alternatives.
    pub fn deny(&mut self, action: Action, denial: Denial) -> AttemptState {
        let error = format!("permission-denied: {}", denial.reason);
        self.fail_with_denial(error, action, denial)
    }

    /// Record a resubmitted denied action, repeating the original denial.
    pub fn refuse(&mut self, action: Action, denial: Denial) -> AttemptState {
        let error = format!(
            "permission-denied: {}.{} was already denied; not resubmitting",
            action.tool_name, action.operation
        );
        self.fail_with_denial(error, action, denial)
    }

    fn fail_with_denial(&mut self, error: String, action: Action, denial: Denial) -> AttemptState {
        let state = self.fail(error, Some(action), FailureKind::Retryable);
        if let Some(replan) = self.replan.as_mut() {
            replan.denial = Some(denial);
        }
        state
    }

    /// Move from `FailedRetryable` back to `Planned` for the next attempt.
    pub fn replan(&mut self) -> u32 {
        self.transition(AttemptState::Planned);
        self.attempt += 1;
        self.attempt
    }
}

/// Actions denied during a task. An identical resubmission is never
/// executed, in any step.
#[derive(Debug, Default)]
pub struct DeniedActions {
    denied: Vec<(Action, Denial)>,
    carried: Option<ReplanContext>,
}

impl DeniedActions {
    pub fn denial_for(&self, action: &Action) -> Option<&Denial> {
        self.denied.iter().find(|(a, _)| a == action).map(|(_, d)| d)
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.denial_for(action).is_some()
    }

    /// Remember a denial and the context to hand the next step if this one
    /// ends without recovering.
    pub fn remember(&mut self, action: Action, denial: Denial, context: Option<ReplanContext>) {
        if !self.contains(&action) {
            self.denied.push((action, denial));
        }
        self.carried = context;
    }

    /// Context for the next step's first plan, at most once.
    pub fn take_carried(&mut self) -> Option<ReplanContext> {
        self.carried.take()
    }

    /// A step succeeded; nothing to carry.
    pub fn clear_carried(&mut self) {
        self.carried = None;
    }

    pub fn len(&self) -> usize {
        self.denied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.denied.is_empty()
    }
}

/// Delay before `attempt` (1-based): none before the first, then
/// `base · 2^(attempt-2)` capped at `max`.
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    if attempt <= 1 || base_ms == 0 {
        return Duration::ZERO;
    }
    let factor = 1u64.checked_shl(attempt - 2).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

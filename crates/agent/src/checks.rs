//! Per-iteration stop checks.
//!
//! Each check looks at the loop's state and returns a [`Verdict`]. The loop
//! runs them in a fixed order (loop check, confidence check, termination
//! check) and stops at the first [`Verdict::Stop`].

use std::time::Duration;
use taskwright_config::AgentLoopConfig;
use taskwright_core::state::TaskState;
use taskwright_core::task::TaskStatus;
use thiserror::Error;

use crate::loop_detector::LoopDetector;

/// Why a loop stopped. Every variant maps to exactly one [`TaskStatus`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Halt {
    #[error("acceptance criteria met")]
    Succeeded { confirmed_by_advisor: bool },

    #[error("repeating failure pattern: {category}")]
    RepeatingFailure { category: String },

    #[error("confidence {score:.2} below floor {floor:.2}")]
    LowConfidence { score: f64, floor: f64 },

    #[error("permission denied with no allowed alternatives: {reason}")]
    PermissionDenied { reason: String },

    #[error("step budget of {max_steps} exhausted")]
    StepsExhausted { max_steps: u32 },

    #[error("wall-clock budget of {budget_secs}s exceeded")]
    WallClockExceeded { budget_secs: u64 },

    #[error("cost {spent:.4} exceeded budget {budget:.4}")]
    CostExceeded { spent: f64, budget: f64 },

    #[error("cancelled")]
    Cancelled,
}

impl Halt {
    pub fn status(&self) -> TaskStatus {
        match self {
            Halt::Succeeded { .. } => TaskStatus::Success,
            Halt::RepeatingFailure { .. } | Halt::LowConfidence { .. } | Halt::PermissionDenied { .. } => {
                TaskStatus::Escalated
            }
            Halt::StepsExhausted { .. } => TaskStatus::Exhausted,
            Halt::WallClockExceeded { .. } => TaskStatus::Timeout,
            Halt::CostExceeded { .. } => TaskStatus::CostLimit,
            Halt::Cancelled => TaskStatus::Cancelled,
        }
    }

    /// Stable reason string reported on the task result and the gate.
    pub fn reason(&self) -> &'static str {
        match self {
            Halt::Succeeded { .. } => "acceptance-criteria-met",
            Halt::RepeatingFailure { .. } => "repeating-failure-pattern",
            Halt::LowConfidence { .. } => "low-confidence",
            Halt::PermissionDenied { .. } => "permission-denied",
            Halt::StepsExhausted { .. } => "max-steps-reached",
            Halt::WallClockExceeded { .. } => "wall-clock-budget-exceeded",
            Halt::CostExceeded { .. } => "cost-budget-exceeded",
            Halt::Cancelled => "cancelled",
        }
    }

    /// Whether this halt opens an escalation gate.
    pub fn escalates(&self) -> bool {
        self.status() == TaskStatus::Escalated
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Continue,
    Stop(Halt),
}

impl Verdict {
    pub fn is_stop(&self) -> bool {
        matches!(self, Verdict::Stop(_))
    }
}

/// Stop when the last failures form a loop.
pub fn loop_check(detector: &LoopDetector) -> Verdict {
    match detector.looping_category() {
        Some(category) => Verdict::Stop(Halt::RepeatingFailure {
            category: category.to_string(),
        }),
        None => Verdict::Continue,
    }
}

/// Stop when a measured confidence is under the floor.
pub fn confidence_check(score: Option<f64>, floor: f64) -> Verdict {
    match score {
        Some(score) if score < floor => Verdict::Stop(Halt::LowConfidence { score, floor }),
        _ => Verdict::Continue,
    }
}

/// Success or budget exhaustion, checked before each new iteration.
///
/// Success wins over every budget: a task that met its criteria on its last
/// allowed step is a success, not exhausted.
pub fn termination_check(state: &TaskState, config: &AgentLoopConfig, elapsed: Duration) -> Verdict {
    if state.progress_score() >= config.success_threshold || state.advisor_confirmed {
        return Verdict::Stop(Halt::Succeeded {
            confirmed_by_advisor: state.advisor_confirmed,
        });
    }
    if state.current_step >= state.max_steps {
        return Verdict::Stop(Halt::StepsExhausted {
            max_steps: state.max_steps,
        });
    }
    if elapsed >= Duration::from_secs(config.wall_clock_budget_secs) {
        return Verdict::Stop(Halt::WallClockExceeded {
            budget_secs: config.wall_clock_budget_secs,
        });
    }
    if let Some(budget) = config.cost_budget
        && state.resources.cost > budget
    {
        return Verdict::Stop(Halt::CostExceeded {
            spent: state.resources.cost,
            budget,
        });
    }
    Verdict::Continue
}

//! Confidence probe — asks the advisor how sure it is about the current direction.

use std::sync::Arc;
use taskwright_core::advisor::{Advisor, AdvisorRequest, AdvisorRole, ConfidenceEstimate};
use taskwright_core::error::AdvisorError;
use taskwright_core::state::{ResourceUsage, TaskState};

/// Why a confidence check runs at this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTrigger {
    /// Every `confidence_interval` steps
    Interval,
    /// The last plan flagged itself as uncertain
    AdvisorUncertain,
    /// Requested through the task handle
    Requested,
}

impl ConfidenceTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTrigger::Interval => "interval",
            ConfidenceTrigger::AdvisorUncertain => "advisor-uncertain",
            ConfidenceTrigger::Requested => "requested",
        }
    }
}

/// Decide whether a check is due after the step just recorded.
///
/// At most one check per step: a step that already had one never gets a
/// second, whatever else asks for it.
pub fn confidence_due(
    state: &TaskState,
    interval: u32,
    advisor_uncertain: bool,
    requested: bool,
) -> Option<ConfidenceTrigger> {
    let step = state.current_step;
    if step == 0 || state.last_confidence_check_step == Some(step) {
        return None;
    }
    if interval > 0 && step % interval == 0 {
        Some(ConfidenceTrigger::Interval)
    } else if advisor_uncertain {
        Some(ConfidenceTrigger::AdvisorUncertain)
    } else if requested {
        Some(ConfidenceTrigger::Requested)
    } else {
        None
    }
}

pub struct ConfidenceProbe {
    advisor: Arc<dyn Advisor>,
    history: usize,
}

impl ConfidenceProbe {
    pub fn new(advisor: Arc<dyn Advisor>, history: usize) -> Self {
        Self { advisor, history }
    }

    /// Query a confidence score over recent history.
    pub async fn assess(
        &self,
        state: &TaskState,
        trigger: ConfidenceTrigger,
    ) -> (Result<ConfidenceEstimate, AdvisorError>, ResourceUsage) {
        let request = AdvisorRequest::new(
            AdvisorRole::EvaluateConfidence,
            state.agent_id.clone(),
            serde_json::json!({
                "goal": state.goal,
                "acceptance_criteria": state.acceptance_criteria,
                "trigger": trigger.as_str(),
                "current_step": state.current_step,
                "progress_score": state.progress_score(),
                "consecutive_failures": state.consecutive_failures,
                "last_errors": state.last_errors().collect::<Vec<_>>(),
                "recent_steps": state.recent_steps(self.history).iter().map(|s| serde_json::json!({
                    "step": s.step_number(),
                    "reasoning": s.reasoning(),
                    "success": s.success(),
                    "error": s.error(),
                })).collect::<Vec<_>>(),
            }),
        );

        let mut usage = ResourceUsage {
            advisor_calls: 1,
            ..Default::default()
        };
        let result = match self.advisor.consult(request).await {
            Ok(response) => {
                if let Some(u) = &response.usage {
                    usage.tokens += u.tokens;
                    usage.cost += u.cost;
                }
                response.decode::<ConfidenceEstimate>()
            }
            Err(e) => Err(e),
        };
        (result, usage)
    }
}

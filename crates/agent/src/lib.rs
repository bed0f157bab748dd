//! The agent execution loop for Taskwright.
//!
//! One [`AgentLoop`] runs one task through a **plan → execute → validate**
//! cycle until its acceptance criteria are met, a budget runs out, a
//! repeating failure or low confidence escalates it to a human, or it is
//! cancelled. Escalations suspend on [`EscalationGates`], shared with the
//! orchestrator.

pub mod attempt;
pub mod checks;
pub mod confidence;
pub mod escalation;
pub mod loop_detector;
pub mod loop_runner;
pub mod progress;

#[cfg(test)]
mod test_helpers;

pub use attempt::{AttemptCycle, AttemptState, DeniedActions, Denial, FailureKind, ReplanContext, backoff_delay};
pub use checks::{Halt, Verdict};
pub use confidence::{ConfidenceProbe, ConfidenceTrigger};
pub use escalation::{EscalationGates, Resolution};
pub use loop_detector::{LoopDetector, normalize_failure};
pub use loop_runner::{AgentLoop, TaskHandle};
pub use progress::{Evaluation, ProgressEvaluator};

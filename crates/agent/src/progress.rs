//! Progress evaluation — how close a task is to its acceptance criteria.
//!
//! Signals are tried in order of objectivity:
//!
//! 1. **Checks**: artifacts named `test-report*.json` holding
//!    `{"passed": n, "failed": m, "coverage": c}` score as the pass ratio,
//!    with the coverage change since the previous validation in the detail.
//! 2. **Heuristic**: when artifacts exist, the share of acceptance criteria
//!    whose keywords appear in them.
//! 3. **Advisor**: a qualitative estimate against the criteria.

use serde::Deserialize;
use std::sync::Arc;
use taskwright_core::advisor::{Advisor, AdvisorRequest, AdvisorRole, ProgressEstimate};
use taskwright_core::state::{ResourceUsage, TaskState, Validation, ValidationSource};
use tracing::{debug, warn};

const REPORT_PREFIX: &str = "test-report";
const REPORT_SUFFIX: &str = ".json";
const MIN_KEYWORD_CHARS: usize = 4;

const STOPWORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "must", "should", "will", "when", "then", "than", "into", "each", "every",
    "there", "their", "which", "while", "where", "also", "only", "been", "being", "does",
];

#[derive(Debug, Deserialize)]
struct TestReport {
    passed: u64,
    failed: u64,
    #[serde(default)]
    coverage: Option<f64>,
}

/// A validation plus what producing it cost.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub validation: Validation,
    pub usage: ResourceUsage,
}

impl Evaluation {
    fn free(validation: Validation) -> Self {
        Self {
            validation,
            usage: ResourceUsage::default(),
        }
    }
}

pub struct ProgressEvaluator {
    advisor: Arc<dyn Advisor>,
}

impl ProgressEvaluator {
    pub fn new(advisor: Arc<dyn Advisor>) -> Self {
        Self { advisor }
    }

    /// Score the task's current state.
    pub async fn evaluate(&self, state: &TaskState) -> Evaluation {
        if let Some(validation) = Self::from_checks(state) {
            debug!(task_id = %state.task_id, score = validation.score, "Progress from automated checks");
            return Evaluation::free(validation);
        }
        if let Some(validation) = Self::from_heuristic(state) {
            debug!(task_id = %state.task_id, score = validation.score, "Progress from artifact heuristic");
            return Evaluation::free(validation);
        }
        self.from_advisor(state).await
    }

    fn from_checks(state: &TaskState) -> Option<Validation> {
        let reports: Vec<TestReport> = state
            .artifacts
            .iter()
            .filter(|(name, _)| name.starts_with(REPORT_PREFIX) && name.ends_with(REPORT_SUFFIX))
            .filter_map(|(name, content)| match serde_json::from_str::<TestReport>(content) {
                Ok(report) => Some(report),
                Err(e) => {
                    debug!(artifact = %name, error = %e, "Ignoring unreadable test report");
                    None
                }
            })
            .collect();

        let passed: u64 = reports.iter().map(|r| r.passed).sum();
        let failed: u64 = reports.iter().map(|r| r.failed).sum();
        let total = passed + failed;
        if total == 0 {
            return None;
        }

        let coverages: Vec<f64> = reports.iter().filter_map(|r| r.coverage).collect();
        let coverage = (!coverages.is_empty()).then(|| coverages.iter().sum::<f64>() / coverages.len() as f64);

        let previous_coverage = state
            .steps()
            .iter()
            .rev()
            .find_map(|s| s.validation_result().and_then(|v| v.coverage));

        let mut detail = format!("{passed}/{total} checks passed");
        if let Some(c) = coverage {
            detail.push_str(&format!("; coverage {c:.2}"));
            if let Some(prev) = previous_coverage {
                detail.push_str(&format!(" ({:+.2})", c - prev));
            }
        }

        Some(Validation {
            score: passed as f64 / total as f64,
            source: ValidationSource::Checks,
            detail,
            coverage,
        })
    }

    fn from_heuristic(state: &TaskState) -> Option<Validation> {
        if state.artifacts.is_empty() || state.acceptance_criteria.is_empty() {
            return None;
        }

        let haystack: String = state
            .artifacts
            .iter()
            .map(|(name, content)| format!("{name}\n{content}\n"))
            .collect::<String>()
            .to_lowercase();

        let met = state
            .acceptance_criteria
            .iter()
            .filter(|criterion| criterion_mentioned(criterion, &haystack))
            .count();
        let total = state.acceptance_criteria.len();

        Some(Validation {
            score: met as f64 / total as f64,
            source: ValidationSource::Heuristic,
            detail: format!("{met}/{total} criteria reflected in {} artifacts", state.artifacts.len()),
            coverage: None,
        })
    }

    async fn from_advisor(&self, state: &TaskState) -> Evaluation {
        let request = AdvisorRequest::new(
            AdvisorRole::EvaluateProgress,
            state.agent_id.clone(),
            serde_json::json!({
                "goal": state.goal,
                "acceptance_criteria": state.acceptance_criteria,
                "current_step": state.current_step,
                "progress_score": state.progress_score(),
                "recent_steps": state.recent_steps(3).iter().map(|s| serde_json::json!({
                    "step": s.step_number(),
                    "reasoning": s.reasoning(),
                    "success": s.success(),
                })).collect::<Vec<_>>(),
            }),
        );

        let mut usage = ResourceUsage {
            advisor_calls: 1,
            ..Default::default()
        };

        let outcome = match self.advisor.consult(request).await {
            Ok(response) => {
                if let Some(u) = &response.usage {
                    usage.tokens += u.tokens;
                    usage.cost += u.cost;
                }
                response.decode::<ProgressEstimate>()
            }
            Err(e) => Err(e),
        };

        let validation = match outcome {
            Ok(estimate) => Validation {
                score: estimate.score,
                source: ValidationSource::Advisor,
                detail: estimate.detail,
                coverage: None,
            },
            Err(e) => {
                warn!(task_id = %state.task_id, error = %e, "Progress estimate unavailable");
                Validation {
                    score: 0.0,
                    source: ValidationSource::Unavailable,
                    detail: e.to_string(),
                    coverage: None,
                }
            }
        };
        Evaluation { validation, usage }
    }
}

/// A criterion counts as reflected when at least half of its keywords occur.
fn criterion_mentioned(criterion: &str, haystack: &str) -> bool {
    let keywords: Vec<String> = criterion
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS && !STOPWORDS.contains(&w.as_str()))
        .collect();
    if keywords.is_empty() {
        return false;
    }
    let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
    hits * 2 >= keywords.len()
}

//! Advisor trait — the abstraction over the language-model service.
//!
//! The advisor is consulted in four roles: planning the next action,
//! estimating progress, estimating confidence, and deciding what the
//! orchestrator does next. Responses arrive as untyped JSON and are decoded
//! at this boundary into closed, tagged types. Anything that does not match
//! the role's schema (including unknown tags) becomes
//! [`AdvisorError::Malformed`]; untyped data never travels further in.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AdvisorError;
use crate::state::Action;

/// Which question is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdvisorRole {
    Plan,
    EvaluateProgress,
    EvaluateConfidence,
    DecideNextAction,
}

impl std::fmt::Display for AdvisorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdvisorRole::Plan => "plan",
            AdvisorRole::EvaluateProgress => "evaluate-progress",
            AdvisorRole::EvaluateConfidence => "evaluate-confidence",
            AdvisorRole::DecideNextAction => "decide-next-action",
        };
        f.write_str(s)
    }
}

/// A structured request to the advisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorRequest {
    pub role: AdvisorRole,

    /// Who is asking (agent id or orchestrator)
    pub requester_id: String,

    /// Role-specific payload
    pub payload: serde_json::Value,
}

impl AdvisorRequest {
    pub fn new(role: AdvisorRole, requester_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            role,
            requester_id: requester_id.into(),
            payload,
        }
    }
}

/// Usage reported with a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisorUsage {
    pub tokens: u64,
    pub cost: f64,
}

/// A raw advisor response. Decode it with [`AdvisorResponse::decode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorResponse {
    pub body: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<AdvisorUsage>,
}

impl AdvisorResponse {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body, usage: None }
    }

    pub fn with_usage(mut self, tokens: u64, cost: f64) -> Self {
        self.usage = Some(AdvisorUsage { tokens, cost });
        self
    }

    /// Decode and validate the body against the schema of `T`.
    pub fn decode<T: AdvisorSchema>(&self) -> Result<T, AdvisorError> {
        let value: T = serde_json::from_value(self.body.clone())
            .map_err(|e| AdvisorError::Malformed(format!("{}: {e}", T::ROLE)))?;
        value
            .validate()
            .map_err(|reason| AdvisorError::Malformed(format!("{}: {reason}", T::ROLE)))?;
        Ok(value)
    }
}

/// A typed advisor answer with extra semantic validation beyond its shape.
pub trait AdvisorSchema: DeserializeOwned {
    const ROLE: AdvisorRole;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// The core Advisor trait.
///
/// Every model backend implements this; the loop and the orchestrator only
/// ever see this trait.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// A human-readable name for this advisor.
    fn name(&self) -> &str;

    /// Send a request and get a structured response.
    async fn consult(&self, request: AdvisorRequest) -> Result<AdvisorResponse, AdvisorError>;
}

fn check_score(score: f64) -> Result<(), String> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(format!("score {score} outside [0, 1]"))
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────

/// The action half of a plan: a tool call, or pure reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlannedAction {
    Tool {
        tool_name: String,
        operation: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
    Reason,
}

impl PlannedAction {
    pub fn into_action(self) -> Option<Action> {
        match self {
            PlannedAction::Tool {
                tool_name,
                operation,
                parameters,
            } => Some(Action {
                tool_name,
                operation,
                parameters,
            }),
            PlannedAction::Reason => None,
        }
    }
}

/// Answer to [`AdvisorRole::Plan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDecision {
    pub reasoning: String,

    /// Required: a plan without an action is malformed, not "do nothing".
    pub action: PlannedAction,

    /// The advisor believes the acceptance criteria are met
    #[serde(default)]
    pub goal_met: bool,

    /// The advisor is unsure about its direction
    #[serde(default)]
    pub uncertain: bool,
}

impl AdvisorSchema for PlanDecision {
    const ROLE: AdvisorRole = AdvisorRole::Plan;

    fn validate(&self) -> Result<(), String> {
        if let PlannedAction::Tool { tool_name, operation, .. } = &self.action {
            if tool_name.trim().is_empty() {
                return Err("empty tool_name".into());
            }
            if operation.trim().is_empty() {
                return Err("empty operation".into());
            }
        }
        Ok(())
    }
}

// ── Progress / confidence ────────────────────────────────────────────────

/// Answer to [`AdvisorRole::EvaluateProgress`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEstimate {
    pub score: f64,
    #[serde(default)]
    pub detail: String,
}

impl AdvisorSchema for ProgressEstimate {
    const ROLE: AdvisorRole = AdvisorRole::EvaluateProgress;

    fn validate(&self) -> Result<(), String> {
        check_score(self.score)
    }
}

/// Answer to [`AdvisorRole::EvaluateConfidence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceEstimate {
    pub score: f64,
    #[serde(default)]
    pub rationale: String,
}

impl AdvisorSchema for ConfidenceEstimate {
    const ROLE: AdvisorRole = AdvisorRole::EvaluateConfidence;

    fn validate(&self) -> Result<(), String> {
        check_score(self.score)
    }
}

// ── Orchestrator decision ────────────────────────────────────────────────

/// Answer to [`AdvisorRole::DecideNextAction`]. The set is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "kebab-case")]
pub enum NextAction {
    CreateTask {
        agent_type: String,
        description: String,
        #[serde(default)]
        context_refs: Vec<String>,
        #[serde(default)]
        acceptance_criteria: Vec<String>,
        #[serde(default)]
        rationale: Option<String>,
        #[serde(default)]
        priority: u8,
    },
    EscalateToHuman {
        reason: String,
    },
    MarkProjectComplete {
        #[serde(default)]
        summary: Option<String>,
    },
    Wait {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl NextAction {
    pub fn kind(&self) -> &'static str {
        match self {
            NextAction::CreateTask { .. } => "create-task",
            NextAction::EscalateToHuman { .. } => "escalate-to-human",
            NextAction::MarkProjectComplete { .. } => "mark-project-complete",
            NextAction::Wait { .. } => "wait",
        }
    }
}

impl AdvisorSchema for NextAction {
    const ROLE: AdvisorRole = AdvisorRole::DecideNextAction;

    fn validate(&self) -> Result<(), String> {
        match self {
            NextAction::CreateTask {
                agent_type,
                description,
                ..
            } => {
                if agent_type.trim().is_empty() {
                    return Err("create-task without agent_type".into());
                }
                if description.trim().is_empty() {
                    return Err("create-task without description".into());
                }
                Ok(())
            }
            NextAction::EscalateToHuman { reason } if reason.trim().is_empty() => {
                Err("escalate-to-human without reason".into())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_with_tool_action_decodes() {
        let resp = AdvisorResponse::new(json!({
            "reasoning": "read the file first",
            "action": {"kind": "tool", "tool_name": "artifacts", "operation": "read", "parameters": {"name": "a"}},
            "uncertain": true
        }));
        let plan: PlanDecision = resp.decode().unwrap();
        assert!(plan.uncertain);
        assert!(!plan.goal_met);
        let action = plan.action.into_action().unwrap();
        assert_eq!(action.tool_name, "artifacts");
    }

    #[test]
    fn plan_without_action_is_malformed() {
        let resp = AdvisorResponse::new(json!({"reasoning": "hmm"}));
        let err = resp.decode::<PlanDecision>().unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().starts_with("advisor-response-malformed"));
    }

    #[test]
    fn unknown_action_kind_is_malformed() {
        let resp = AdvisorResponse::new(json!({
            "reasoning": "x",
            "action": {"kind": "teleport"}
        }));
        assert!(resp.decode::<PlanDecision>().is_err());
    }

    #[test]
    fn reasoning_only_plan_has_no_action() {
        let resp = AdvisorResponse::new(json!({
            "reasoning": "done already",
            "action": {"kind": "reason"},
            "goal_met": true
        }));
        let plan: PlanDecision = resp.decode().unwrap();
        assert!(plan.goal_met);
        assert!(plan.action.into_action().is_none());
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        let resp = AdvisorResponse::new(json!({"score": 1.5}));
        assert!(resp.decode::<ConfidenceEstimate>().is_err());
        let resp = AdvisorResponse::new(json!({"score": 0.3, "detail": "partial"}));
        assert_eq!(resp.decode::<ProgressEstimate>().unwrap().score, 0.3);
    }

    #[test]
    fn next_action_enum_is_closed() {
        let ok = AdvisorResponse::new(json!({
            "decision": "create-task",
            "agent_type": "tester",
            "description": "write tests",
            "context_refs": ["src/lib.rs"]
        }));
        let decision: NextAction = ok.decode().unwrap();
        assert_eq!(decision.kind(), "create-task");

        let wait = AdvisorResponse::new(json!({"decision": "wait"}));
        assert_eq!(wait.decode::<NextAction>().unwrap().kind(), "wait");

        let bad = AdvisorResponse::new(json!({"decision": "go-fishing"}));
        assert!(bad.decode::<NextAction>().unwrap_err().is_protocol());
    }

    #[test]
    fn escalation_requires_reason() {
        let resp = AdvisorResponse::new(json!({"decision": "escalate-to-human", "reason": " "}));
        assert!(resp.decode::<NextAction>().is_err());
    }
}

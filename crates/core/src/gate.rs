//! Escalation gate records — requests for a human decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{ProjectId, TaskId};

/// Unique identifier for an escalation gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GateId(pub String);

impl GateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for GateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a gate blocks: one task, or new task creation for a whole project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum GateScope {
    Task { task_id: TaskId, project_id: ProjectId },
    Project { project_id: ProjectId },
}

impl GateScope {
    pub fn project_id(&self) -> &ProjectId {
        match self {
            GateScope::Task { project_id, .. } | GateScope::Project { project_id } => project_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStatus::Pending => f.write_str("pending"),
            GateStatus::Approved => f.write_str("approved"),
            GateStatus::Rejected => f.write_str("rejected"),
        }
    }
}

/// The human's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Approved,
    Rejected,
}

impl From<GateDecision> for GateStatus {
    fn from(decision: GateDecision) -> Self {
        match decision {
            GateDecision::Approved => GateStatus::Approved,
            GateDecision::Rejected => GateStatus::Rejected,
        }
    }
}

/// A stored escalation request. Created once per trigger, resolved at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRecord {
    pub gate_id: GateId,
    pub scope: GateScope,
    pub reason: String,

    /// Snapshot of what the human needs to decide (steps history, errors, ...)
    pub context: serde_json::Value,

    pub status: GateStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_payload: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl GateRecord {
    pub fn pending(scope: GateScope, reason: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            gate_id: GateId::new(),
            scope,
            reason: reason.into(),
            context,
            status: GateStatus::Pending,
            resolution_payload: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == GateStatus::Pending
    }
}

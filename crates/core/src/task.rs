//! Tasks — the unit of work the orchestrator hands to an agent.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a project (a group of tasks sharing one artifact store).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named reference to an artifact in the project store.
///
/// Tasks carry references, never full artifact content. The preview is a
/// bounded excerpt taken when the reference was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl ArtifactRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            preview: None,
        }
    }

    pub fn with_preview(name: impl Into<String>, content: &str, max_chars: usize) -> Self {
        Self {
            name: name.into(),
            preview: Some(bounded_preview(content, max_chars)),
        }
    }
}

/// Truncate `content` to at most `max_chars` characters, marking the cut.
pub fn bounded_preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut preview: String = content.chars().take(max_chars).collect();
    preview.push_str("…");
    preview
}

/// A unit of work with a goal and acceptance criteria, assigned to one agent type.
///
/// Immutable once handed to an agent loop; the loop's progress lives in
/// [`crate::state::TaskState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,

    pub project_id: ProjectId,

    /// What the agent is trying to achieve
    pub goal: String,

    /// Ordered acceptance criteria
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    /// Constraints the agent must respect
    #[serde(default)]
    pub constraints: Vec<String>,

    /// Which kind of agent should execute this task
    pub agent_type: String,

    /// Artifacts the task depends on
    #[serde(default)]
    pub context: Vec<ArtifactRef>,

    /// Higher runs first
    #[serde(default)]
    pub priority: u8,

    /// Why this task exists now (set by the orchestrator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Task {
    pub fn new(project_id: ProjectId, agent_type: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(),
            project_id,
            goal: goal.into(),
            acceptance_criteria: Vec::new(),
            constraints: Vec::new(),
            agent_type: agent_type.into(),
            context: Vec::new(),
            priority: 0,
            rationale: None,
        }
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_constraints<I, S>(mut self, constraints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints = constraints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, context: Vec<ArtifactRef>) -> Self {
        self.context = context;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Final status of a task. Exactly one is assigned when a loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Acceptance criteria met
    Success,
    /// Handed to a human (loop detected, low confidence, denied without alternatives)
    Escalated,
    /// Step budget used up
    Exhausted,
    /// Wall-clock budget used up
    Timeout,
    /// Cost budget used up
    CostLimit,
    /// Cancelled from outside
    Cancelled,
    /// Escalation gate was not resolved in time
    EscalationTimeout,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Escalated => "escalated",
            TaskStatus::Exhausted => "exhausted",
            TaskStatus::Timeout => "timeout",
            TaskStatus::CostLimit => "cost-limit",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::EscalationTimeout => "escalation-timeout",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

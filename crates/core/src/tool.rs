//! Tool invocation — the only way an agent acts on the world.
//!
//! Agents never call tools directly. They send a [`ToolRequest`] through a
//! [`ToolInvoker`] and get back a typed [`ToolResponse`]. Failures are
//! values, not errors: a tool that ran and failed, a tool that does not
//! exist, and a call rejected by policy all come back as responses, and a
//! permission denial is its own variant carrying the allowed alternatives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::error::ToolError;
use crate::state::Action;
use crate::task::ProjectId;

/// Name of the project artifact tool.
pub const ARTIFACT_TOOL: &str = "artifacts";

/// Who is calling a tool. Tool policy is keyed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requester {
    /// An agent loop working on a task in one project
    Agent { agent_type: String, project_id: ProjectId },
    /// The orchestrator rereading artifacts
    Orchestrator,
}

impl Requester {
    pub fn agent(agent_type: impl Into<String>, project_id: ProjectId) -> Self {
        Requester::Agent {
            agent_type: agent_type.into(),
            project_id,
        }
    }

    /// Agent type, or `"orchestrator"`.
    pub fn role(&self) -> &str {
        match self {
            Requester::Agent { agent_type, .. } => agent_type,
            Requester::Orchestrator => "orchestrator",
        }
    }
}

/// A request to run one tool operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Agent id (or "orchestrator") making the call
    pub requester_id: String,
    pub requester: Requester,
}

impl ToolRequest {
    pub fn new(
        tool_name: impl Into<String>,
        operation: impl Into<String>,
        parameters: serde_json::Value,
        requester_id: impl Into<String>,
        requester: Requester,
    ) -> Self {
        let mut request = Self {
            tool_name: tool_name.into(),
            operation: operation.into(),
            parameters,
            requester_id: requester_id.into(),
            requester,
        };
        request.pin_project();
        request
    }

    /// An agent's planned action, scoped to the agent's project.
    pub fn from_action(action: &Action, requester_id: impl Into<String>, requester: Requester) -> Self {
        Self::new(
            action.tool_name.clone(),
            action.operation.clone(),
            action.parameters.clone(),
            requester_id,
            requester,
        )
    }

    /// Overwrite `parameters.project_id` with the requesting agent's project.
    ///
    /// Agents only ever reach their own project's resources, whatever the
    /// planner put in the parameters.
    pub fn pin_project(&mut self) {
        let Requester::Agent { project_id, .. } = &self.requester else {
            return;
        };
        if self.parameters.is_null() {
            self.parameters = serde_json::Value::Object(Default::default());
        }
        if let Some(parameters) = self.parameters.as_object_mut() {
            parameters.insert("project_id".into(), serde_json::Value::String(project_id.0.clone()));
        }
    }
}

/// The outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResponse {
    Success {
        data: serde_json::Value,
        /// Artifacts written by this call (name → content)
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        artifacts: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audit_ref: Option<String>,
    },
    Failure {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audit_ref: Option<String>,
    },
    PermissionDenied {
        reason: String,
        allowed_alternatives: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audit_ref: Option<String>,
    },
}

impl ToolResponse {
    pub fn success(data: serde_json::Value) -> Self {
        ToolResponse::Success {
            data,
            artifacts: BTreeMap::new(),
            audit_ref: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResponse::Failure {
            error: error.into(),
            audit_ref: None,
        }
    }

    pub fn denied(reason: impl Into<String>, allowed_alternatives: Vec<String>) -> Self {
        ToolResponse::PermissionDenied {
            reason: reason.into(),
            allowed_alternatives,
            audit_ref: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResponse::Success { .. })
    }

    pub fn audit_ref(&self) -> Option<&str> {
        match self {
            ToolResponse::Success { audit_ref, .. }
            | ToolResponse::Failure { audit_ref, .. }
            | ToolResponse::PermissionDenied { audit_ref, .. } => audit_ref.as_deref(),
        }
    }

    /// Stamp the audit reference assigned by the invoker.
    pub fn with_audit_ref(mut self, reference: impl Into<String>) -> Self {
        let reference = Some(reference.into());
        match &mut self {
            ToolResponse::Success { audit_ref, .. }
            | ToolResponse::Failure { audit_ref, .. }
            | ToolResponse::PermissionDenied { audit_ref, .. } => *audit_ref = reference,
        }
        self
    }
}

/// Anything that can execute tool requests on behalf of agents.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, request: ToolRequest) -> ToolResponse;

    /// The orchestrator's read capability: one artifact from a project's store.
    ///
    /// Always goes through [`ToolInvoker::invoke`]; callers must not rely on
    /// cached content.
    async fn read_artifact(&self, project_id: &ProjectId, name: &str, requester_id: &str) -> ToolResponse {
        self.invoke(ToolRequest::new(
            ARTIFACT_TOOL,
            "read",
            serde_json::json!({ "project_id": project_id.0, "name": name }),
            requester_id,
            Requester::Orchestrator,
        ))
        .await
    }
}

/// Output of a successful in-process tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub data: serde_json::Value,
    pub artifacts: BTreeMap<String, String>,
}

impl ToolOutput {
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data,
            artifacts: BTreeMap::new(),
        }
    }
}

/// An in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "artifacts").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the advisor).
    fn description(&self) -> &str;

    /// Supported operations.
    fn operations(&self) -> &[&str];

    /// Run one operation.
    async fn execute(&self, operation: &str, parameters: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// A registry of in-process tools, usable directly as a [`ToolInvoker`].
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: None,
        }
    }

    /// Bound every tool call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    async fn execute(&self, request: &ToolRequest) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(&request.tool_name)
            .ok_or_else(|| ToolError::NotFound(request.tool_name.clone()))?;
        if !tool.operations().contains(&request.operation.as_str()) {
            return Err(ToolError::InvalidArguments(format!(
                "tool '{}' has no operation '{}'",
                request.tool_name, request.operation
            )));
        }
        let call = tool.execute(&request.operation, request.parameters.clone());
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| ToolError::Timeout {
                tool_name: request.tool_name.clone(),
                timeout_secs: limit.as_secs(),
            })?,
            None => call.await,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, request: ToolRequest) -> ToolResponse {
        match self.execute(&request).await {
            Ok(output) => ToolResponse::Success {
                data: output.data,
                artifacts: output.artifacts,
                audit_ref: None,
            },
            Err(e) => {
                tracing::debug!(tool = %request.tool_name, error = %e, "Tool call failed");
                ToolResponse::failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn operations(&self) -> &[&str] {
            &["say", "slow"]
        }
        async fn execute(&self, operation: &str, parameters: serde_json::Value) -> Result<ToolOutput, ToolError> {
            if operation == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            let text = parameters["text"].as_str().unwrap_or("").to_string();
            Ok(ToolOutput::data(serde_json::json!({ "text": text })))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = registry();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn invoke_known_tool() {
        let resp = registry()
            .invoke(ToolRequest::new("echo", "say", serde_json::json!({"text": "hi"}), "a1", Requester::Orchestrator))
            .await;
        match resp {
            ToolResponse::Success { data, .. } => assert_eq!(data["text"], "hi"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invoke_missing_tool_is_a_failure_value() {
        let resp = registry()
            .invoke(ToolRequest::new("nonexistent", "run", serde_json::json!({}), "a1", Requester::Orchestrator))
            .await;
        assert_eq!(resp, ToolResponse::failure("unknown tool: nonexistent"));
    }

    #[tokio::test]
    async fn invoke_unknown_operation_fails() {
        let resp = registry()
            .invoke(ToolRequest::new("echo", "shout", serde_json::json!({}), "a1", Requester::Orchestrator))
            .await;
        assert!(!resp.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let registry = registry().with_timeout(Duration::from_secs(5));
        let resp = registry
            .invoke(ToolRequest::new("echo", "slow", serde_json::json!({}), "a1", Requester::Orchestrator))
            .await;
        match resp {
            ToolResponse::Failure { error, .. } => assert!(error.contains("timed out")),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[test]
    fn agent_requests_are_pinned_to_their_project() {
        let action = Action::new(
            ARTIFACT_TOOL,
            "write",
            serde_json::json!({"project_id": "someone-else", "name": "x.md"}),
        );
        let request = ToolRequest::from_action(&action, "coder-1", Requester::agent("coder", ProjectId::from("p1")));
        assert_eq!(request.parameters["project_id"], "p1");
        assert_eq!(request.parameters["name"], "x.md");

        let bare = Action::new(ARTIFACT_TOOL, "list", serde_json::Value::Null);
        let request = ToolRequest::from_action(&bare, "coder-1", Requester::agent("coder", ProjectId::from("p1")));
        assert_eq!(request.parameters, serde_json::json!({"project_id": "p1"}));
    }

    #[test]
    fn orchestrator_requests_keep_their_parameters() {
        let request = ToolRequest::new(
            ARTIFACT_TOOL,
            "read",
            serde_json::json!({"project_id": "p2", "name": "a.md"}),
            "orchestrator",
            Requester::Orchestrator,
        );
        assert_eq!(request.parameters["project_id"], "p2");
        assert_eq!(request.requester.role(), "orchestrator");
    }

    #[test]
    fn request_without_requester_is_rejected() {
        let raw = serde_json::json!({"tool_name": "artifacts", "operation": "read", "requester_id": "x"});
        assert!(serde_json::from_value::<ToolRequest>(raw).is_err());
    }

    #[test]
    fn audit_ref_is_stamped() {
        let resp = ToolResponse::denied("no", vec!["artifacts".into()]).with_audit_ref("audit-7");
        assert_eq!(resp.audit_ref(), Some("audit-7"));
    }
}

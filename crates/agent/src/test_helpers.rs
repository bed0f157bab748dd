//! Shared test helpers: scripted advisors and tool invokers.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use taskwright_core::advisor::{Advisor, AdvisorRequest, AdvisorResponse, AdvisorRole};
use taskwright_core::error::AdvisorError;
use taskwright_core::tool::{ToolInvoker, ToolRequest, ToolResponse};

type Scripted = Result<AdvisorResponse, AdvisorError>;

/// An advisor that answers from per-role queues.
///
/// When a role's queue is empty the role's fallback is returned, if one was
/// set; otherwise the call fails as a transport error.
#[derive(Default)]
pub struct ScriptedAdvisor {
    queues: Mutex<HashMap<AdvisorRole, VecDeque<Scripted>>>,
    fallbacks: Mutex<HashMap<AdvisorRole, Scripted>>,
    requests: Mutex<Vec<AdvisorRequest>>,
}

impl ScriptedAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, role: AdvisorRole, response: Scripted) {
        self.queues.lock().unwrap().entry(role).or_default().push_back(response);
    }

    pub fn fallback(&self, role: AdvisorRole, response: Scripted) {
        self.fallbacks.lock().unwrap().insert(role, response);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests_for(&self, role: AdvisorRole) -> Vec<AdvisorRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Advisor for ScriptedAdvisor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn consult(&self, request: AdvisorRequest) -> Result<AdvisorResponse, AdvisorError> {
        let role = request.role;
        self.requests.lock().unwrap().push(request);
        if let Some(next) = self.queues.lock().unwrap().get_mut(&role).and_then(VecDeque::pop_front) {
            return next;
        }
        self.fallbacks
            .lock()
            .unwrap()
            .get(&role)
            .cloned()
            .unwrap_or_else(|| Err(AdvisorError::Transport(format!("no scripted response for {role}"))))
    }
}

/// A plan that calls `tool.operation`.
pub fn plan_tool(tool: &str, operation: &str, parameters: serde_json::Value) -> Scripted {
    Ok(AdvisorResponse::new(serde_json::json!({
        "reasoning": format!("use {tool}"),
        "action": {"kind": "tool", "tool_name": tool, "operation": operation, "parameters": parameters},
    })))
}

/// A pure-reasoning plan.
pub fn plan_reason(goal_met: bool) -> Scripted {
    Ok(AdvisorResponse::new(serde_json::json!({
        "reasoning": "thinking it through",
        "action": {"kind": "reason"},
        "goal_met": goal_met,
    })))
}

pub fn score(role_score: f64) -> Scripted {
    Ok(AdvisorResponse::new(serde_json::json!({"score": role_score})))
}

/// A tool invoker driven by a closure; records every request.
pub struct FnInvoker<F> {
    handler: F,
    requests: Mutex<Vec<ToolRequest>>,
}

impl<F> FnInvoker<F>
where
    F: Fn(&ToolRequest) -> ToolResponse + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ToolRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl<F> ToolInvoker for FnInvoker<F>
where
    F: Fn(&ToolRequest) -> ToolResponse + Send + Sync,
{
    async fn invoke(&self, request: ToolRequest) -> ToolResponse {
        let response = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        response
    }
}

//! A [`ToolInvoker`] that enforces the tool policy and audits every call.

use async_trait::async_trait;
use std::sync::Arc;
use taskwright_core::tool::{ToolInvoker, ToolRequest, ToolResponse};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};
use crate::policy::{PolicyDecision, ToolPolicy};

/// Wraps an inner invoker with [`ToolPolicy`] checks and an [`AuditLogger`].
///
/// Denied calls never reach the inner invoker. Every response carries the
/// reference of its audit entry.
pub struct AuditedInvoker {
    inner: Arc<dyn ToolInvoker>,
    policy: ToolPolicy,
    audit: Arc<AuditLogger>,
}

impl AuditedInvoker {
    pub fn new(inner: Arc<dyn ToolInvoker>, policy: ToolPolicy, audit: Arc<AuditLogger>) -> Self {
        Self { inner, policy, audit }
    }

    pub fn audit_log(&self) -> &Arc<AuditLogger> {
        &self.audit
    }
}

#[async_trait]
impl ToolInvoker for AuditedInvoker {
    async fn invoke(&self, mut request: ToolRequest) -> ToolResponse {
        request.pin_project();
        let role = request.requester.role().to_string();

        if let PolicyDecision::Denied {
            reason,
            allowed_alternatives,
        } = self.policy.check(&request.requester, &request.tool_name)
        {
            warn!(
                tool = %request.tool_name,
                requester = %request.requester_id,
                role = %role,
                "Tool call denied by policy"
            );
            let audit_ref = self.audit.log(
                AuditEvent::ToolDenied {
                    tool_name: request.tool_name.clone(),
                    operation: request.operation.clone(),
                },
                &request.requester_id,
                &role,
                AuditOutcome::Denied,
                Some(reason.clone()),
            );
            return ToolResponse::denied(reason, allowed_alternatives).with_audit_ref(audit_ref);
        }

        let event = AuditEvent::ToolInvocation {
            tool_name: request.tool_name.clone(),
            operation: request.operation.clone(),
        };
        let requester_id = request.requester_id.clone();

        let response = self.inner.invoke(request).await;
        let (outcome, details) = match &response {
            ToolResponse::Success { .. } => (AuditOutcome::Success, None),
            ToolResponse::Failure { error, .. } => (AuditOutcome::Failure, Some(error.clone())),
            ToolResponse::PermissionDenied { reason, .. } => (AuditOutcome::Denied, Some(reason.clone())),
        };
        let audit_ref = self.audit.log(event, &requester_id, &role, outcome, details);
        debug!(audit_ref = %audit_ref, requester = %requester_id, "Tool call audited");

        response.with_audit_ref(audit_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use taskwright_config::AgentProfile;
    use taskwright_core::task::ProjectId;
    use taskwright_core::tool::Requester;

    struct CountingInvoker {
        calls: AtomicUsize,
        seen: Mutex<Vec<ToolRequest>>,
    }

    #[async_trait]
    impl ToolInvoker for CountingInvoker {
        async fn invoke(&self, request: ToolRequest) -> ToolResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            if request.tool_name == "broken" {
                ToolResponse::failure("boom")
            } else {
                ToolResponse::success(serde_json::json!({"ok": true}))
            }
        }
    }

    fn setup() -> (AuditedInvoker, Arc<CountingInvoker>) {
        let inner = Arc::new(CountingInvoker {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        });
        let policy = ToolPolicy::from_profiles(&[
            AgentProfile::new("coder", "").with_allowed_tools(["artifacts", "broken"]),
        ]);
        let invoker = AuditedInvoker::new(inner.clone(), policy, Arc::new(AuditLogger::new()));
        (invoker, inner)
    }

    fn request(tool: &str) -> ToolRequest {
        ToolRequest::new(
            tool,
            "run",
            serde_json::json!({}),
            "agent-1",
            Requester::agent("coder", ProjectId::from("p1")),
        )
    }

    #[tokio::test]
    async fn allowed_call_is_audited_and_stamped() {
        let (invoker, inner) = setup();
        let resp = invoker.invoke(request("artifacts")).await;

        assert!(resp.is_success());
        let audit_ref = resp.audit_ref().unwrap().to_string();
        assert_eq!(invoker.audit_log().get(&audit_ref).unwrap().outcome, AuditOutcome::Success);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_call_never_reaches_inner_invoker() {
        let (invoker, inner) = setup();
        let resp = invoker.invoke(request("deploy")).await;

        match resp {
            ToolResponse::PermissionDenied {
                allowed_alternatives,
                audit_ref,
                ..
            } => {
                assert_eq!(allowed_alternatives, vec!["artifacts", "broken"]);
                assert!(audit_ref.is_some());
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_are_audited_with_details() {
        let (invoker, _) = setup();
        let resp = invoker.invoke(request("broken")).await;

        let entry = invoker.audit_log().get(resp.audit_ref().unwrap()).unwrap();
        assert_eq!(entry.outcome, AuditOutcome::Failure);
        assert_eq!(entry.details.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn agent_calls_reach_only_their_own_project() {
        let (invoker, inner) = setup();
        let mut req = request("artifacts");
        req.parameters = serde_json::json!({"project_id": "elsewhere", "name": "x.md"});

        invoker.invoke(req).await;

        let seen = inner.seen.lock().unwrap();
        assert_eq!(seen[0].parameters["project_id"], "p1");
    }

    #[tokio::test]
    async fn orchestrator_reads_are_audited_under_its_role() {
        let (invoker, _) = setup();
        let resp = invoker
            .read_artifact(&ProjectId::from("p2"), "design.md", "orchestrator")
            .await;

        let entry = invoker.audit_log().get(resp.audit_ref().unwrap()).unwrap();
        assert_eq!(entry.outcome, AuditOutcome::Success);
        assert_eq!(entry.role, "orchestrator");
    }
}

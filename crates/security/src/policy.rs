//! Tool permission policy — which agent types may call which tools.
//!
//! Rules:
//! - The orchestrator is always allowed
//! - A profile with an empty allowlist may call every tool
//! - Otherwise the tool must be in the profile's allowlist
//! - An agent type with no profile is denied everything (deny by default)

use std::collections::HashMap;
use taskwright_config::AgentProfile;
use taskwright_core::tool::Requester;

/// Result of checking a tool call against the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Allowed,
    Denied {
        reason: String,
        allowed_alternatives: Vec<String>,
    },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed)
    }
}

/// Per-agent-type tool allowlists.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allowlists: HashMap<String, Vec<String>>,
}

impl ToolPolicy {
    /// A policy with no profiles; every call is allowed.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Build a policy from configured agent profiles.
    pub fn from_profiles(profiles: &[AgentProfile]) -> Self {
        let allowlists = profiles
            .iter()
            .map(|p| {
                let mut tools = p.allowed_tools.clone();
                tools.sort();
                tools.dedup();
                (p.agent_type.clone(), tools)
            })
            .collect();
        Self { allowlists }
    }

    /// Check one tool call.
    pub fn check(&self, requester: &Requester, tool_name: &str) -> PolicyDecision {
        let Requester::Agent { agent_type: role, .. } = requester else {
            return PolicyDecision::Allowed;
        };
        if self.allowlists.is_empty() {
            return PolicyDecision::Allowed;
        }

        let Some(allowed) = self.allowlists.get(role) else {
            return PolicyDecision::Denied {
                reason: format!("agent type '{role}' has no tool permissions"),
                allowed_alternatives: Vec::new(),
            };
        };

        if allowed.is_empty() || allowed.iter().any(|t| t == tool_name) {
            PolicyDecision::Allowed
        } else {
            PolicyDecision::Denied {
                reason: format!("agent type '{role}' may not call tool '{tool_name}'"),
                allowed_alternatives: allowed.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwright_core::task::ProjectId;

    fn agent(agent_type: &str) -> Requester {
        Requester::agent(agent_type, ProjectId::from("p1"))
    }

    fn policy() -> ToolPolicy {
        ToolPolicy::from_profiles(&[
            AgentProfile::new("generalist", "anything"),
            AgentProfile::new("reviewer", "reads only").with_allowed_tools(["artifacts", "linter"]),
        ])
    }

    #[test]
    fn empty_allowlist_allows_everything() {
        assert!(policy().check(&agent("generalist"), "deploy").is_allowed());
    }

    #[test]
    fn allowlisted_tool_is_allowed() {
        assert!(policy().check(&agent("reviewer"), "linter").is_allowed());
    }

    #[test]
    fn denied_call_lists_alternatives() {
        match policy().check(&agent("reviewer"), "deploy") {
            PolicyDecision::Denied {
                reason,
                allowed_alternatives,
            } => {
                assert!(reason.contains("deploy"));
                assert_eq!(allowed_alternatives, vec!["artifacts", "linter"]);
            }
            PolicyDecision::Allowed => panic!("expected denial"),
        }
    }

    #[test]
    fn unknown_agent_type_denied_without_alternatives() {
        match policy().check(&agent("intruder"), "artifacts") {
            PolicyDecision::Denied {
                allowed_alternatives, ..
            } => assert!(allowed_alternatives.is_empty()),
            PolicyDecision::Allowed => panic!("expected denial"),
        }
    }

    #[test]
    fn orchestrator_and_permissive_policy_pass() {
        assert!(policy().check(&Requester::Orchestrator, "deploy").is_allowed());
        assert!(ToolPolicy::permissive().check(&agent("anyone"), "deploy").is_allowed());
    }

    #[test]
    fn agent_without_a_type_is_not_trusted() {
        assert!(!policy().check(&agent(""), "artifacts").is_allowed());
    }
}

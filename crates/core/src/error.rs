//! Error types for the Taskwright domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Taskwright operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Advisor errors ---
    #[error("Advisor error: {0}")]
    Advisor(#[from] AdvisorError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Escalation gate errors ---
    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the language advisor.
///
/// `Malformed` covers every response that does not match the schema of the
/// requested role, including unknown variant tags. Its display text starts
/// with the stable signature `advisor-response-malformed` so failure
/// classification can recognise it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdvisorError {
    #[error("advisor unavailable: {0}")]
    Transport(String),

    #[error("advisor timeout: {0}")]
    Timeout(String),

    #[error("advisor-response-malformed: {0}")]
    Malformed(String),
}

impl AdvisorError {
    /// Whether the advisor answered but the answer was unusable.
    pub fn is_protocol(&self) -> bool {
        matches!(self, AdvisorError::Malformed(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GateError {
    #[error("Escalation gate not found: {0}")]
    NotFound(String),

    #[error("Escalation gate {gate_id} is not pending (status: {status})")]
    InvalidState { gate_id: String, status: String },

    #[error("Escalation gate {gate_id} unresolved after {timeout_secs}s")]
    TimedOut { gate_id: String, timeout_secs: u64 },

    #[error("Wait on escalation gate {0} was cancelled")]
    Cancelled(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {kind}/{id}")]
    NotFound { kind: String, id: String },

    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_advisor_error_carries_signature() {
        let err = AdvisorError::Malformed("missing field `action`".into());
        assert!(err.to_string().starts_with("advisor-response-malformed"));
        assert!(err.is_protocol());
        assert!(!AdvisorError::Transport("refused".into()).is_protocol());
    }

    #[test]
    fn gate_error_displays_correctly() {
        let err = Error::Gate(GateError::InvalidState {
            gate_id: "g-1".into(),
            status: "approved".into(),
        });
        assert!(err.to_string().contains("g-1"));
        assert!(err.to_string().contains("approved"));
    }

    #[test]
    fn tool_not_found_reads_as_unknown_tool() {
        let err = ToolError::NotFound("frobnicate".into());
        assert_eq!(err.to_string(), "unknown tool: frobnicate");
    }
}

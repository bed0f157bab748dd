//! Security for Taskwright: tool permissions and audit logging.
//!
//! Provides:
//! - **Policy**: per-agent-type tool allowlists
//! - **Audit logging**: one structured entry per tool invocation
//! - **AuditedInvoker**: a `ToolInvoker` wrapper that enforces both

pub mod audit;
pub mod invoker;
pub mod policy;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use invoker::AuditedInvoker;
pub use policy::{PolicyDecision, ToolPolicy};

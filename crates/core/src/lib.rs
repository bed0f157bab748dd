//! # Taskwright Core
//!
//! Domain types, traits, and error definitions for the Taskwright
//! task-execution engine. This crate has no engine logic: it defines the
//! model that the agent loop, the orchestrator and the backends implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the language [`Advisor`],
//! the [`ToolInvoker`], and the [`StateStore`]. Implementations live in their
//! respective crates (or outside the workspace). This enables:
//! - Swapping implementations without touching the engine
//! - Easy testing with scripted advisors and invokers
//! - Clean dependency graph (all crates depend inward on core)

pub mod advisor;
pub mod error;
pub mod event;
pub mod gate;
pub mod state;
pub mod store;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use advisor::{
    Advisor, AdvisorRequest, AdvisorResponse, AdvisorRole, ConfidenceEstimate, NextAction, PlanDecision,
    PlannedAction, ProgressEstimate,
};
pub use error::{AdvisorError, Error, GateError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use gate::{GateDecision, GateId, GateRecord, GateScope, GateStatus};
pub use state::{
    Action, EscalationSummary, ExecutionResult, ResourceUsage, Step, StepDraft, TaskResult, TaskState, Validation,
    ValidationSource,
};
pub use store::{RecordKind, StateStore, StoreQuery, StoredRecord};
pub use task::{ArtifactRef, ProjectId, Task, TaskId, TaskStatus};
pub use tool::{Requester, Tool, ToolInvoker, ToolOutput, ToolRegistry, ToolRequest, ToolResponse};

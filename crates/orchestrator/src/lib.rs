//! Orchestrator for Taskwright.
//!
//! Owns each project's priority task queue, binds queued tasks to agent
//! loops with bounded per-project concurrency, and reacts to every
//! completion with one advisor decision: create the next task (with
//! explicit artifact references), escalate the project to a human, mark
//! it complete, or wait.

pub mod error;
pub mod orchestrator;
pub mod project;

pub use error::{OrchestratorError, Result};
pub use orchestrator::{ORCHESTRATOR_ID, Orchestrator, Outcome};
pub use project::{ProjectSnapshot, ProjectState, TaskQueue, TaskSummary};

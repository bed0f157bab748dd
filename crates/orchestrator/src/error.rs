//! Orchestrator error types.

use taskwright_core::error::{GateError, StoreError};
use taskwright_core::task::ProjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown project: {0}")]
    UnknownProject(ProjectId),

    #[error("project {0} is closed to new tasks")]
    ProjectClosed(ProjectId),

    /// The advisor answered inside the decision enum but with an unusable value
    #[error("decision protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

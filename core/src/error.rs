//! Crate-level error taxonomy
//!
//! Component modules define their own focused `thiserror` enums
//! (`LlmError`, `CommandError`, `PlannerError`, `ExecutorError`,
//! `RepositoryError`, `GuardrailError`); this module unifies them at the API
//! boundary the Orchestrator exposes, so callers of `start`/`cancel`/`status`
//! see one closed set of error kinds regardless of which component raised it.

use thiserror::Error;

use crate::command::CommandError;
use crate::guardrail::GuardrailError;
use crate::llm::LlmError;
use crate::orchestrator::OrchestratorError;
use crate::planning::PlannerError;
use crate::protocol::ProtocolError;
use crate::repository::RepositoryError;

/// The unified error taxonomy surfaced by the Task Orchestrator's API.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("dependency not met for task {task}: {dependency} is not Done")]
    DependencyNotMet { task: String, dependency: String },

    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("invalid task state: {0}")]
    InvalidTaskState(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<OrchestratorError> for ForgeError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(msg) => Self::Validation(msg),
            OrchestratorError::TaskNotFound(id) => Self::TaskNotFound(id),
            OrchestratorError::DependencyNotMet { task, dependency } => Self::DependencyNotMet { task, dependency },
            OrchestratorError::InvalidTaskState(msg) => Self::InvalidTaskState(msg),
        }
    }
}

impl ForgeError {
    /// The stable, externally-surfaced kind tag used in CLI/API error
    /// payloads and asserted on directly in scenario tests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::TaskNotFound(_) => "TaskNotFound",
            Self::DependencyNotMet { .. } => "DependencyNotMet",
            Self::CircularDependency(_) => "CircularDependency",
            Self::InvalidTaskState(_) => "InvalidTaskState",
            Self::Llm(e) => e.kind(),
            Self::Planner(_) => "InvalidPlan",
            Self::Command(e) => e.kind(),
            Self::Repository(_) => "InternalError",
            Self::Guardrail(_) => "InvalidTaskState",
            Self::Protocol(_) => "ProtocolFailed",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) => "InternalError",
        }
    }
}

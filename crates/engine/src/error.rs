//! Error taxonomy surfaced by the engine's public operations.

use stepflow_types::WorkflowExecution;
use stepflow_util::DocumentStoreError;
use thiserror::Error;

/// Errors returned to callers of the store, tracker, and orchestrator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed workflow definition; never retried.
    #[error("invalid workflow definition: {0}")]
    Validation(String),

    /// Workflow name or execution id does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// The run reached the `failed` state. Carries the full terminal record.
    #[error(
        "workflow '{}' failed: {}",
        .0.workflow_name,
        .0.error.as_deref().unwrap_or("unknown error")
    )]
    ExecutionFailed(Box<WorkflowExecution>),

    /// Backing document store failure.
    #[error(transparent)]
    Store(#[from] DocumentStoreError),

    /// A stored document could not be decoded.
    #[error("stored {kind} '{name}' is corrupt: {message}")]
    Corrupt {
        kind: &'static str,
        name: String,
        message: String,
    },
}

impl WorkflowError {
    pub fn workflow_not_found(name: impl Into<String>) -> Self {
        WorkflowError::NotFound {
            kind: "workflow",
            id: name.into(),
        }
    }

    pub fn execution_not_found(id: impl Into<String>) -> Self {
        WorkflowError::NotFound {
            kind: "execution",
            id: id.into(),
        }
    }

    /// The terminal record of a failed run, when this error carries one.
    pub fn execution(&self) -> Option<&WorkflowExecution> {
        match self {
            WorkflowError::ExecutionFailed(execution) => Some(execution),
            _ => None,
        }
    }
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

//! Shared type definitions for Stepflow workflows and their execution records.

pub mod execution;
pub mod workflow;

pub use execution::{ExecutionContext, ExecutionStatus, StepExecution, StepStatus, WorkflowExecution};
pub use workflow::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, FileOperation, NotificationLevel, OnError, Step, StepKind, StepType,
    WorkflowDefinition,
};

//! Core executor data types.

use std::fmt;

use serde_json::Value;

/// A step whose collaborator reported a non-success result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Display name of the failing leaf step.
    pub step: String,
    /// Underlying message, collaborator errors included.
    pub message: String,
    /// Partial result captured before the failure, such as a non-zero exit or an error response.
    pub result: Option<Value>,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            result: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step '{}' failed: {}", self.step, self.message)
    }
}

/// Why the interpreter stopped walking a step sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// A failure escalated (policy `stop`, or retries exhausted).
    Failed(StepFailure),
    /// The run was stopped cooperatively.
    Stopped,
}

/// Result of interpreting a step or sequence: `Ok` means continue with the next sibling.
pub type StepOutcome = Result<(), Interrupt>;

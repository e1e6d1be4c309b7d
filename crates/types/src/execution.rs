//! Execution records produced while a workflow runs.
//!
//! A [`WorkflowExecution`] is one run of a workflow against an [`ExecutionContext`]. Its
//! `steps` vector is an append-only log of [`StepExecution`] entries, one per step the
//! interpreter began, nested children included.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::workflow::StepType;

/// Read-only string-keyed variable bag supplied when a run starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ExecutionContext {
    variables: IndexMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from a JSON object.
    ///
    /// Strings are kept verbatim, `null` becomes an empty string, and every other value
    /// is stored as its compact JSON text. Non-object payloads are rejected.
    pub fn from_json(value: &JsonValue) -> Result<Self, String> {
        let JsonValue::Object(map) = value else {
            return Err(format!("context must be a JSON object, got {}", json_type_name(value)));
        };
        let variables = map
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    JsonValue::String(text) => text.clone(),
                    JsonValue::Null => String::new(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect();
        Ok(Self { variables })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for ExecutionContext
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            variables: iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect(),
        }
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Lifecycle of a single step execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
    Stopped,
}

impl StepStatus {
    /// Terminal states never transition back to `running`.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Stopped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Retrying => "retrying",
            StepStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Timestamped record of one step the interpreter began.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    /// Unique identifier for this step execution.
    pub id: String,
    pub name: String,
    pub kind: StepType,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Kind-specific success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Failure message of the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Retries performed after the initial attempt, so an exhausted step with
    /// `maxRetries: 2` records 2 here, not 3.
    #[serde(default)]
    pub retry_count: u32,
}

impl StepExecution {
    /// Creates a `pending` record stamped with the current time.
    pub fn pending(id: impl Into<String>, name: impl Into<String>, kind: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            status: StepStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Milliseconds between start and end, when the step has ended.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// One run of a workflow against a specific context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// Snapshot of the context supplied at start.
    pub context: ExecutionContext,
    /// Append-only log of step executions.
    #[serde(default)]
    pub steps: Vec<StepExecution>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Message of the first stop-causing failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Creates a `running` record stamped with the current time.
    pub fn started(id: impl Into<String>, workflow_name: impl Into<String>, context: ExecutionContext) -> Self {
        Self {
            id: id.into(),
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::Running,
            context,
            steps: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    /// The failed step whose message became the run error, falling back to the last failure.
    pub fn failing_step(&self) -> Option<&StepExecution> {
        let mut failed = self.steps.iter().rev().filter(|step| step.status == StepStatus::Failed);
        match self.error.as_deref() {
            Some(message) => failed
                .clone()
                .find(|step| step.error.as_deref() == Some(message))
                .or_else(|| failed.next()),
            None => failed.next(),
        }
    }
}

//! Strongly typed workflow definitions shared by the engine, the store, and the CLI.
//!
//! A workflow is a named tree of [`Step`]s. Every step carries the same error-handling
//! fields regardless of its kind; the kind-specific payload lives in [`StepKind`], which
//! is serialized as an internally tagged `kind` field so authored documents read as
//! `{ "name": "...", "kind": "command", "command": "..." }`.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default number of retries applied when `onError` is `retry`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between retry attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Named, tree-structured definition of steps to execute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier within a store.
    pub name: String,
    /// Optional descriptive copy shown by `list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered root steps executed as an implicit sequence.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Total number of steps in the tree, nested children included.
    pub fn step_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps.iter().map(|step| 1 + step.children().map(count).unwrap_or(0)).sum()
        }
        count(&self.steps)
    }
}

/// One unit of work of a specific kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Human label; not required to be unique.
    #[serde(default)]
    pub name: String,
    /// Kind tag plus the kind-specific payload.
    #[serde(flatten)]
    pub kind: StepKind,
    /// Reaction to a failure of this step.
    #[serde(default)]
    pub on_error: OnError,
    /// Retry budget consulted when `on_error` is [`OnError::Retry`].
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between retry attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Step {
    /// Builds a step with the default error policy.
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            on_error: OnError::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    /// Replaces the error policy.
    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// Replaces the retry budget and delay.
    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Nested steps for container kinds (`parallel`, `sequential`).
    pub fn children(&self) -> Option<&[Step]> {
        match &self.kind {
            StepKind::Parallel { steps } | StepKind::Sequential { steps } => Some(steps),
            _ => None,
        }
    }

    /// Label used in logs and error messages; falls back to the kind when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() { self.kind.step_type().as_str() } else { self.name.as_str() }
    }
}

/// Kind-specific step payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Shell command rendered against the context and run by the process invoker.
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Script file invoked as a subprocess with context-derived environment variables.
    Script {
        path: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Boolean expression evaluated by the expression evaluator.
    Condition { expression: String },
    /// Children dispatched concurrently and joined.
    Parallel { steps: Vec<Step> },
    /// Children run in declaration order.
    Sequential { steps: Vec<Step> },
    /// Timer suspension, in milliseconds.
    Wait { duration: u64 },
    /// Outbound HTTP request.
    Http {
        #[serde(default = "default_http_method")]
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        headers: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<JsonValue>,
    },
    /// Filesystem operation.
    File {
        operation: FileOperation,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Fire-and-forget notification.
    Notification {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default)]
        level: NotificationLevel,
    },
}

impl StepKind {
    /// Payload-free tag for this kind.
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Command { .. } => StepType::Command,
            StepKind::Script { .. } => StepType::Script,
            StepKind::Condition { .. } => StepType::Condition,
            StepKind::Parallel { .. } => StepType::Parallel,
            StepKind::Sequential { .. } => StepType::Sequential,
            StepKind::Wait { .. } => StepType::Wait,
            StepKind::Http { .. } => StepType::Http,
            StepKind::File { .. } => StepType::File,
            StepKind::Notification { .. } => StepType::Notification,
        }
    }
}

/// Payload-free step kind, recorded on each step execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Command,
    Script,
    Condition,
    Parallel,
    Sequential,
    Wait,
    Http,
    File,
    Notification,
}

impl StepType {
    /// Every supported kind, in documentation order.
    pub const ALL: [StepType; 9] = [
        StepType::Command,
        StepType::Script,
        StepType::Condition,
        StepType::Parallel,
        StepType::Sequential,
        StepType::Wait,
        StepType::Http,
        StepType::File,
        StepType::Notification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Command => "command",
            StepType::Script => "script",
            StepType::Condition => "condition",
            StepType::Parallel => "parallel",
            StepType::Sequential => "sequential",
            StepType::Wait => "wait",
            StepType::Http => "http",
            StepType::File => "file",
            StepType::Notification => "notification",
        }
    }

    /// Looks up a kind by its serialized tag.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step directive governing how the interpreter reacts to a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Abort the enclosing sequence and fail the run.
    #[default]
    Stop,
    /// Record the failure and proceed to the next sibling.
    Continue,
    /// Re-attempt the step up to `max_retries` times, then behave like `Stop`.
    Retry,
}

/// Filesystem operations supported by `file` steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Read,
    Write,
    Append,
    Delete,
    Copy,
    Move,
}

impl FileOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperation::Read => "read",
            FileOperation::Write => "write",
            FileOperation::Append => "append",
            FileOperation::Delete => "delete",
            FileOperation::Copy => "copy",
            FileOperation::Move => "move",
        }
    }

    /// Whether the operation needs a `destination` path.
    pub fn requires_destination(self) -> bool {
        matches!(self, FileOperation::Copy | FileOperation::Move)
    }
}

/// Severity attached to notification steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    #[default]
    Info,
    Warning,
    Error,
}

fn default_http_method() -> String {
    "GET".to_string()
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

const fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

//! # Stepflow Engine
//!
//! The Stepflow Engine stores, validates, and executes tree-structured workflows. A workflow
//! is a list of steps (`command`, `script`, `condition`, `parallel`, `sequential`, `wait`,
//! `http`, `file`, `notification`) run against a read-only string context, with a per-step
//! `onError` policy deciding whether failures stop the run, are skipped, or are retried.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use stepflow_engine::{Orchestrator, WorkflowStore, collaborators::Collaborators};
//! use stepflow_util::ExecutorConfig;
//!
//! let collaborators = Collaborators::from_config(&ExecutorConfig::default())?;
//! let orchestrator = Orchestrator::new(WorkflowStore::in_memory(), collaborators);
//! orchestrator.define("pause", &serde_json::json!([{ "kind": "wait", "duration": 5 }]))?;
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let record = runtime.block_on(orchestrator.start("pause", Default::default()))?;
//! assert_eq!(record.steps.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`workflow::store`**: validated definitions and execution snapshots on a document store
//! - **`executor`**: the step interpreter and per-kind dispatch
//! - **`workflow::tracker`**: active runs and cooperative stop
//! - **`workflow::runner`**: the [`Orchestrator`] tying the pieces together
//! - **`collaborators`**: process, filesystem, HTTP, expression, and notification seams
//! - **`resolve`** / **`condition`**: `{{identifier}}` templates and the condition grammar

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

pub mod collaborators;
pub mod condition;
pub mod error;
pub mod executor;
pub mod resolve;
pub mod workflow;

pub use collaborators::Collaborators;
pub use error::WorkflowError;
pub use executor::{Interrupt, StepFailure, StepInterpreter, StepOutcome};
pub use workflow::runner::{Orchestrator, PreparedRun};
pub use workflow::store::WorkflowStore;
pub use workflow::tracker::{ExecutionHandle, ExecutionTracker};

/// Reads a workflow document from disk.
///
/// YAML is a superset of JSON, so both formats go through the YAML parser. The result is
/// the raw document, ready for [`WorkflowStore::define`].
///
/// # Examples
///
/// ```rust
/// use stepflow_engine::parse_workflow_file;
///
/// let temp_dir = tempfile::tempdir()?;
/// let workflow_path = temp_dir.path().join("deploy.yaml");
/// std::fs::write(&workflow_path, "steps:\n  - kind: wait\n    duration: 10\n")?;
///
/// let document = parse_workflow_file(&workflow_path)?;
/// assert_eq!(document["steps"][0]["kind"], "wait");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_workflow_file(file_path: impl AsRef<Path>) -> Result<Value> {
    let file_path = file_path.as_ref();
    let content =
        fs::read_to_string(file_path).with_context(|| format!("failed to read workflow file: {}", file_path.display()))?;
    serde_yaml::from_str::<Value>(&content).with_context(|| format!("failed to parse workflow file: {}", file_path.display()))
}

//! Workflow Store.
//!
//! Persists validated workflow definitions and final execution snapshots through two
//! [`DocumentStore`] namespaces. Reads always go back to the backing store, so edits made
//! by another process are visible on the next `load`.

use std::sync::Arc;

use serde_json::Value;
use stepflow_types::{WorkflowDefinition, WorkflowExecution};
use stepflow_util::{DocumentStore, ExecutorConfig, InMemoryDocumentStore, JsonFileDocumentStore};
use tracing::{debug, warn};

use super::document::definition_from_document;
use crate::error::{Result, WorkflowError};

pub struct WorkflowStore {
    workflows: Arc<dyn DocumentStore>,
    executions: Arc<dyn DocumentStore>,
}

impl WorkflowStore {
    pub fn new(workflows: Arc<dyn DocumentStore>, executions: Arc<dyn DocumentStore>) -> Self {
        Self { workflows, executions }
    }

    /// File-backed store rooted at the configured data directory.
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            Arc::new(JsonFileDocumentStore::new(config.workflows_dir())),
            Arc::new(JsonFileDocumentStore::new(config.executions_dir())),
        )
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDocumentStore::new()), Arc::new(InMemoryDocumentStore::new()))
    }

    /// Validates and stores `document` under `name`, replacing any previous definition.
    pub fn define(&self, name: &str, document: &Value) -> Result<WorkflowDefinition> {
        let definition = definition_from_document(name, document)?;
        let encoded = serde_json::to_value(&definition).map_err(|error| WorkflowError::Corrupt {
            kind: "workflow",
            name: definition.name.clone(),
            message: error.to_string(),
        })?;
        self.workflows.save(&definition.name, &encoded)?;
        debug!(workflow = %definition.name, steps = definition.step_count(), "workflow defined");
        Ok(definition)
    }

    pub fn load(&self, name: &str) -> Result<WorkflowDefinition> {
        let document = self
            .workflows
            .load(name.trim())?
            .ok_or_else(|| WorkflowError::workflow_not_found(name))?;
        decode("workflow", name, document)
    }

    /// Every stored definition, sorted by name. Corrupt documents are skipped with a warning.
    pub fn list(&self) -> Result<Vec<WorkflowDefinition>> {
        let mut definitions = Vec::new();
        for name in self.workflows.list()? {
            match self.load(&name) {
                Ok(definition) => definitions.push(definition),
                Err(WorkflowError::NotFound { .. }) => {}
                Err(error) => warn!(workflow = %name, error = %error, "skipping unreadable workflow"),
            }
        }
        Ok(definitions)
    }

    /// Removes a definition. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.workflows.delete(name.trim())?)
    }

    pub fn save_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let encoded = serde_json::to_value(execution).map_err(|error| WorkflowError::Corrupt {
            kind: "execution",
            name: execution.id.clone(),
            message: error.to_string(),
        })?;
        self.executions.save(&execution.id, &encoded)?;
        Ok(())
    }

    pub fn load_execution(&self, execution_id: &str) -> Result<WorkflowExecution> {
        let document = self
            .executions
            .load(execution_id)?
            .ok_or_else(|| WorkflowError::execution_not_found(execution_id))?;
        decode("execution", execution_id, document)
    }

    /// Stored execution snapshots, oldest first.
    pub fn list_executions(&self) -> Result<Vec<WorkflowExecution>> {
        let mut executions = Vec::new();
        for id in self.executions.list()? {
            match self.load_execution(&id) {
                Ok(execution) => executions.push(execution),
                Err(WorkflowError::NotFound { .. }) => {}
                Err(error) => warn!(execution_id = %id, error = %error, "skipping unreadable execution"),
            }
        }
        executions.sort_by(|left, right| left.start_time.cmp(&right.start_time));
        Ok(executions)
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: &'static str, name: &str, document: Value) -> Result<T> {
    serde_json::from_value(document).map_err(|error| WorkflowError::Corrupt {
        kind,
        name: name.to_string(),
        message: error.to_string(),
    })
}

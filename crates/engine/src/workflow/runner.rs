//! Orchestrator: owns the store, the tracker, and the interpreter for one process.
//!
//! There is no process-wide state; independent orchestrators can coexist (tests build one
//! per case). A run is resolved, registered, interpreted, finalized, and its final snapshot
//! persisted. Persistence failures are logged and never change the run outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use stepflow_types::{ExecutionContext, ExecutionStatus, WorkflowDefinition, WorkflowExecution};
use stepflow_util::ExecutorConfig;
use tracing::{debug, info, warn};

use super::store::WorkflowStore;
use super::tracker::{ExecutionHandle, ExecutionTracker};
use crate::collaborators::Collaborators;
use crate::error::{Result, WorkflowError};
use crate::executor::StepInterpreter;

pub struct Orchestrator {
    store: WorkflowStore,
    tracker: ExecutionTracker,
    interpreter: StepInterpreter,
}

/// A registered run that has not started interpreting yet.
pub struct PreparedRun {
    pub handle: Arc<ExecutionHandle>,
    pub definition: WorkflowDefinition,
}

impl Orchestrator {
    pub fn new(store: WorkflowStore, collaborators: Collaborators) -> Self {
        Self {
            store,
            tracker: ExecutionTracker::new(),
            interpreter: StepInterpreter::new(collaborators),
        }
    }

    /// File-backed store and default collaborators.
    pub fn from_config(config: &ExecutorConfig) -> anyhow::Result<Self> {
        Ok(Self::new(WorkflowStore::from_config(config), Collaborators::from_config(config)?))
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    pub fn define(&self, name: &str, document: &Value) -> Result<WorkflowDefinition> {
        self.store.define(name, document)
    }

    pub fn load(&self, name: &str) -> Result<WorkflowDefinition> {
        self.store.load(name)
    }

    pub fn list(&self) -> Result<Vec<WorkflowDefinition>> {
        self.store.list()
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        self.store.delete(name)
    }

    /// Runs `workflow_name` to a terminal state.
    ///
    /// Completed and stopped runs return `Ok` with the terminal record. A failed run returns
    /// [`WorkflowError::ExecutionFailed`] carrying the same record, so callers that only
    /// inspect the record can still reach it through [`WorkflowError::execution`].
    pub async fn start(&self, workflow_name: &str, context: ExecutionContext) -> Result<WorkflowExecution> {
        let prepared = self.prepare(workflow_name, context)?;
        self.run_prepared(prepared).await
    }

    /// Resolves the definition and registers an active run without interpreting it.
    ///
    /// The returned handle exposes the execution id before any step runs.
    pub fn prepare(&self, workflow_name: &str, context: ExecutionContext) -> Result<PreparedRun> {
        let definition = self.store.load(workflow_name)?;
        let handle = self.tracker.register(&definition.name, context);
        info!(
            execution_id = %handle.id(),
            workflow = %definition.name,
            steps = definition.step_count(),
            "execution started"
        );
        self.persist(&handle.snapshot());
        Ok(PreparedRun { handle, definition })
    }

    /// Interprets a prepared run, finalizes it, and persists the terminal snapshot.
    pub async fn run_prepared(&self, prepared: PreparedRun) -> Result<WorkflowExecution> {
        let PreparedRun { handle, definition } = prepared;
        let outcome = self.interpreter.run(&handle, &definition.steps).await;
        let record = self.tracker.finalize(&handle, &outcome);
        self.persist(&record);

        if record.status == ExecutionStatus::Failed {
            return Err(WorkflowError::ExecutionFailed(Box::new(record)));
        }
        Ok(record)
    }

    /// Snapshots of active runs.
    pub fn get_active(&self) -> Vec<WorkflowExecution> {
        self.tracker.get_active()
    }

    /// Cooperatively stops an active run; `false` for unknown or finished ids.
    pub fn stop(&self, execution_id: &str) -> bool {
        self.tracker.stop(execution_id)
    }

    /// Stops a run started by this or another process.
    ///
    /// Active runs in this process are stopped directly. Otherwise a persisted `running`
    /// snapshot is flipped to `stopped`; the owning process notices through
    /// [`Orchestrator::watch_persisted_stop`]. Returns `false` when the run is already terminal.
    pub fn request_stop(&self, execution_id: &str) -> Result<bool> {
        if self.stop(execution_id) {
            return Ok(true);
        }
        let mut record = self.store.load_execution(execution_id)?;
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = ExecutionStatus::Stopped;
        record.end_time = Some(Utc::now());
        self.store.save_execution(&record)?;
        info!(execution_id, "stop recorded for execution owned by another process");
        Ok(true)
    }

    /// Polls the persisted snapshot of an active run and stops it once another process has
    /// marked it `stopped`. Returns when the run is no longer active.
    pub async fn watch_persisted_stop(&self, execution_id: &str, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            if self.tracker.get(execution_id).is_none() {
                return;
            }
            match self.store.load_execution(execution_id) {
                Ok(record) if record.status == ExecutionStatus::Stopped => {
                    debug!(execution_id, "persisted stop observed");
                    self.stop(execution_id);
                    return;
                }
                Ok(_) => {}
                Err(error) => debug!(execution_id, error = %error, "could not read execution snapshot"),
            }
        }
    }

    fn persist(&self, record: &WorkflowExecution) {
        if let Err(error) = self.store.save_execution(record) {
            warn!(execution_id = %record.id, error = %error, "failed to persist execution snapshot");
        }
    }
}

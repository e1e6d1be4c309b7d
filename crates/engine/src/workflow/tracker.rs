//! Execution tracking.
//!
//! The [`ExecutionTracker`] owns the set of runs that are currently active. Each run is
//! represented by an [`ExecutionHandle`], which holds the live [`WorkflowExecution`]
//! record and a cooperative stop flag consulted by the interpreter between steps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use stepflow_types::{ExecutionContext, ExecutionStatus, StepExecution, WorkflowExecution};
use tracing::{debug, info};
use uuid::Uuid;

use crate::executor::StepOutcome;
use crate::executor::types::Interrupt;

/// Live state of one run.
#[derive(Debug)]
pub struct ExecutionHandle {
    id: String,
    record: Mutex<WorkflowExecution>,
    stop_requested: AtomicBool,
}

impl ExecutionHandle {
    fn new(record: WorkflowExecution) -> Self {
        Self {
            id: record.id.clone(),
            record: Mutex::new(record),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether a stop was requested; checked before each step and retry attempt.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> WorkflowExecution {
        self.with_record(|record| record.clone())
    }

    /// Marks the run `stopped` and raises the stop flag. No-op on an already terminal run.
    pub fn request_stop(&self) -> bool {
        let changed = self.with_record(|record| {
            if record.status.is_terminal() {
                return false;
            }
            record.status = ExecutionStatus::Stopped;
            record.end_time = Some(Utc::now());
            true
        });
        self.stop_requested.store(true, Ordering::SeqCst);
        changed
    }

    /// Appends a step record and returns its position in the log.
    pub(crate) fn begin_step(&self, step: StepExecution) -> usize {
        self.with_record(|record| {
            record.steps.push(step);
            record.steps.len() - 1
        })
    }

    pub(crate) fn update_step(&self, index: usize, update: impl FnOnce(&mut StepExecution)) {
        self.with_record(|record| {
            if let Some(step) = record.steps.get_mut(index) {
                update(step);
            }
        });
    }

    fn with_record<R>(&self, f: impl FnOnce(&mut WorkflowExecution) -> R) -> R {
        let mut record = self.record.lock().expect("execution record lock poisoned");
        f(&mut record)
    }
}

/// Registry of active runs, safe to share across concurrent `start`/`stop` callers.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    active: Mutex<HashMap<String, Arc<ExecutionHandle>>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh execution id and registers a `running` record.
    pub fn register(&self, workflow_name: &str, context: ExecutionContext) -> Arc<ExecutionHandle> {
        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(ExecutionHandle::new(WorkflowExecution::started(
            id.clone(),
            workflow_name,
            context,
        )));
        self.lock().insert(id.clone(), handle.clone());
        debug!(execution_id = %id, workflow = %workflow_name, "execution registered");
        handle
    }

    /// Settles the final status from the interpreter outcome and removes the run from the
    /// active set. A run already marked `stopped` keeps that status.
    pub fn finalize(&self, handle: &ExecutionHandle, outcome: &StepOutcome) -> WorkflowExecution {
        self.lock().remove(handle.id());
        handle.with_record(|record| {
            if record.status != ExecutionStatus::Stopped {
                match outcome {
                    Ok(()) => record.status = ExecutionStatus::Completed,
                    Err(Interrupt::Failed(failure)) => {
                        record.status = ExecutionStatus::Failed;
                        record.error = Some(failure.message.clone());
                    }
                    Err(Interrupt::Stopped) => record.status = ExecutionStatus::Stopped,
                }
                record.end_time = Some(Utc::now());
            }
            info!(
                execution_id = %record.id,
                workflow = %record.workflow_name,
                status = %record.status,
                steps = record.steps.len(),
                "execution finished"
            );
            record.clone()
        })
    }

    /// Snapshots of every active run, oldest first.
    pub fn get_active(&self) -> Vec<WorkflowExecution> {
        let handles: Vec<Arc<ExecutionHandle>> = self.lock().values().cloned().collect();
        let mut snapshots: Vec<WorkflowExecution> = handles.iter().map(|handle| handle.snapshot()).collect();
        snapshots.sort_by(|left, right| left.start_time.cmp(&right.start_time));
        snapshots
    }

    /// Handle of an active run.
    pub fn get(&self, execution_id: &str) -> Option<Arc<ExecutionHandle>> {
        self.lock().get(execution_id).cloned()
    }

    /// Stops an active run. Returns `false` for unknown or already finished ids.
    pub fn stop(&self, execution_id: &str) -> bool {
        let Some(handle) = self.lock().remove(execution_id) else {
            debug!(execution_id, "stop requested for inactive execution");
            return false;
        };
        let stopped = handle.request_stop();
        info!(execution_id, "execution stop requested");
        stopped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ExecutionHandle>>> {
        self.active.lock().expect("active execution lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::types::StepFailure;
    use stepflow_types::StepType;

    #[test]
    fn register_and_finalize_completed() {
        let tracker = ExecutionTracker::new();
        let handle = tracker.register("demo", ExecutionContext::new());
        assert_eq!(tracker.get_active().len(), 1);

        let record = tracker.finalize(&handle, &Ok(()));
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.end_time.is_some());
        assert!(tracker.get_active().is_empty());
    }

    #[test]
    fn finalize_failed_records_error() {
        let tracker = ExecutionTracker::new();
        let handle = tracker.register("demo", ExecutionContext::new());
        let outcome = Err(Interrupt::Failed(StepFailure::new("build", "exit status 2")));
        let record = tracker.finalize(&handle, &outcome);
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("exit status 2"));
    }

    #[test]
    fn stop_marks_stopped_and_survives_finalize() {
        let tracker = ExecutionTracker::new();
        let handle = tracker.register("demo", ExecutionContext::new());
        let id = handle.id().to_string();

        assert!(tracker.stop(&id));
        assert!(handle.is_stop_requested());
        assert!(tracker.get_active().is_empty());
        let stopped_at = handle.snapshot().end_time;
        assert!(stopped_at.is_some());

        let record = tracker.finalize(&handle, &Ok(()));
        assert_eq!(record.status, ExecutionStatus::Stopped);
        assert_eq!(record.end_time, stopped_at);
        assert!(!tracker.stop(&id));
    }

    #[test]
    fn stop_unknown_id_returns_false() {
        let tracker = ExecutionTracker::new();
        assert!(!tracker.stop("nope"));
    }

    #[test]
    fn step_log_is_append_only() {
        let tracker = ExecutionTracker::new();
        let handle = tracker.register("demo", ExecutionContext::new());
        let first = handle.begin_step(StepExecution::pending("a", "first", StepType::Wait));
        let second = handle.begin_step(StepExecution::pending("b", "second", StepType::Wait));
        handle.update_step(first, |step| step.retry_count = 2);

        let snapshot = handle.snapshot();
        assert_eq!((first, second), (0, 1));
        assert_eq!(snapshot.steps[0].retry_count, 2);
        assert_eq!(snapshot.steps[1].name, "second");
    }
}

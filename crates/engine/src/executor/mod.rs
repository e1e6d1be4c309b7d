//! Step interpreter.
//!
//! Walks a step tree depth-first and left-to-right against one run's
//! [`ExecutionHandle`]. Every step the interpreter begins gets a [`StepExecution`]
//! appended to the run's log; its `onError` policy then decides whether a failure is
//! retried, recorded and skipped, or escalated to the enclosing sequence.

mod dispatch;
pub mod types;

use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use stepflow_types::{ExecutionContext, OnError, Step, StepExecution, StepStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use types::{Interrupt, StepFailure, StepOutcome};

use crate::collaborators::Collaborators;
use crate::workflow::tracker::ExecutionHandle;

/// Read-only view of the run shared by every step of one interpretation.
pub struct RunScope<'a> {
    pub handle: &'a ExecutionHandle,
    pub context: &'a ExecutionContext,
    pub workflow_name: &'a str,
}

/// Interprets step trees using injected collaborators for every side effect.
#[derive(Debug, Clone)]
pub struct StepInterpreter {
    collaborators: Collaborators,
}

impl StepInterpreter {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Runs `steps` as the root sequence of the run owned by `handle`.
    pub async fn run(&self, handle: &ExecutionHandle, steps: &[Step]) -> StepOutcome {
        let snapshot = handle.snapshot();
        let scope = RunScope {
            handle,
            context: &snapshot.context,
            workflow_name: &snapshot.workflow_name,
        };
        self.run_steps(&scope, steps).await
    }

    /// Runs siblings in declaration order, stopping at the first escalated interrupt.
    pub fn run_steps<'a>(&'a self, scope: &'a RunScope<'a>, steps: &'a [Step]) -> BoxFuture<'a, StepOutcome> {
        async move {
            for step in steps {
                self.run_step(scope, step).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Runs one step, applying its error policy.
    ///
    /// `Ok` means the caller may continue with the next sibling, which includes a failure
    /// recorded under `onError: continue`. Retries run in a bounded loop: at most
    /// `1 + maxRetries` attempts, after which the failure escalates as if the policy were
    /// `stop`.
    pub fn run_step<'a>(&'a self, scope: &'a RunScope<'a>, step: &'a Step) -> BoxFuture<'a, StepOutcome> {
        async move {
            let handle = scope.handle;
            if handle.is_stop_requested() {
                debug!(execution_id = %handle.id(), step = %step.display_name(), "stop requested; step skipped");
                return Err(Interrupt::Stopped);
            }

            let kind = step.kind.step_type();
            let index = handle.begin_step(StepExecution::pending(
                Uuid::new_v4().to_string(),
                step.display_name(),
                kind,
            ));
            handle.update_step(index, |record| record.status = StepStatus::Running);
            info!(execution_id = %handle.id(), step = %step.display_name(), kind = %kind, "step started");

            let mut retries = 0u32;
            loop {
                let failure = match self.dispatch(scope, step).await {
                    Ok(result) => {
                        handle.update_step(index, |record| complete(record, result));
                        debug!(execution_id = %handle.id(), step = %step.display_name(), "step completed");
                        return Ok(());
                    }
                    Err(Interrupt::Stopped) => {
                        handle.update_step(index, mark_stopped);
                        return Err(Interrupt::Stopped);
                    }
                    Err(Interrupt::Failed(failure)) => failure,
                };

                let is_container = step.children().is_some();
                let message = if is_container { failure.to_string() } else { failure.message.clone() };
                let result = if is_container { None } else { failure.result.clone() };

                match step.on_error {
                    OnError::Retry if retries < step.max_retries => {
                        retries += 1;
                        warn!(
                            execution_id = %handle.id(),
                            step = %step.display_name(),
                            attempt = retries,
                            max_retries = step.max_retries,
                            error = %message,
                            "step failed; retrying"
                        );
                        handle.update_step(index, |record| {
                            record.status = StepStatus::Retrying;
                            record.retry_count = retries;
                            record.error = Some(message);
                            record.result = result;
                        });
                        tokio::time::sleep(Duration::from_millis(step.retry_delay_ms)).await;
                        if handle.is_stop_requested() {
                            handle.update_step(index, mark_stopped);
                            return Err(Interrupt::Stopped);
                        }
                        handle.update_step(index, |record| record.status = StepStatus::Running);
                    }
                    OnError::Continue => {
                        warn!(
                            execution_id = %handle.id(),
                            step = %step.display_name(),
                            error = %message,
                            "step failed; continuing"
                        );
                        handle.update_step(index, |record| fail(record, message, result));
                        return Ok(());
                    }
                    OnError::Stop | OnError::Retry => {
                        warn!(
                            execution_id = %handle.id(),
                            step = %step.display_name(),
                            retries,
                            error = %message,
                            "step failed"
                        );
                        handle.update_step(index, |record| fail(record, message, result));
                        return Err(Interrupt::Failed(failure));
                    }
                }
            }
        }
        .boxed()
    }
}

fn complete(record: &mut StepExecution, result: Value) {
    record.status = StepStatus::Completed;
    record.result = Some(result);
    record.error = None;
    record.end_time = Some(chrono::Utc::now());
}

fn fail(record: &mut StepExecution, message: String, result: Option<Value>) {
    record.status = StepStatus::Failed;
    record.error = Some(message);
    if result.is_some() {
        record.result = result;
    }
    record.end_time = Some(chrono::Utc::now());
}

fn mark_stopped(record: &mut StepExecution) {
    record.status = StepStatus::Stopped;
    record.end_time = Some(chrono::Utc::now());
}

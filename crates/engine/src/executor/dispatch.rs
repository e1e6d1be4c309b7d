//! Per-kind step handlers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{Value, json};
use stepflow_types::{ExecutionContext, FileOperation, Step, StepKind};
use stepflow_util::http::{status_failure_message, truncate_for_summary};
use stepflow_util::redact_sensitive;
use tracing::debug;

use super::types::{Interrupt, StepFailure};
use super::{RunScope, StepInterpreter};
use crate::collaborators::{HttpRequest, Notification, ProcessOutput};
use crate::resolve::{render_optional, render_template, render_value, unresolved_placeholders};

const STDERR_PREVIEW_LEN: usize = 200;

type Dispatched = Result<Value, Interrupt>;

impl StepInterpreter {
    /// Executes one attempt of `step` and returns its result payload.
    pub(super) async fn dispatch<'a>(&'a self, scope: &'a RunScope<'a>, step: &'a Step) -> Dispatched {
        let name = step.display_name();
        let context = scope.context;
        match &step.kind {
            StepKind::Command { command, cwd } => {
                let rendered = render_template(command, context);
                log_unresolved(name, command, context);
                let cwd = render_optional(cwd.as_deref(), context).map(PathBuf::from);
                self.run_process(name, &rendered, cwd.as_deref(), context).await
            }
            StepKind::Script { path, args, cwd } => {
                let cwd = render_optional(cwd.as_deref(), context).map(PathBuf::from);
                let script = self.resolve_script_path(&render_template(path, context), cwd.as_deref());
                if !self.collaborators.files.exists(&script).await {
                    return Err(failed(name, format!("script not found: {}", script.display())));
                }
                // The shell runs inside `cwd` and searches PATH for bare names.
                let script = std::path::absolute(&script)
                    .map_err(|error| failed(name, format!("script path {}: {error}", script.display())))?;
                let mut command_line = quote_argument(&script.to_string_lossy());
                for arg in args {
                    command_line.push(' ');
                    command_line.push_str(&quote_argument(&render_template(arg, context)));
                }
                self.run_process(name, &command_line, cwd.as_deref(), context).await
            }
            StepKind::Condition { expression } => {
                let rendered = render_template(expression, context);
                match self.collaborators.evaluator.evaluate(&rendered, context) {
                    Ok(result) => Ok(json!({ "success": true, "result": result })),
                    Err(error) => Err(failed(name, format!("condition '{rendered}' could not be evaluated: {error:#}"))),
                }
            }
            StepKind::Parallel { steps } => {
                let outcomes = join_all(steps.iter().map(|child| self.run_step(scope, child))).await;
                let mut first_failure = None;
                let mut stopped = false;
                for outcome in outcomes {
                    match outcome {
                        Ok(()) => {}
                        Err(Interrupt::Failed(failure)) => {
                            first_failure.get_or_insert(failure);
                        }
                        Err(Interrupt::Stopped) => stopped = true,
                    }
                }
                if let Some(failure) = first_failure {
                    return Err(Interrupt::Failed(failure));
                }
                if stopped {
                    return Err(Interrupt::Stopped);
                }
                Ok(json!({ "success": true, "steps": steps.len() }))
            }
            StepKind::Sequential { steps } => {
                self.run_steps(scope, steps).await?;
                Ok(json!({ "success": true, "steps": steps.len() }))
            }
            StepKind::Wait { duration } => {
                tokio::time::sleep(Duration::from_millis(*duration)).await;
                Ok(json!({ "success": true, "waitedMs": duration }))
            }
            StepKind::Http {
                method,
                url,
                headers,
                body,
            } => {
                let request = HttpRequest {
                    method: render_template(method, context),
                    url: render_template(url, context),
                    headers: headers
                        .iter()
                        .map(|(key, value)| (key.clone(), render_template(value, context)))
                        .collect(),
                    body: body.as_ref().map(|body| render_value(body, context)),
                };
                log_unresolved(name, url, context);
                let target = format!("{} {}", request.method, request.url);
                let response = self
                    .collaborators
                    .http
                    .send(request)
                    .await
                    .map_err(|error| failed(name, format!("{target}: {error:#}")))?;
                let success = response.is_success();
                let result = json!({ "success": success, "status": response.status, "body": response.body });
                if success {
                    Ok(result)
                } else {
                    Err(Interrupt::Failed(
                        StepFailure::new(name, status_failure_message(response.status, &response.raw_body)).with_result(result),
                    ))
                }
            }
            StepKind::File {
                operation,
                path,
                destination,
                content,
            } => {
                let path = PathBuf::from(render_template(path, context));
                let destination = render_optional(destination.as_deref(), context).map(PathBuf::from);
                let content = render_optional(content.as_deref(), context);
                self.run_file_operation(*operation, &path, destination.as_deref(), content.as_deref())
                    .await
                    .map_err(|message| failed(name, message))
            }
            StepKind::Notification { message, title, level } => {
                let notification = Notification {
                    title: render_optional(title.as_deref(), context),
                    message: render_template(message, context),
                    level: *level,
                    workflow_name: scope.workflow_name.to_string(),
                    execution_id: scope.handle.id().to_string(),
                };
                self.collaborators
                    .notifier
                    .send(&notification)
                    .await
                    .map_err(|error| failed(name, format!("notification could not be sent: {error:#}")))?;
                Ok(json!({ "success": true, "delivered": "dispatched" }))
            }
        }
    }

    async fn run_process(&self, name: &str, command: &str, cwd: Option<&Path>, context: &ExecutionContext) -> Dispatched {
        debug!(step = %name, command = %redact_sensitive(command), "running process");
        let env: HashMap<String, String> = context
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let output = self
            .collaborators
            .process
            .run(command, cwd, &env)
            .await
            .map_err(|error| failed(name, format!("{error:#}")))?;
        let result = process_result(&output);
        if output.success() {
            return Ok(result);
        }
        Err(Interrupt::Failed(StepFailure::new(name, exit_failure_message(&output)).with_result(result)))
    }

    /// Relative paths resolve against the step `cwd`, then the configured scripts directory.
    fn resolve_script_path(&self, rendered: &str, cwd: Option<&Path>) -> PathBuf {
        let path = PathBuf::from(rendered);
        if path.is_absolute() {
            return path;
        }
        match (cwd, self.collaborators.scripts_dir.as_deref()) {
            (Some(base), _) | (None, Some(base)) => base.join(path),
            (None, None) => path,
        }
    }

    async fn run_file_operation(
        &self,
        operation: FileOperation,
        path: &Path,
        destination: Option<&Path>,
        content: Option<&str>,
    ) -> Result<Value, String> {
        let files = &self.collaborators.files;
        let display = path.display().to_string();
        let flatten = |error: anyhow::Error| format!("{error:#}");
        match operation {
            FileOperation::Read => {
                let content = files.read(path).await.map_err(flatten)?;
                Ok(json!({ "success": true, "path": display, "content": content }))
            }
            FileOperation::Write => {
                files.write(path, content.unwrap_or_default()).await.map_err(flatten)?;
                Ok(json!({ "success": true, "path": display }))
            }
            FileOperation::Append => {
                files.append(path, content.unwrap_or_default()).await.map_err(flatten)?;
                Ok(json!({ "success": true, "path": display }))
            }
            FileOperation::Delete => {
                let existed = files.delete(path).await.map_err(flatten)?;
                Ok(json!({ "success": true, "path": display, "existed": existed }))
            }
            FileOperation::Copy | FileOperation::Move => {
                let Some(destination) = destination else {
                    return Err(format!("file operation '{}' requires a destination", operation.as_str()));
                };
                if operation == FileOperation::Copy {
                    files.copy(path, destination).await.map_err(flatten)?;
                } else {
                    files.rename(path, destination).await.map_err(flatten)?;
                }
                Ok(json!({
                    "success": true,
                    "path": display,
                    "destination": destination.display().to_string()
                }))
            }
        }
    }
}

fn failed(step: &str, message: impl Into<String>) -> Interrupt {
    Interrupt::Failed(StepFailure::new(step, message))
}

fn process_result(output: &ProcessOutput) -> Value {
    json!({
        "success": output.success(),
        "exitCode": output.exit_code,
        "stdout": output.stdout,
        "stderr": output.stderr,
    })
}

fn exit_failure_message(output: &ProcessOutput) -> String {
    let stderr = truncate_for_summary(&output.stderr, STDERR_PREVIEW_LEN);
    if stderr.is_empty() {
        format!("process exited with status {}", output.exit_code)
    } else {
        format!("process exited with status {}: {stderr}", output.exit_code)
    }
}

fn log_unresolved(step: &str, template: &str, context: &ExecutionContext) {
    let unresolved = unresolved_placeholders(template, context);
    if !unresolved.is_empty() {
        debug!(step = %step, unresolved = %unresolved.join(", "), "placeholders left unresolved");
    }
}

/// Quotes one shell argument for the platform shell.
fn quote_argument(argument: &str) -> String {
    if cfg!(windows) {
        return format!("\"{}\"", argument.replace('"', "\\\""));
    }
    if !argument.is_empty()
        && argument
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || "-_./=:,+@%".contains(character))
    {
        return argument.to_string();
    }
    format!("'{}'", argument.replace('\'', r"'\''"))
}

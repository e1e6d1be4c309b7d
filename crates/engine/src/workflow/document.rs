//! Workflow document validation.
//!
//! Authored workflows arrive as loosely typed JSON (or YAML converted to JSON). This module
//! checks the raw document first so errors can point at the offending step, then decodes it
//! into a [`WorkflowDefinition`] and applies the structural rules serde cannot express.

use serde_json::Value;
use stepflow_types::{Step, StepKind, StepType, WorkflowDefinition};
use stepflow_util::validate_document_name;

use crate::condition::validate_expression;
use crate::error::{Result, WorkflowError};
use crate::resolve::has_placeholders;

/// Validates `document` and builds the definition stored under `name`.
///
/// Accepts either `{ "steps": [...] }` (optionally with `description`) or a bare array of
/// steps.
pub fn definition_from_document(name: &str, document: &Value) -> Result<WorkflowDefinition> {
    let name = name.trim();
    validate_document_name(name).map_err(|message| invalid(format!("workflow name: {message}")))?;

    let (raw_steps, description) = match document {
        Value::Array(steps) => (steps, None),
        Value::Object(map) => {
            let steps = map
                .get("steps")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("workflow document must contain a 'steps' array"))?;
            let description = map.get("description").and_then(Value::as_str).map(str::to_string);
            (steps, description)
        }
        _ => {
            return Err(invalid(
                "workflow document must be an object with a 'steps' array or an array of steps",
            ));
        }
    };

    if raw_steps.is_empty() {
        return Err(invalid(format!("workflow '{name}' must declare at least one step")));
    }
    check_raw_steps(raw_steps, "steps")?;

    let steps: Vec<Step> = serde_json::from_value(Value::Array(raw_steps.clone()))
        .map_err(|error| invalid(format!("workflow '{name}': {error}")))?;
    check_steps(&steps, "steps")?;

    Ok(WorkflowDefinition {
        name: name.to_string(),
        description,
        steps,
    })
}

fn invalid(message: impl Into<String>) -> WorkflowError {
    WorkflowError::Validation(message.into())
}

fn check_raw_steps(steps: &[Value], path: &str) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        let location = format!("{path}[{index}]");
        let Value::Object(fields) = step else {
            return Err(invalid(format!("{location}: step must be an object")));
        };
        let kind = match fields.get("kind") {
            Some(Value::String(kind)) => kind.as_str(),
            Some(_) => return Err(invalid(format!("{location}: 'kind' must be a string"))),
            None => return Err(invalid(format!("{location}: missing 'kind'"))),
        };
        let Some(step_type) = StepType::parse(kind) else {
            return Err(invalid(format!("{location}: unknown step kind '{kind}'")));
        };

        if matches!(step_type, StepType::Parallel | StepType::Sequential) {
            match fields.get("steps").and_then(Value::as_array) {
                Some(children) if !children.is_empty() => check_raw_steps(children, &format!("{location}.steps"))?,
                _ => return Err(invalid(format!("{location}: '{kind}' step must contain at least one child step"))),
            }
        }
    }
    Ok(())
}

fn check_steps(steps: &[Step], path: &str) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        let location = format!("{path}[{index}]");
        match &step.kind {
            StepKind::File {
                operation, destination, ..
            } if operation.requires_destination() => {
                if destination.as_deref().is_none_or(|destination| destination.trim().is_empty()) {
                    return Err(invalid(format!(
                        "{location}: file operation '{}' requires a destination",
                        operation.as_str()
                    )));
                }
            }
            StepKind::Condition { expression } if !has_placeholders(expression) => {
                validate_expression(expression)
                    .map_err(|error| invalid(format!("{location}: invalid condition expression: {error}")))?;
            }
            StepKind::Command { command, .. } if command.trim().is_empty() => {
                return Err(invalid(format!("{location}: command cannot be empty")));
            }
            StepKind::Http { url, .. } if url.trim().is_empty() => {
                return Err(invalid(format!("{location}: http step requires a url")));
            }
            StepKind::Parallel { steps } | StepKind::Sequential { steps } => {
                check_steps(steps, &format!("{location}.steps"))?;
            }
            _ => {}
        }
    }
    Ok(())
}

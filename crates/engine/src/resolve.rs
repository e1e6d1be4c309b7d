//! # Template Substitution
//!
//! Step payloads may reference context variables with `{{identifier}}` tokens. Rendering
//! replaces each token whose identifier exists in the [`ExecutionContext`] and leaves every
//! other token verbatim, so a missing variable never fails a step by itself.
//!
//! ```rust
//! use stepflow_engine::resolve::render_template;
//! use stepflow_types::ExecutionContext;
//!
//! let context: ExecutionContext = [("name", "x")].into_iter().collect();
//! assert_eq!(render_template("hi {{name}}", &context), "hi x");
//! assert_eq!(render_template("{{missing}}", &context), "{{missing}}");
//! ```

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use stepflow_types::ExecutionContext;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern compiles"));

/// Replaces `{{identifier}}` tokens with context values; unknown identifiers pass through.
pub fn render_template(input: &str, context: &ExecutionContext) -> String {
    if !input.contains("{{") {
        return input.to_string();
    }
    PLACEHOLDER
        .replace_all(input, |captures: &Captures| match context.get(&captures[1]) {
            Some(value) => value.to_string(),
            None => captures[0].to_string(),
        })
        .into_owned()
}

/// Renders an optional template.
pub fn render_optional(input: Option<&str>, context: &ExecutionContext) -> Option<String> {
    input.map(|text| render_template(text, context))
}

/// Recursively renders every string (keys excluded) inside a JSON value.
pub fn render_value(value: &Value, context: &ExecutionContext) -> Value {
    match value {
        Value::String(text) => Value::String(render_template(text, context)),
        Value::Array(items) => Value::Array(items.iter().map(|item| render_value(item, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render_value(value, context)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Identifiers referenced by `input` that the context cannot resolve.
pub fn unresolved_placeholders(input: &str, context: &ExecutionContext) -> Vec<String> {
    let mut unresolved: Vec<String> = PLACEHOLDER
        .captures_iter(input)
        .map(|captures| captures[1].to_string())
        .filter(|identifier| !context.contains_key(identifier))
        .collect();
    unresolved.dedup();
    unresolved
}

/// Whether `input` contains at least one placeholder token.
pub fn has_placeholders(input: &str) -> bool {
    PLACEHOLDER.is_match(input)
}

//! # HTTP Utilities
//!
//! Helpers for shaping HTTP requests and responses produced by `http` steps: method
//! parsing, body decoding, and short failure summaries suitable for step error messages.

use reqwest::Method;
use serde_json::Value;

/// Maximum number of characters of a response body quoted in a failure message.
pub const FAILURE_BODY_PREVIEW_LEN: usize = 200;

/// Parse an HTTP method name, case-insensitively.
///
/// # Example
/// ```rust
/// use stepflow_util::http::parse_method;
///
/// assert_eq!(parse_method("post").unwrap(), reqwest::Method::POST);
/// assert!(parse_method("").is_err());
/// ```
pub fn parse_method(raw: &str) -> Result<Method, String> {
    let normalized = raw.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err("HTTP method cannot be empty".to_string());
    }
    Method::from_bytes(normalized.as_bytes()).map_err(|error| format!("invalid HTTP method '{raw}': {error}"))
}

/// Decode a response body: JSON when it parses, the raw text otherwise.
///
/// # Example
/// ```rust
/// use stepflow_util::http::parse_response_body;
/// use serde_json::json;
///
/// assert_eq!(parse_response_body(r#"{"ok": true}"#), json!({"ok": true}));
/// assert_eq!(parse_response_body("plain"), json!("plain"));
/// assert_eq!(parse_response_body(""), serde_json::Value::Null);
/// ```
pub fn parse_response_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Build the message recorded when a request returns a non-success status.
pub fn status_failure_message(status: u16, body: &str) -> String {
    let preview = truncate_for_summary(body, FAILURE_BODY_PREVIEW_LEN);
    if preview.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {preview}")
    }
}

/// Truncate text to `max_len` characters, appending an ellipsis when shortened.
pub fn truncate_for_summary(text: &str, max_len: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }

    // Reserve space for the trailing ellipsis ("...").
    let target_len = max_len.saturating_sub(3);
    let truncated: String = trimmed.chars().take(target_len).collect();
    format!("{}...", truncated.trim_end())
}

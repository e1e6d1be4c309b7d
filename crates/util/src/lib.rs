//! Shared helpers for Stepflow: configuration, JSON document persistence, path handling,
//! HTTP response shaping, and log redaction.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod config;
pub mod document_store;
pub mod http;
pub mod path_processing;

pub use config::{CONFIG_PATH_ENV, ConfigError, DATA_DIR_ENV, ExecutorConfig};
pub use document_store::{DocumentStore, DocumentStoreError, InMemoryDocumentStore, JsonFileDocumentStore};
pub use path_processing::{expand_tilde, validate_document_name};

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization:\s*)((?:bearer|basic|token)\s+)?([\w\-\.=:/+]+)",
        r"(?i)(bearer )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
        r"(?i)(DATABASE_URL=)([^\s]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
///
/// Used before commands, URLs, and headers are written to logs.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::redact_sensitive;

    #[test]
    fn redacts_tokens_in_commands() {
        let redacted = redact_sensitive("API_TOKEN=abc123 curl -H 'Authorization: Bearer xyz' https://example.com");
        assert!(redacted.contains("API_TOKEN=<redacted>"), "got: {redacted}");
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("xyz"));
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(redact_sensitive("echo hello"), "echo hello");
    }
}

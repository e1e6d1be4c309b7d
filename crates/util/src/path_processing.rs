use std::path::PathBuf;

use dirs_next::home_dir;

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Checks that a document name maps onto a single file inside its store directory.
///
/// Names may contain ASCII letters, digits, `-`, `_`, and `.`, and may not start with `.`.
pub fn validate_document_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name.starts_with('.') {
        return Err(format!("name '{name}' cannot start with '.'"));
    }
    if let Some(invalid) = name
        .chars()
        .find(|character| !(character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.')))
    {
        return Err(format!("name '{name}' contains unsupported character '{invalid}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_home_prefix() {
        let expanded = expand_tilde("~/stepflow");
        assert!(expanded.ends_with("stepflow"));
        assert_ne!(expanded, PathBuf::from("~/stepflow"));
        assert_eq!(expand_tilde("/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn document_names_cannot_escape_directory() {
        assert!(validate_document_name("deploy-app_v2.1").is_ok());
        assert!(validate_document_name("").is_err());
        assert!(validate_document_name("..").is_err());
        assert!(validate_document_name("../etc/passwd").is_err());
        assert!(validate_document_name("a/b").is_err());
        assert!(validate_document_name("with space").is_err());
    }
}

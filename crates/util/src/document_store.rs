//! Named JSON document persistence.
//!
//! Workflow definitions and execution snapshots are stored one document per file inside a
//! directory (`<dir>/<name>.json`). Reads always hit the disk so callers never observe
//! stale data written by another process; writes go through a temporary file and a rename
//! so concurrent readers never see a half-written document.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::path_processing::validate_document_name;

const DOCUMENT_EXTENSION: &str = "json";

/// Errors surfaced by document store operations.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// I/O failure while reading or writing a document.
    #[error("document I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Serialization or deserialization failure.
    #[error("document serialization error in '{name}': {source}")]
    Serialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    /// Name that cannot be mapped onto a document file.
    #[error("invalid document name: {0}")]
    InvalidName(String),
}

/// Shared trait implemented by document persistence backends.
pub trait DocumentStore: Send + Sync {
    /// Load the document stored under `name`, if any.
    fn load(&self, name: &str) -> Result<Option<Value>, DocumentStoreError>;

    /// Create or overwrite the document stored under `name`.
    fn save(&self, name: &str, document: &Value) -> Result<(), DocumentStoreError>;

    /// Names of all stored documents, sorted.
    fn list(&self) -> Result<Vec<String>, DocumentStoreError>;

    /// Remove a document. Returns `true` when one existed.
    fn delete(&self, name: &str) -> Result<bool, DocumentStoreError>;
}

/// Directory-backed store writing one pretty-printed JSON file per document.
#[derive(Debug, Clone)]
pub struct JsonFileDocumentStore {
    directory: PathBuf,
}

impl JsonFileDocumentStore {
    /// Create a store rooted at `directory`. The directory is created lazily on first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn document_path(&self, name: &str) -> Result<PathBuf, DocumentStoreError> {
        validate_document_name(name).map_err(DocumentStoreError::InvalidName)?;
        Ok(self.directory.join(format!("{name}.{DOCUMENT_EXTENSION}")))
    }
}

impl DocumentStore for JsonFileDocumentStore {
    fn load(&self, name: &str) -> Result<Option<Value>, DocumentStoreError> {
        let path = self.document_path(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(DocumentStoreError::Io { path, source }),
        };
        let document = serde_json::from_str(&content).map_err(|source| DocumentStoreError::Serialization {
            name: name.to_string(),
            source,
        })?;
        Ok(Some(document))
    }

    fn save(&self, name: &str, document: &Value) -> Result<(), DocumentStoreError> {
        let path = self.document_path(name)?;
        fs::create_dir_all(&self.directory).map_err(|source| DocumentStoreError::Io {
            path: self.directory.clone(),
            source,
        })?;
        let content = serde_json::to_string_pretty(document).map_err(|source| DocumentStoreError::Serialization {
            name: name.to_string(),
            source,
        })?;

        let staging_path = path.with_extension(format!("{DOCUMENT_EXTENSION}.tmp"));
        fs::write(&staging_path, content).map_err(|source| DocumentStoreError::Io {
            path: staging_path.clone(),
            source,
        })?;
        fs::rename(&staging_path, &path).map_err(|source| DocumentStoreError::Io { path: path.clone(), source })?;
        debug!(document = %name, path = %path.display(), "document saved");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, DocumentStoreError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(DocumentStoreError::Io {
                    path: self.directory.clone(),
                    source,
                });
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DocumentStoreError::Io {
                path: self.directory.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|extension| extension.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
                && validate_document_name(stem).is_ok()
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<bool, DocumentStoreError> {
        let path = self.document_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(DocumentStoreError::Io { path, source }),
        }
    }
}

/// In-memory document store primarily used for unit testing.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<BTreeMap<String, Value>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn load(&self, name: &str) -> Result<Option<Value>, DocumentStoreError> {
        let documents = self.documents.lock().expect("document lock poisoned");
        Ok(documents.get(name).cloned())
    }

    fn save(&self, name: &str, document: &Value) -> Result<(), DocumentStoreError> {
        validate_document_name(name).map_err(DocumentStoreError::InvalidName)?;
        let mut documents = self.documents.lock().expect("document lock poisoned");
        documents.insert(name.to_string(), document.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, DocumentStoreError> {
        let documents = self.documents.lock().expect("document lock poisoned");
        Ok(documents.keys().cloned().collect())
    }

    fn delete(&self, name: &str) -> Result<bool, DocumentStoreError> {
        let mut documents = self.documents.lock().expect("document lock poisoned");
        Ok(documents.remove(name).is_some())
    }
}

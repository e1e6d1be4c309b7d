//! Executor configuration.
//!
//! Settings are read from a small JSON file (`~/.config/stepflow/config.json` on most
//! platforms, or the path named by `STEPFLOW_CONFIG_PATH`). Every field is optional; a
//! missing file yields the defaults. `STEPFLOW_DATA_DIR` overrides the data directory
//! regardless of what the file says.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dirs_next::{config_dir, data_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::path_processing::expand_tilde;

/// Environment variable allowing callers to override the configuration file path.
pub const CONFIG_PATH_ENV: &str = "STEPFLOW_CONFIG_PATH";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "STEPFLOW_DATA_DIR";

/// Default filename for the configuration payload.
pub const CONFIG_FILE_NAME: &str = "config.json";

const APPLICATION_DIRECTORY: &str = "stepflow";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Error surfaced when reading the configuration fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure (for example, permissions).
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file exists but is not valid configuration JSON.
    #[error("config parse error at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Runtime settings for the executor and its default collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Root directory for workflow definitions and execution snapshots.
    pub data_dir: PathBuf,
    /// Shell program used to run `command` and `script` steps. Platform default when unset.
    pub shell: Option<String>,
    /// Base directory for relative `script` paths. The working directory when unset.
    pub scripts_dir: Option<PathBuf>,
    /// Request timeout applied by the default HTTP client.
    pub http_timeout_secs: u64,
    /// When set, notifications are POSTed as JSON to this URL instead of only being logged.
    pub notification_webhook: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            shell: None,
            scripts_dir: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            notification_webhook: None,
        }
    }
}

impl ExecutorConfig {
    /// Load the configuration from the default location and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&default_config_path())
    }

    /// Load the configuration from an explicit file path and apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<ExecutorConfig>(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file found; using defaults");
                ExecutorConfig::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if let Ok(data_dir) = env::var(DATA_DIR_ENV)
            && !data_dir.trim().is_empty()
        {
            config.data_dir = PathBuf::from(data_dir);
        }

        config.data_dir = expand_tilde(&config.data_dir.to_string_lossy());
        config.scripts_dir = config
            .scripts_dir
            .as_ref()
            .map(|scripts_dir| expand_tilde(&scripts_dir.to_string_lossy()));
        Ok(config)
    }

    /// Directory holding workflow definition documents.
    pub fn workflows_dir(&self) -> PathBuf {
        self.data_dir.join("workflows")
    }

    /// Directory holding execution snapshot documents.
    pub fn executions_dir(&self) -> PathBuf {
        self.data_dir.join("executions")
    }
}

/// Resolve the configuration file path, honoring `STEPFLOW_CONFIG_PATH`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APPLICATION_DIRECTORY)
        .join(CONFIG_FILE_NAME)
}

fn default_data_dir() -> PathBuf {
    data_dir().unwrap_or_else(|| PathBuf::from(".")).join(APPLICATION_DIRECTORY)
}

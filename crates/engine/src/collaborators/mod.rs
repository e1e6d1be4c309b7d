//! Side-effect seams used by the step interpreter.
//!
//! Every effect a step can have on the outside world goes through one of these traits so
//! the interpreter can be driven by scripted doubles in tests. The default implementations
//! live in the submodules and are assembled by [`Collaborators::from_config`].

pub mod filesystem;
pub mod http;
pub mod notification;
pub mod process;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use stepflow_types::{ExecutionContext, NotificationLevel};
use stepflow_util::ExecutorConfig;

pub use filesystem::LocalFileSystem;
pub use http::ReqwestHttpClient;
pub use notification::{TracingNotificationSink, WebhookNotificationSink};
pub use process::ShellProcessInvoker;

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell command lines.
#[async_trait]
pub trait ProcessInvoker: Send + Sync {
    /// Run `command` through the shell, waiting for it to exit.
    ///
    /// A non-zero exit is reported through [`ProcessOutput::exit_code`]; `Err` is reserved for
    /// failures to start the process at all.
    async fn run(&self, command: &str, cwd: Option<&Path>, env: &HashMap<String, String>) -> Result<ProcessOutput>;
}

/// File operations available to `file` steps.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &Path) -> Result<String>;
    async fn write(&self, path: &Path, content: &str) -> Result<()>;
    async fn append(&self, path: &Path, content: &str) -> Result<()>;
    /// Removes a file. Returns whether it existed; a missing file is not an error.
    async fn delete(&self, path: &Path) -> Result<bool>;
    async fn copy(&self, source: &Path, destination: &Path) -> Result<()>;
    async fn rename(&self, source: &Path, destination: &Path) -> Result<()>;
    async fn exists(&self, path: &Path) -> bool;
}

/// A fully rendered outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Response returned by an [`HttpClient`]; the body is decoded JSON or raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
    /// Undecoded body text, used for failure messages.
    pub raw_body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP for `http` steps.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends the request. Transport errors are `Err`; any received status is `Ok`.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Evaluates `condition` step expressions against the current context.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &ExecutionContext) -> Result<bool>;
}

/// Evaluator backed by the built-in constrained grammar in [`crate::condition`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionEvaluator;

impl ExpressionEvaluator for ConditionEvaluator {
    fn evaluate(&self, expression: &str, context: &ExecutionContext) -> Result<bool> {
        crate::condition::evaluate_condition(expression, context)
    }
}

/// Rendered notification handed to a [`NotificationSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: Option<String>,
    pub message: String,
    pub level: NotificationLevel,
    pub workflow_name: String,
    pub execution_id: String,
}

/// Delivery channel for `notification` steps.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// The full set of collaborators injected into the interpreter.
#[derive(Clone)]
pub struct Collaborators {
    pub process: Arc<dyn ProcessInvoker>,
    pub files: Arc<dyn FileSystem>,
    pub http: Arc<dyn HttpClient>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub notifier: Arc<dyn NotificationSink>,
    /// Base directory for relative script paths.
    pub scripts_dir: Option<std::path::PathBuf>,
}

impl Collaborators {
    /// Builds the production collaborators described by `config`.
    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        let http = Arc::new(ReqwestHttpClient::new(config.http_timeout_secs)?);
        let notifier: Arc<dyn NotificationSink> = match config.notification_webhook.as_deref() {
            Some(url) if !url.trim().is_empty() => Arc::new(WebhookNotificationSink::new(url, http.clone())),
            _ => Arc::new(TracingNotificationSink),
        };

        Ok(Self {
            process: Arc::new(ShellProcessInvoker::new(config.shell.clone())),
            files: Arc::new(LocalFileSystem),
            http,
            evaluator: Arc::new(ConditionEvaluator),
            notifier,
            scripts_dir: config.scripts_dir.clone(),
        })
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("scripts_dir", &self.scripts_dir)
            .finish_non_exhaustive()
    }
}

//! Shell-backed [`ProcessInvoker`].

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use stepflow_util::redact_sensitive;
use tokio::process::Command;
use tracing::debug;

use super::{ProcessInvoker, ProcessOutput};

/// Runs command lines through `sh -c` (or `cmd /C` on Windows) unless a shell is configured.
#[derive(Debug, Clone, Default)]
pub struct ShellProcessInvoker {
    shell: Option<String>,
}

impl ShellProcessInvoker {
    pub fn new(shell: Option<String>) -> Self {
        Self { shell }
    }

    fn shell_invocation(&self) -> (String, &'static str) {
        if let Some(shell) = self.shell.as_deref().filter(|shell| !shell.trim().is_empty()) {
            let flag = if shell.to_ascii_lowercase().ends_with("cmd") || shell.to_ascii_lowercase().ends_with("cmd.exe") {
                "/C"
            } else {
                "-c"
            };
            return (shell.to_string(), flag);
        }
        if cfg!(windows) {
            ("cmd".to_string(), "/C")
        } else {
            ("sh".to_string(), "-c")
        }
    }
}

#[async_trait]
impl ProcessInvoker for ShellProcessInvoker {
    async fn run(&self, command: &str, cwd: Option<&Path>, env: &HashMap<String, String>) -> Result<ProcessOutput> {
        let (shell, flag) = self.shell_invocation();
        let mut process = Command::new(&shell);
        process
            .arg(flag)
            .arg(command)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(directory) = cwd {
            process.current_dir(directory);
        }

        debug!(shell = %shell, command = %redact_sensitive(command), "spawning process");
        let output = process
            .output()
            .await
            .with_context(|| format!("failed to start '{shell}'"))?;

        Ok(ProcessOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

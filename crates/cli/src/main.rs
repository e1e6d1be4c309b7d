use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::Value;
use stepflow_engine::{Orchestrator, WorkflowError, parse_workflow_file};
use stepflow_types::{ExecutionContext, ExecutionStatus, WorkflowExecution};
use stepflow_util::ExecutorConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Interval at which a running `execute` checks whether another process stopped it.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(name = "stepflow", version, about = "Define and execute step-based workflows")]
struct Cli {
    /// Directory holding workflow definitions and execution snapshots.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Emit debug logs on stderr (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a workflow from a YAML or JSON file.
    Define { name: String, file: PathBuf },
    /// Run a stored workflow with an optional JSON object as context.
    Execute {
        name: String,
        #[arg(value_name = "CONTEXT_JSON")]
        context: Option<String>,
    },
    /// List stored workflows.
    List,
    /// Stop a running execution.
    Stop { execution_id: String },
    /// Show running executions.
    Status,
    /// Print the stored record of an execution as JSON.
    Show { execution_id: String },
    /// Delete a stored workflow.
    Delete { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ExecutorConfig::load()?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    match cli.command {
        Command::Define { name, file } => {
            let document = parse_workflow_file(&file)?;
            let definition = orchestrator.define(&name, &document)?;
            println!("defined workflow '{}' ({} steps)", definition.name, definition.step_count());
            Ok(ExitCode::SUCCESS)
        }
        Command::Execute { name, context } => execute(orchestrator, &name, context.as_deref()).await,
        Command::List => {
            let definitions = orchestrator.list()?;
            if definitions.is_empty() {
                println!("no workflows defined");
            }
            for definition in definitions {
                let description = definition.description.as_deref().unwrap_or("");
                println!("{}\t{} steps\t{}", definition.name, definition.step_count(), description);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop { execution_id } => {
            if orchestrator.request_stop(&execution_id)? {
                println!("stop requested for execution {execution_id}");
                Ok(ExitCode::SUCCESS)
            } else {
                let status = orchestrator.store().load_execution(&execution_id)?.status;
                eprintln!("execution {execution_id} is not running (status: {status})");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Status => {
            let running: Vec<WorkflowExecution> = orchestrator
                .store()
                .list_executions()?
                .into_iter()
                .filter(|execution| execution.status == ExecutionStatus::Running)
                .collect();
            if running.is_empty() {
                println!("no running executions");
            }
            for execution in running {
                println!("{}", status_line(&execution));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { execution_id } => {
            let execution = orchestrator.store().load_execution(&execution_id)?;
            println!("{}", serde_json::to_string_pretty(&execution)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { name } => {
            if orchestrator.delete(&name)? {
                println!("deleted workflow '{name}'");
                Ok(ExitCode::SUCCESS)
            } else {
                Err(WorkflowError::workflow_not_found(name).into())
            }
        }
    }
}

async fn execute(orchestrator: Arc<Orchestrator>, name: &str, raw_context: Option<&str>) -> Result<ExitCode> {
    let context = parse_context(raw_context)?;
    let prepared = orchestrator.prepare(name, context)?;
    let execution_id = prepared.handle.id().to_string();
    println!("execution {execution_id} started");

    let watcher = {
        let orchestrator = orchestrator.clone();
        let execution_id = execution_id.clone();
        tokio::spawn(async move { orchestrator.watch_persisted_stop(&execution_id, STOP_POLL_INTERVAL).await })
    };
    let outcome = orchestrator.run_prepared(prepared).await;
    watcher.abort();

    match outcome {
        Ok(record) => {
            print_summary(&record);
            if record.status == ExecutionStatus::Completed {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Err(WorkflowError::ExecutionFailed(record)) => {
            print_summary(&record);
            match record.failing_step() {
                Some(step) => eprintln!(
                    "step '{}' failed: {}",
                    step.name,
                    step.error.as_deref().unwrap_or("unknown error")
                ),
                None => eprintln!("error: {}", record.error.as_deref().unwrap_or("unknown error")),
            }
            Ok(ExitCode::FAILURE)
        }
        Err(error) => Err(error.into()),
    }
}

fn parse_context(raw: Option<&str>) -> Result<ExecutionContext> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(ExecutionContext::new());
    };
    let value: Value = serde_json::from_str(raw).context("context must be valid JSON")?;
    ExecutionContext::from_json(&value).map_err(|message| anyhow!(message))
}

/// One `status` row. Running snapshots are persisted at start only, so no step progress is shown.
fn status_line(execution: &WorkflowExecution) -> String {
    format!(
        "{}\t{}\tstarted {}",
        execution.id,
        execution.workflow_name,
        execution.start_time.to_rfc3339()
    )
}

fn print_summary(record: &WorkflowExecution) {
    println!("execution {} {}", record.id, record.status);
    for step in &record.steps {
        let duration = step
            .duration_ms()
            .map(|duration| format!("{duration}ms"))
            .unwrap_or_else(|| "-".to_string());
        let retries = if step.retry_count > 0 {
            format!(" ({} retries)", step.retry_count)
        } else {
            String::new()
        };
        println!("  {:<24} {:<10} {:>8}{}", step.name, step.status, duration, retries);
    }
}

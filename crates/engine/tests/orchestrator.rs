use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use stepflow_engine::collaborators::{
    ConditionEvaluator, HttpClient, HttpRequest, HttpResponse, LocalFileSystem, Notification, NotificationSink,
    ProcessInvoker, ProcessOutput, ReqwestHttpClient,
};
use stepflow_engine::{Collaborators, Orchestrator, WorkflowError, WorkflowStore};
use stepflow_types::{ExecutionContext, ExecutionStatus, StepStatus, StepType, WorkflowExecution};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Process double: `fail` exits 1, `sleep-fail <ms>` sleeps then exits 1, anything else
/// echoes the command line back on stdout.
#[derive(Default)]
struct ScriptedProcess {
    invocations: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl ScriptedProcess {
    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessInvoker for ScriptedProcess {
    async fn run(&self, command: &str, _cwd: Option<&Path>, _env: &HashMap<String, String>) -> Result<ProcessOutput> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().push(command.to_string());

        if let Some(delay) = command.strip_prefix("sleep-fail ") {
            tokio::time::sleep(Duration::from_millis(delay.trim().parse().unwrap_or(0))).await;
            return Ok(ProcessOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "slow failure".into(),
            });
        }
        if command == "fail" {
            return Ok(ProcessOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "always fails".into(),
            });
        }
        Ok(ProcessOutput {
            exit_code: 0,
            stdout: format!("{}\n", command.trim_start_matches("echo ")),
            stderr: String::new(),
        })
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<Notification>>);

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.0.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Fixture {
    orchestrator: Arc<Orchestrator>,
    process: Arc<ScriptedProcess>,
    sink: Arc<RecordingSink>,
}

fn fixture_with_http(http: Arc<dyn HttpClient>) -> Fixture {
    let process = Arc::new(ScriptedProcess::default());
    let sink = Arc::new(RecordingSink::default());
    let collaborators = Collaborators {
        process: process.clone(),
        files: Arc::new(LocalFileSystem),
        http,
        evaluator: Arc::new(ConditionEvaluator),
        notifier: sink.clone(),
        scripts_dir: None,
    };
    Fixture {
        orchestrator: Arc::new(Orchestrator::new(WorkflowStore::in_memory(), collaborators)),
        process,
        sink,
    }
}

fn fixture() -> Fixture {
    fixture_with_http(Arc::new(ReqwestHttpClient::new(5).expect("http client")))
}

fn context(pairs: &[(&str, &str)]) -> ExecutionContext {
    pairs.iter().copied().collect()
}

fn failed_record(error: WorkflowError) -> WorkflowExecution {
    match error {
        WorkflowError::ExecutionFailed(record) => *record,
        other => panic!("expected a failed execution, got {other}"),
    }
}

fn statuses(record: &WorkflowExecution) -> Vec<(&str, StepStatus)> {
    record.steps.iter().map(|step| (step.name.as_str(), step.status)).collect()
}

#[tokio::test]
async fn sequential_steps_run_in_declaration_order() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "ordered",
            &json!([
                { "name": "one", "kind": "command", "command": "echo 1" },
                { "name": "two", "kind": "wait", "duration": 5 },
                { "name": "three", "kind": "command", "command": "echo 3" },
                { "name": "four", "kind": "condition", "expression": "1 < 2" }
            ]),
        )
        .unwrap();

    let record = fixture.orchestrator.start("ordered", ExecutionContext::new()).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let names: Vec<_> = record.steps.iter().map(|step| step.name.as_str()).collect();
    assert_eq!(names, ["one", "two", "three", "four"]);
    for pair in record.steps.windows(2) {
        assert!(pair[0].start_time <= pair[1].start_time);
        assert!(pair[0].end_time.unwrap() <= pair[1].start_time);
    }
    assert!(record.end_time.is_some());
}

#[tokio::test]
async fn stop_policy_aborts_remaining_steps() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "halting",
            &json!([
                { "name": "A", "kind": "command", "command": "fail" },
                { "name": "B", "kind": "command", "command": "echo never" }
            ]),
        )
        .unwrap();

    let error = fixture.orchestrator.start("halting", ExecutionContext::new()).await.unwrap_err();
    let record = failed_record(error);

    assert_eq!(statuses(&record), [("A", StepStatus::Failed)]);
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("process exited with status 1: always fails"));
    assert_eq!(fixture.process.invocations(), 1);
}

#[tokio::test]
async fn continue_policy_records_failure_and_proceeds() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "lenient",
            &json!([
                { "name": "A", "kind": "command", "command": "fail", "onError": "continue" },
                { "name": "B", "kind": "command", "command": "echo ok" }
            ]),
        )
        .unwrap();

    let record = fixture.orchestrator.start("lenient", ExecutionContext::new()).await.unwrap();

    assert_eq!(statuses(&record), [("A", StepStatus::Failed), ("B", StepStatus::Completed)]);
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.error.is_none());
    assert!(record.steps[0].error.is_some());
}

#[tokio::test]
async fn retry_exhaustion_attempts_three_times_then_fails() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "flaky",
            &json!([
                { "name": "A", "kind": "command", "command": "fail", "onError": "retry", "maxRetries": 2, "retryDelayMs": 1 },
                { "name": "B", "kind": "command", "command": "echo never" }
            ]),
        )
        .unwrap();

    let error = fixture.orchestrator.start("flaky", ExecutionContext::new()).await.unwrap_err();
    let record = failed_record(error);

    assert_eq!(fixture.process.invocations(), 3);
    assert_eq!(statuses(&record), [("A", StepStatus::Failed)]);
    assert_eq!(record.steps[0].retry_count, 2);
}

#[tokio::test]
async fn templates_render_known_keys_and_keep_missing_ones() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "templated",
            &json!([{ "kind": "command", "command": "echo {{name}} {{missing}}" }]),
        )
        .unwrap();

    let record = fixture
        .orchestrator
        .start("templated", context(&[("name", "x")]))
        .await
        .unwrap();

    assert_eq!(fixture.process.commands.lock().unwrap()[0], "echo x {{missing}}");
    assert_eq!(record.steps[0].result.as_ref().unwrap()["stdout"], "x {{missing}}\n");
}

#[tokio::test]
async fn parallel_waits_for_every_child_before_failing() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "fan-out",
            &json!([{
                "name": "both",
                "kind": "parallel",
                "steps": [
                    { "name": "slow", "kind": "wait", "duration": 100 },
                    { "name": "fast-fail", "kind": "command", "command": "sleep-fail 10" }
                ]
            }]),
        )
        .unwrap();

    let started = Instant::now();
    let error = fixture.orchestrator.start("fan-out", ExecutionContext::new()).await.unwrap_err();
    let elapsed = started.elapsed();
    let record = failed_record(error);

    assert!(elapsed >= Duration::from_millis(100), "finished after {elapsed:?}");
    let parallel = &record.steps[0];
    assert_eq!(parallel.name, "both");
    assert_eq!(parallel.status, StepStatus::Failed);
    let slow = record.steps.iter().find(|step| step.name == "slow").unwrap();
    assert_eq!(slow.status, StepStatus::Completed);
    assert!(parallel.end_time.unwrap() >= slow.end_time.unwrap());
    assert_eq!(record.failing_step().unwrap().name, "fast-fail");
}

#[tokio::test]
async fn deleting_a_missing_file_succeeds() {
    let fixture = fixture();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("absent.txt");
    fixture
        .orchestrator
        .define(
            "cleanup",
            &json!([{ "kind": "file", "operation": "delete", "path": target.to_string_lossy() }]),
        )
        .unwrap();

    let record = fixture.orchestrator.start("cleanup", ExecutionContext::new()).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let result = record.steps[0].result.as_ref().unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["existed"], false);
}

#[tokio::test]
async fn stop_cancels_an_active_execution() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "long",
            &json!([
                { "name": "pause", "kind": "wait", "duration": 200 },
                { "name": "after", "kind": "command", "command": "echo late" }
            ]),
        )
        .unwrap();

    let orchestrator = fixture.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.start("long", ExecutionContext::new()).await });

    let execution_id = loop {
        if let Some(active) = fixture.orchestrator.get_active().first() {
            break active.id.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    assert!(fixture.orchestrator.stop(&execution_id));
    assert!(fixture.orchestrator.get_active().is_empty());
    assert!(!fixture.orchestrator.stop("no-such-execution"));

    let record = run.await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Stopped);
    assert!(record.end_time.is_some());
    assert_eq!(statuses(&record), [("pause", StepStatus::Completed)]);
    assert_eq!(fixture.process.invocations(), 0);
    assert_eq!(
        fixture.orchestrator.store().load_execution(&execution_id).unwrap().status,
        ExecutionStatus::Stopped
    );
}

#[tokio::test]
async fn stop_between_retries_prevents_further_attempts() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "retrying",
            &json!([{ "name": "A", "kind": "command", "command": "fail", "onError": "retry", "maxRetries": 5, "retryDelayMs": 100 }]),
        )
        .unwrap();

    let orchestrator = fixture.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.start("retrying", ExecutionContext::new()).await });

    let execution_id = loop {
        if fixture.process.invocations() > 0
            && let Some(active) = fixture.orchestrator.get_active().first()
        {
            break active.id.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert!(fixture.orchestrator.stop(&execution_id));

    let record = run.await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Stopped);
    assert_eq!(record.steps[0].status, StepStatus::Stopped);
    assert!(fixture.process.invocations() < 6);
}

#[tokio::test]
async fn demo_scenario_completes_with_captured_output() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "demo",
            &json!({
                "steps": [
                    { "kind": "wait", "duration": 10 },
                    { "kind": "command", "command": "echo {{msg}}" }
                ]
            }),
        )
        .unwrap();

    let record = fixture.orchestrator.start("demo", context(&[("msg", "hello")])).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.steps.len(), 2);
    assert_eq!(record.steps[0].kind, StepType::Wait);
    let stdout = record.steps[1].result.as_ref().unwrap()["stdout"].as_str().unwrap().to_string();
    assert!(stdout.contains("hello"), "stdout was {stdout:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn demo_scenario_with_the_real_shell() {
    let dir = tempfile::tempdir().unwrap();
    let config = stepflow_util::ExecutorConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let orchestrator = Orchestrator::from_config(&config).unwrap();
    orchestrator
        .define(
            "demo",
            &json!([
                { "kind": "wait", "duration": 10 },
                { "kind": "command", "command": "echo {{msg}} $msg" }
            ]),
        )
        .unwrap();

    let record = orchestrator.start("demo", context(&[("msg", "hello")])).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.steps[1].result.as_ref().unwrap()["stdout"], "hello hello\n");
    assert!(config.executions_dir().join(format!("{}.json", record.id)).exists());
}

#[cfg(unix)]
fn write_executable(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn relative_script_paths_run_with_the_real_shell() {
    let data = tempfile::tempdir().unwrap();
    let config = stepflow_util::ExecutorConfig {
        data_dir: data.path().to_path_buf(),
        ..Default::default()
    };
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    // Relative to the test process working directory, like paths typed on a command line.
    let workspace = tempfile::tempdir_in(".").unwrap();
    let relative = workspace.path().strip_prefix(std::env::current_dir().unwrap()).unwrap_or(workspace.path());
    std::fs::create_dir(workspace.path().join("sub")).unwrap();
    write_executable(&workspace.path().join("sub/run.sh"), "#!/bin/sh\necho \"ran-$1-$msg\"\n");

    let bare = tempfile::Builder::new().prefix("stepflow-").suffix(".sh").tempfile_in(".").unwrap().into_temp_path();
    write_executable(&bare, "#!/bin/sh\necho bare\n");
    let bare_name = bare.file_name().unwrap().to_string_lossy().into_owned();

    orchestrator
        .define(
            "scripts",
            &json!([
                {
                    "name": "nested",
                    "kind": "script",
                    "path": "run.sh",
                    "args": ["{{target}}"],
                    "cwd": relative.join("sub").to_string_lossy()
                },
                { "name": "bare", "kind": "script", "path": bare_name }
            ]),
        )
        .unwrap();

    let record = orchestrator
        .start("scripts", context(&[("target", "prod"), ("msg", "hi")]))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed, "{:?}", record.steps);
    assert_eq!(record.steps[0].result.as_ref().unwrap()["stdout"], "ran-prod-hi\n");
    assert_eq!(record.steps[1].result.as_ref().unwrap()["stdout"], "bare\n");
}

#[tokio::test]
async fn http_steps_fail_on_error_status_with_response_captured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/prod"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "error": "bad payload" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;

    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "hooks",
            &json!([
                { "name": "health", "kind": "http", "url": format!("{}/health", server.uri()) },
                {
                    "name": "hook",
                    "kind": "http",
                    "method": "POST",
                    "url": format!("{}/hooks/{{{{env}}}}", server.uri()),
                    "body": { "env": "{{env}}" }
                }
            ]),
        )
        .unwrap();

    let error = fixture
        .orchestrator
        .start("hooks", context(&[("env", "prod")]))
        .await
        .unwrap_err();
    let record = failed_record(error);

    assert_eq!(record.steps[0].result.as_ref().unwrap()["body"], json!({ "ok": true }));
    let hook = &record.steps[1];
    assert_eq!(hook.status, StepStatus::Failed);
    assert_eq!(hook.result.as_ref().unwrap()["status"], 422);
    assert_eq!(hook.result.as_ref().unwrap()["body"]["error"], "bad payload");
    assert!(hook.error.as_deref().unwrap().starts_with("HTTP 422"));
}

#[tokio::test]
async fn conditions_notifications_and_nested_sequences() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define(
            "mixed",
            &json!([{
                "name": "group",
                "kind": "sequential",
                "steps": [
                    { "name": "gate", "kind": "condition", "expression": "'{{env}}' == 'prod' && {{replicas}} >= 2" },
                    { "name": "announce", "kind": "notification", "title": "Deploy", "message": "deploying {{env}}", "level": "warning" }
                ]
            }]),
        )
        .unwrap();

    let record = fixture
        .orchestrator
        .start("mixed", context(&[("env", "prod"), ("replicas", "3")]))
        .await
        .unwrap();

    assert_eq!(
        statuses(&record),
        [
            ("group", StepStatus::Completed),
            ("gate", StepStatus::Completed),
            ("announce", StepStatus::Completed)
        ]
    );
    assert_eq!(record.steps[1].result, Some(json!({ "success": true, "result": true })));
    let sent = fixture.sink.0.lock().unwrap();
    assert_eq!(sent[0].message, "deploying prod");
    assert_eq!(sent[0].execution_id, record.id);
}

#[tokio::test]
async fn concurrent_runs_are_tracked_independently() {
    let fixture = fixture();
    fixture
        .orchestrator
        .define("pause", &json!([{ "kind": "wait", "duration": 50 }]))
        .unwrap();

    let (first, second) = tokio::join!(
        fixture.orchestrator.start("pause", ExecutionContext::new()),
        fixture.orchestrator.start("pause", ExecutionContext::new())
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.id, second.id);
    assert_eq!(fixture.orchestrator.store().list_executions().unwrap().len(), 2);
    assert!(fixture.orchestrator.get_active().is_empty());
}

#[tokio::test]
async fn unknown_workflow_and_invalid_definitions_are_rejected() {
    let fixture = fixture();
    let error = fixture.orchestrator.start("ghost", ExecutionContext::new()).await.unwrap_err();
    assert!(matches!(error, WorkflowError::NotFound { .. }));

    let error = fixture.orchestrator.define("bad", &json!({ "steps": [] })).unwrap_err();
    assert!(matches!(error, WorkflowError::Validation(_)));
    let error = fixture
        .orchestrator
        .define("bad", &json!([{ "kind": "launch-rocket" }]))
        .unwrap_err();
    assert!(matches!(error, WorkflowError::Validation(_)));
    assert!(fixture.orchestrator.list().unwrap().is_empty());
}

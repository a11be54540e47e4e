//! Pipeline Executor: drives a planned `Pipeline` to completion step by step.
//!
//! Grounded on the teacher's `loop::engine` iteration-driving shape (dispatch
//! by tag, advance state, check for a terminal condition each pass) and
//! `loop::manager`'s semaphore-bounded wave scheduling, narrowed here to the
//! fixed `StepType` vocabulary instead of the teacher's open-ended loop types.
//! Step handlers shell out through the Command Runner; a `Repair` step also
//! consults an LLM provider first.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::CommandRunner;
use crate::domain::{Pipeline, PipelineState, Step, StepStatus, StepType};
use crate::llm::{GenerateRequest, Provider};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("step '{step}' panicked: {message}")]
    Panic { step: String, message: String },
}

/// Everything a step handler needs beyond the step itself.
pub struct ExecutionContext<'a> {
    pub project_path: PathBuf,
    pub languages: Vec<String>,
    pub command_runner: &'a CommandRunner,
    pub llm_provider: Option<&'a dyn Provider>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionStatus {
    pub progress: f64,
    pub completed_steps: usize,
    pub total_steps: usize,
}

/// `status(pipeline)`: a read-only snapshot, safe to call mid-execution.
pub fn status(pipeline: &Pipeline) -> ExecutionStatus {
    let total = pipeline.total_count();
    let completed = pipeline.completed_count();
    let progress = if total == 0 { 1.0 } else { completed as f64 / total as f64 };
    ExecutionStatus {
        progress,
        completed_steps: completed,
        total_steps: total,
    }
}

/// `execute(pipeline)`: runs every ready step to completion, wave by wave.
/// Sequential by default (one step at a time, in dependency-then-priority
/// order); `policy.parallel` runs each wave of ready steps concurrently.
/// `policy.fail_fast` collapses the whole pipeline on the first failure
/// within a wave; otherwise independent steps keep running and the pipeline
/// only ends Failed if at least one step never completed.
///
/// Step failures are recorded on the pipeline (state `Failed`, per-step
/// `error`) rather than returned as `Err` — `Err` is reserved for
/// cancellation and handler panics, conditions the caller can't resolve by
/// reading the pipeline back.
pub async fn execute(pipeline: &mut Pipeline, ctx: &ExecutionContext<'_>, cancel: CancellationToken) -> Result<(), ExecutorError> {
    pipeline.state = PipelineState::Running;
    pipeline.started_at = Some(Utc::now());

    loop {
        if cancel.is_cancelled() {
            pipeline.state = PipelineState::Failed;
            pipeline.error = Some("execution cancelled".to_string());
            pipeline.completed_at = Some(Utc::now());
            return Err(ExecutorError::Cancelled);
        }

        let completed_ids: HashSet<String> = pipeline
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.id.clone())
            .collect();

        let mut ready_ids: Vec<String> = pipeline
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending && s.dependencies_satisfied(&completed_ids))
            .map(|s| s.id.clone())
            .collect();

        if ready_ids.is_empty() {
            break;
        }

        ready_ids.sort_by_key(|id| {
            let step = pipeline.step_mut(id).expect("id came from pipeline.steps");
            std::cmp::Reverse(step.priority)
        });

        if pipeline.policy.parallel {
            let mut futures = Vec::with_capacity(ready_ids.len());
            for id in &ready_ids {
                let step = pipeline.step_mut(id).expect("id came from pipeline.steps");
                step.status = StepStatus::Running;
                futures.push(run_step_guarded(step.clone(), ctx, cancel.clone()));
            }
            let results = futures::future::join_all(futures).await;
            let mut any_failed = false;
            for (id, result) in ready_ids.iter().zip(results) {
                let outcome = apply_result(pipeline, id, result)?;
                any_failed |= !outcome;
            }
            if any_failed && pipeline.policy.fail_fast {
                break;
            }
        } else {
            for id in &ready_ids {
                let step = pipeline.step_mut(id).expect("id came from pipeline.steps");
                step.status = StepStatus::Running;
                let step = step.clone();
                let result = run_step_guarded(step, ctx, cancel.clone()).await;
                let ok = apply_result(pipeline, id, result)?;
                if !ok && pipeline.policy.fail_fast {
                    break;
                }
            }
            if pipeline.steps.iter().any(|s| s.status == StepStatus::Failed) && pipeline.policy.fail_fast {
                break;
            }
        }
    }

    let all_completed = pipeline.steps.iter().all(|s| s.status == StepStatus::Completed);
    pipeline.state = if all_completed { PipelineState::Completed } else { PipelineState::Failed };
    if !all_completed && pipeline.error.is_none() {
        pipeline.error = pipeline
            .first_failed_step()
            .and_then(|s| s.error.clone())
            .or_else(|| Some("one or more steps did not complete".to_string()));
    }
    pipeline.completed_at = Some(Utc::now());

    info!(task_id = %pipeline.task_id, state = ?pipeline.state, "execute: pipeline finished");
    Ok(())
}

/// Applies a step's handler result to the pipeline. Returns `Ok(true)` if the
/// step completed, `Ok(false)` if it failed, `Err` only on a real panic.
fn apply_result(pipeline: &mut Pipeline, id: &str, result: Result<Result<(), String>, ExecutorError>) -> Result<bool, ExecutorError> {
    let step = pipeline.step_mut(id).expect("id came from pipeline.steps");
    match result {
        Ok(Ok(())) => {
            step.status = StepStatus::Completed;
            Ok(true)
        }
        Ok(Err(message)) => {
            step.status = StepStatus::Failed;
            step.error = Some(message);
            Ok(false)
        }
        Err(panic_err) => {
            step.status = StepStatus::Failed;
            step.error = Some(panic_err.to_string());
            Err(panic_err)
        }
    }
}

/// Runs one step's handler behind a panic boundary. The caller has already
/// marked the pipeline's copy of this step Running before cloning it here.
async fn run_step_guarded(step: Step, ctx: &ExecutionContext<'_>, cancel: CancellationToken) -> Result<Result<(), String>, ExecutorError> {
    let name = step.name.clone();
    let outcome = AssertUnwindSafe(dispatch(&step, ctx, cancel)).catch_unwind().await;
    match outcome {
        Ok(result) => Ok(result),
        Err(panic) => {
            let message = panic_message(panic);
            warn!(step = %name, %message, "run_step_guarded: step handler panicked");
            Err(ExecutorError::Panic { step: name, message })
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn dispatch(step: &Step, ctx: &ExecutionContext<'_>, cancel: CancellationToken) -> Result<(), String> {
    match &step.step_type {
        StepType::Analysis | StepType::Build | StepType::Test => run_shell_step(step, ctx, cancel).await,
        StepType::Repair => run_repair_step(step, ctx, cancel).await,
        StepType::Custom { .. } => run_shell_step(step, ctx, cancel).await,
    }
}

async fn run_shell_step(step: &Step, ctx: &ExecutionContext<'_>, cancel: CancellationToken) -> Result<(), String> {
    let command = command_for_step(step, &ctx.languages);
    run_command(&command, &ctx.project_path, ctx.command_runner, cancel).await
}

/// Repair steps ask the LLM for a fix, then run whatever command it names.
/// With no provider configured, or no command in the response, the step
/// fails cleanly rather than attempting an empty no-op.
async fn run_repair_step(step: &Step, ctx: &ExecutionContext<'_>, cancel: CancellationToken) -> Result<(), String> {
    let provider = ctx.llm_provider.ok_or_else(|| "repair step requires an llm provider".to_string())?;

    let error_text = step.config.get("error_text").and_then(Value::as_str).unwrap_or("unknown failure");
    let system = "You repair a broken build or test run. Respond with JSON only: \
        {\"explanation\": string, \"command\": string}";
    let user = format!("Failure output:\n{error_text}\n");
    let request = GenerateRequest::new("default", system, user).with_grammar("{}", vec!["command".to_string()]);

    let response = provider.generate(request, cancel.clone()).await.map_err(|e| e.to_string())?;
    let parsed: Value = serde_json::from_str(&response.content).map_err(|e| format!("repair response not json: {e}"))?;
    let command = parsed.get("command").and_then(Value::as_str).ok_or_else(|| "repair response missing command".to_string())?;

    run_command(command, &ctx.project_path, ctx.command_runner, cancel).await
}

async fn run_command(command: &str, project_path: &Path, runner: &CommandRunner, cancel: CancellationToken) -> Result<(), String> {
    let args = vec!["-c".to_string(), command.to_string()];
    runner.run(project_path, "sh", &args, None, None, cancel).await.map(|_| ()).map_err(|e| e.to_string())
}

fn command_for_step(step: &Step, languages: &[String]) -> String {
    if let Some(command) = step.config.get("command").and_then(Value::as_str) {
        return command.to_string();
    }
    default_command(&step.step_type, languages)
}

/// Language-appropriate equivalents for the three built-in step types. Falls
/// back to a no-op for any language/type pair not named here, rather than
/// guessing at a command that might not exist on the runner's PATH.
fn default_command(step_type: &StepType, languages: &[String]) -> String {
    let primary = languages.first().map(String::as_str).unwrap_or("rust");
    match (step_type, primary) {
        (StepType::Analysis, "rust") => "cargo check".to_string(),
        (StepType::Analysis, "python") => "python -m py_compile .".to_string(),
        (StepType::Analysis, "go") => "go vet ./...".to_string(),
        (StepType::Analysis, "typescript" | "javascript") => "npm run lint".to_string(),
        (StepType::Build, "rust") => "cargo build".to_string(),
        (StepType::Build, "go") => "go build ./...".to_string(),
        (StepType::Build, "c" | "cpp") => "make".to_string(),
        (StepType::Build, "java") => "mvn -q compile".to_string(),
        (StepType::Build, "typescript" | "javascript") => "npm run build".to_string(),
        (StepType::Test, "rust") => "cargo test".to_string(),
        (StepType::Test, "python") => "pytest".to_string(),
        (StepType::Test, "go") => "go test ./...".to_string(),
        (StepType::Test, "typescript" | "javascript") => "npm test".to_string(),
        (StepType::Custom { name }, _) => format!("echo 'no handler for custom step {name}'"),
        _ => "true".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PipelinePolicy;
    use crate::llm::client::mock::MockProvider;

    fn ctx(runner: &CommandRunner) -> ExecutionContext<'_> {
        ExecutionContext {
            project_path: PathBuf::from("."),
            languages: vec!["rust".to_string()],
            command_runner: runner,
            llm_provider: None,
        }
    }

    fn shell_step(id: &str, step_type: StepType, command: &str, depends_on: Vec<String>) -> Step {
        Step::new(id, id, step_type).with_depends_on(depends_on).with_config(serde_json::json!({"command": command}))
    }

    #[tokio::test]
    async fn test_execute_runs_steps_in_dependency_order() {
        let runner = CommandRunner::new(4);
        let mut pipeline = Pipeline::new(
            "t1",
            vec![
                shell_step("s1", StepType::Analysis, "true", vec![]),
                shell_step("s2", StepType::Test, "true", vec!["s1".to_string()]),
            ],
            PipelinePolicy::default(),
        );
        execute(&mut pipeline, &ctx(&runner), CancellationToken::new()).await.unwrap();
        assert_eq!(pipeline.state, PipelineState::Completed);
        assert!(pipeline.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_dependent_steps() {
        let runner = CommandRunner::new(4);
        let mut pipeline = Pipeline::new(
            "t1",
            vec![
                shell_step("s1", StepType::Analysis, "exit 1", vec![]),
                shell_step("s2", StepType::Test, "true", vec!["s1".to_string()]),
            ],
            PipelinePolicy { fail_fast: true, parallel: false },
        );
        execute(&mut pipeline, &ctx(&runner), CancellationToken::new()).await.unwrap();
        assert_eq!(pipeline.state, PipelineState::Failed);
        assert_eq!(pipeline.step_mut("s1").unwrap().status, StepStatus::Failed);
        assert_eq!(pipeline.step_mut("s2").unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_independent_steps_continue_without_fail_fast() {
        let runner = CommandRunner::new(4);
        let mut pipeline = Pipeline::new(
            "t1",
            vec![
                shell_step("s1", StepType::Analysis, "exit 1", vec![]),
                shell_step("s2", StepType::Build, "true", vec![]),
            ],
            PipelinePolicy { fail_fast: false, parallel: true },
        );
        execute(&mut pipeline, &ctx(&runner), CancellationToken::new()).await.unwrap();
        assert_eq!(pipeline.state, PipelineState::Failed);
        assert_eq!(pipeline.step_mut("s2").unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancellation_before_start_fails_pipeline() {
        let runner = CommandRunner::new(4);
        let mut pipeline = Pipeline::new("t1", vec![shell_step("s1", StepType::Analysis, "true", vec![])], PipelinePolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = execute(&mut pipeline, &ctx(&runner), cancel).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Cancelled));
        assert_eq!(pipeline.state, PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_repair_step_runs_command_from_llm_response() {
        let runner = CommandRunner::new(4);
        let provider = MockProvider::new(vec![Ok(serde_json::json!({"explanation": "fix", "command": "true"}).to_string())]);
        let mut execution_ctx = ctx(&runner);
        execution_ctx.llm_provider = Some(&provider);
        let mut pipeline = Pipeline::new(
            "t1",
            vec![Step::new("s1", "Repair", StepType::Repair).with_config(serde_json::json!({"error_text": "boom"})).with_priority(1)],
            PipelinePolicy::default(),
        );
        execute(&mut pipeline, &execution_ctx, CancellationToken::new()).await.unwrap();
        assert_eq!(pipeline.state, PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_repair_step_without_provider_fails() {
        let runner = CommandRunner::new(4);
        let mut pipeline = Pipeline::new("t1", vec![Step::new("s1", "Repair", StepType::Repair).with_priority(1)], PipelinePolicy::default());
        execute(&mut pipeline, &ctx(&runner), CancellationToken::new()).await.unwrap();
        assert_eq!(pipeline.state, PipelineState::Failed);
        assert!(pipeline.step_mut("s1").unwrap().error.as_deref().unwrap().contains("llm provider"));
    }

    #[test]
    fn test_status_reports_progress_fraction() {
        let mut pipeline = Pipeline::new(
            "t1",
            vec![
                shell_step("s1", StepType::Analysis, "true", vec![]),
                shell_step("s2", StepType::Test, "true", vec![]),
            ],
            PipelinePolicy::default(),
        );
        pipeline.step_mut("s1").unwrap().status = StepStatus::Completed;
        let snapshot = status(&pipeline);
        assert_eq!(snapshot.completed_steps, 1);
        assert_eq!(snapshot.total_steps, 2);
        assert!((snapshot.progress - 0.5).abs() < f64::EPSILON);
    }
}

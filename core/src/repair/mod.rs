//! Repair Sub-Pipeline: synthesizes a one-step `Repair` pipeline from a
//! failed step's diagnostics, runs it through the Executor, and hands the
//! caller a fresh copy of the base pipeline to retry.
//!
//! Grounded on `domain::pipeline::Pipeline::fresh_copy`/`first_failed_step`
//! (the value-object retry contract) and the teacher's loop-retry counter in
//! `loop::manager`, narrowed here to a fixed max-attempts budget instead of
//! the teacher's open-ended backoff policy.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{ContextPack, LogEntry, Pipeline, PipelineState, RepairStrategy, Step, StepType};
use crate::executor::{self, ExecutionContext, ExecutorError};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("no failed step to repair")]
    NothingToRepair,

    #[error("repair attempts exhausted after {attempts} tries")]
    AttemptsExhausted { attempts: u32 },

    #[error("repair pipeline execution failed: {0}")]
    Executor(#[from] ExecutorError),
}

/// `attempt-repair(task, failed-pipeline)`. Locates the first Failed step
/// (ties broken by pipeline order — the earliest-ordered failure), builds a
/// one-step `Repair` pipeline carrying its error text, and runs it through
/// the Executor. On success, returns a fresh copy of `base_pipeline` ready
/// for the caller to re-execute; on failure, retries up to `max_attempts`
/// (default 3) before giving up.
pub async fn attempt_repair(
    task_id: &str,
    context: &ContextPack,
    base_pipeline: &Pipeline,
    failed_pipeline: &Pipeline,
    ctx: &ExecutionContext<'_>,
    max_attempts: Option<u32>,
    cancel: CancellationToken,
) -> Result<Pipeline, RepairError> {
    let failed_step = failed_pipeline.first_failed_step().ok_or(RepairError::NothingToRepair)?;
    let error_text = failed_step.error.clone().unwrap_or_else(|| "unknown failure".to_string());
    let max_attempts = max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut repair_pipeline = build_repair_pipeline(task_id, context, &error_text, RepairStrategy::AutoFix);

        executor::execute(&mut repair_pipeline, ctx, cancel.clone()).await?;

        if repair_pipeline.state == PipelineState::Completed {
            info!(task_id, attempt, "attempt_repair: repair pipeline completed, retrying base pipeline");
            return Ok(base_pipeline.fresh_copy());
        }

        warn!(task_id, attempt, error = %repair_pipeline.error.as_deref().unwrap_or(""), "attempt_repair: repair attempt failed");
        if attempt >= max_attempts {
            return Err(RepairError::AttemptsExhausted { attempts: attempt });
        }
    }
}

fn build_repair_pipeline(task_id: &str, context: &ContextPack, error_text: &str, strategy: RepairStrategy) -> Pipeline {
    let config = serde_json::json!({
        "task_id": task_id,
        "project_path": context.project_path,
        "error_text": error_text,
        "strategy": strategy,
        "max_attempts": DEFAULT_MAX_ATTEMPTS,
    });
    let step = Step::new(format!("{task_id}-repair"), "Repair", StepType::Repair).with_config(config).with_priority(1);
    Pipeline::new(task_id.to_string(), vec![step], crate::domain::PipelinePolicy { fail_fast: true, parallel: false })
}

/// Materializes a log entry describing a repair cycle, for the Status & Log
/// Projection (§4.9) to fold into a task's log stream.
pub fn repair_log_entry(task_id: &str, attempt: u32, succeeded: bool, timestamp: chrono::DateTime<chrono::Utc>) -> LogEntry {
    use crate::domain::LogLevel;
    LogEntry {
        id: format!("{task_id}-repair-{attempt}"),
        task_id: task_id.to_string(),
        level: if succeeded { LogLevel::Info } else { LogLevel::Error },
        message: if succeeded {
            format!("repair attempt {attempt} succeeded")
        } else {
            format!("repair attempt {attempt} failed")
        },
        timestamp,
        metadata: serde_json::json!({"attempt": attempt}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRunner;
    use crate::domain::{PipelinePolicy, SlaPolicy};
    use crate::llm::client::mock::MockProvider;
    use crate::llm::error::LlmError;
    use std::path::PathBuf;

    fn context() -> ContextPack {
        ContextPack {
            project_path: "/p".to_string(),
            sla: SlaPolicy::Standard,
            task_text: "add endpoint".to_string(),
            languages: vec!["rust".to_string()],
            changed_files: vec![],
        }
    }

    fn failed_base_pipeline() -> Pipeline {
        let step = Step::new("s1", "Build", StepType::Build).with_config(serde_json::json!({"command": "exit 1"}));
        let mut pipeline = Pipeline::new("autonomous_1", vec![step], PipelinePolicy::default());
        pipeline.state = PipelineState::Failed;
        pipeline.step_mut("s1").unwrap().status = crate::domain::StepStatus::Failed;
        pipeline.step_mut("s1").unwrap().error = Some("compile error X".to_string());
        pipeline
    }

    #[tokio::test]
    async fn test_successful_repair_returns_fresh_base_copy() {
        let runner = CommandRunner::new(4);
        let provider = MockProvider::new(vec![Ok(serde_json::json!({"explanation": "fix", "command": "true"}).to_string())]);
        let exec_ctx = ExecutionContext {
            project_path: PathBuf::from("."),
            languages: vec!["rust".to_string()],
            command_runner: &runner,
            llm_provider: Some(&provider),
        };
        let base = failed_base_pipeline();
        let repaired = attempt_repair("autonomous_1", &context(), &base, &base, &exec_ctx, None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(repaired.state, PipelineState::Pending);
        assert!(repaired.steps.iter().all(|s| s.status == crate::domain::StepStatus::Pending));
    }

    #[tokio::test]
    async fn test_repair_gives_up_after_max_attempts() {
        let runner = CommandRunner::new(4);
        let provider = MockProvider::new(vec![Err(LlmError::NoChoices), Err(LlmError::NoChoices)]);
        let exec_ctx = ExecutionContext {
            project_path: PathBuf::from("."),
            languages: vec!["rust".to_string()],
            command_runner: &runner,
            llm_provider: Some(&provider),
        };
        let base = failed_base_pipeline();
        let err = attempt_repair("autonomous_1", &context(), &base, &base, &exec_ctx, Some(2), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::AttemptsExhausted { attempts: 2 }));
    }

    #[tokio::test]
    async fn test_nothing_to_repair_when_no_failed_step() {
        let runner = CommandRunner::new(4);
        let exec_ctx = ExecutionContext {
            project_path: PathBuf::from("."),
            languages: vec!["rust".to_string()],
            command_runner: &runner,
            llm_provider: None,
        };
        let step = Step::new("s1", "Build", StepType::Build);
        let pipeline = Pipeline::new("autonomous_1", vec![step], PipelinePolicy::default());
        let err = attempt_repair("autonomous_1", &context(), &pipeline, &pipeline, &exec_ctx, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::NothingToRepair));
    }
}

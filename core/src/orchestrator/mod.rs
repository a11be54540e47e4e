//! Task Orchestrator: the top-level state machine for a submitted task —
//! plan, execute-and-repair, finalize — with panic recovery and a
//! notification channel, plus the inter-task dependency admission rules for
//! a whole-plan execution pass.
//!
//! Grounded on the teacher's `coordinator::core::Coordinator` (exclusive
//! mutable state behind message passing, rate-limiter-shaped admission
//! check adapted into the single-active-plan rule) and `domain::execution`'s
//! `LoopExecutionStatus` narrowed to this spec's five-state `TaskState`;
//! the event enum follows `td::events::types::Event` / `EventEmitter`
//! narrowed to `OrchestratorEvent`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::CommandRunner;
use crate::domain::{
    autonomous_task_id, Budgets, ContextPack, LogEntry, SlaPolicy, Task, TaskState, TaskStatus,
};
use crate::executor::{self, ExecutionContext};
use crate::guardrail::GuardrailHook;
use crate::llm::Provider;
use crate::planning;
use crate::repair;
use crate::repository::Repository;
use crate::status as log_projection;

const DEFAULT_MAX_EXECUTE_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 3;
const DEFAULT_EPHEMERAL_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("dependency not met for task {task}: {dependency} is not Done")]
    DependencyNotMet { task: String, dependency: String },

    #[error("invalid task state: {0}")]
    InvalidTaskState(String),
}

/// `StartAutonomousTask` input. `depends_on`/`budgets` are exposed so a
/// caller submitting through the autonomous API can express the same
/// dependency/budget shape a plan-file task carries — the orchestrator
/// enforces `DependencyNotMet` identically for both origins.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub description: String,
    pub project_path: String,
    pub sla_policy: String,
    pub languages: Vec<String>,
    pub depends_on: Vec<String>,
    pub budgets: Budgets,

    /// §9 open question (b). `StartAutonomousTask` always mints a fresh task
    /// id, so there is never a pre-existing Done record for it to skip or
    /// re-run — this field only has observable effect when a task of the
    /// same id is later replayed through `run_plan`'s whole-plan pass.
    pub force: bool,
}

impl StartRequest {
    pub fn new(description: impl Into<String>, project_path: impl Into<String>, sla_policy: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            project_path: project_path.into(),
            sla_policy: sla_policy.into(),
            languages: Vec::new(),
            depends_on: Vec::new(),
            budgets: Budgets::default(),
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub task_id: String,
    pub accepted: bool,
    pub message: String,
}

/// One notification per state transition, per §4.6.1. The Status & Log
/// Projection folds these into a task's materialized log stream; it never
/// re-derives orchestrator state any other way.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    TaskStarted { task_id: String, timestamp: DateTime<Utc> },
    TaskProgressed { task_id: String, progress: f64, message: String, timestamp: DateTime<Utc> },
    TaskRepaired { task_id: String, attempt: u32, timestamp: DateTime<Utc> },
    TaskCompleted { task_id: String, timestamp: DateTime<Utc> },
    TaskFailed { task_id: String, error: String, timestamp: DateTime<Utc> },
}

impl OrchestratorEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::TaskProgressed { task_id, .. }
            | Self::TaskRepaired { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => task_id,
        }
    }
}

/// Handles the Orchestrator hands to the background execution task and
/// nothing else needs: the Command Runner, an optional LLM provider (its
/// absence just means planning always falls back to the heuristic and
/// `Repair` steps fail cleanly), the guardrail hook, and an optional
/// Repository — when present, every terminal `TaskStatus` transition is
/// persisted through it (§4.6/§4.7 "terminal status is written through the
/// Repository"); `None` keeps state purely in-memory, which is all the
/// in-process unit tests in this module need.
pub struct OrchestratorDeps {
    pub command_runner: Arc<CommandRunner>,
    pub llm_provider: Option<Arc<dyn Provider>>,
    pub guardrail: GuardrailHook,
    pub repository: Option<Arc<Repository>>,
    pub max_execute_attempts: u32,
    pub max_repair_attempts: u32,
}

impl Default for OrchestratorDeps {
    fn default() -> Self {
        Self {
            command_runner: Arc::new(CommandRunner::new(8)),
            llm_provider: None,
            guardrail: GuardrailHook::default(),
            repository: None,
            max_execute_attempts: DEFAULT_MAX_EXECUTE_ATTEMPTS,
            max_repair_attempts: DEFAULT_MAX_REPAIR_ATTEMPTS,
        }
    }
}

struct SharedState {
    tasks: RwLock<HashMap<String, Task>>,
    statuses: RwLock<HashMap<String, TaskStatus>>,
    cancel_tokens: RwLock<HashMap<String, CancellationToken>>,
    logs: RwLock<HashMap<String, Vec<LogEntry>>>,
    events_tx: mpsc::UnboundedSender<OrchestratorEvent>,
    deps: OrchestratorDeps,
}

/// Top-level task state machine. Cheap to clone (an `Arc` around shared
/// state) so the background execution task can hold its own handle.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<SharedState>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            shared: Arc::new(SharedState {
                tasks: RwLock::new(HashMap::new()),
                statuses: RwLock::new(HashMap::new()),
                cancel_tokens: RwLock::new(HashMap::new()),
                logs: RwLock::new(HashMap::new()),
                events_tx,
                deps,
            }),
        };
        (orchestrator, events_rx)
    }

    /// `StartAutonomousTask`. Rejects bad input with `Validation` before any
    /// status record is created; rejects a second concurrent plan with
    /// `InvalidTaskState` (single-active-plan admission rule) — both checked
    /// synchronously, before the execution task is ever spawned, so the
    /// admission race in S4 resolves deterministically.
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, OrchestratorError> {
        if request.description.trim().is_empty() {
            return Err(OrchestratorError::Validation("task description must not be empty".to_string()));
        }
        if request.project_path.trim().is_empty() {
            return Err(OrchestratorError::Validation("project path must not be empty".to_string()));
        }
        let sla = SlaPolicy::parse(&request.sla_policy)
            .ok_or_else(|| OrchestratorError::Validation("sla policy must be lite, standard, or strict".to_string()))?;

        {
            let statuses = self.shared.statuses.read().unwrap();
            if statuses.values().any(|s| s.state == TaskState::Todo) {
                return Err(OrchestratorError::InvalidTaskState("no_running_tasks".to_string()));
            }
        }

        let task_id = autonomous_task_id(Utc::now().timestamp());
        let mut task = Task::new(&task_id, &request.description, &request.project_path, sla);
        task.depends_on = request.depends_on.clone();
        task.budgets = request.budgets.clone();
        task.metadata["languages"] = serde_json::json!(request.languages);

        self.check_dependencies(&task)?;

        Ok(self.register_and_spawn(task))
    }

    /// Whole-plan execution pass (§4.6 "Dependencies between tasks", §9 open
    /// question (b)). Repeatedly starts every task in `tasks` whose
    /// dependencies are all Done, admitting a new wave as soon as the
    /// previous one reaches a terminal state, until no task becomes ready.
    /// A task already Done is left alone unless `force` is set, in which
    /// case it is restarted from a fresh status — this is what makes the
    /// "re-executed without force is a no-op" property in §8 hold by
    /// construction rather than by a special case.
    ///
    /// This bypasses `start`'s single-active-plan admission rule on
    /// purpose: that rule governs one externally submitted ad hoc request
    /// racing another, not a batch pass over an already-validated plan.
    pub async fn run_plan(&self, tasks: &[Task], force: bool) -> Vec<StartOutcome> {
        let mut outcomes = Vec::new();
        let mut spawned: std::collections::HashSet<String> = std::collections::HashSet::new();

        loop {
            let ready: Vec<Task> = {
                let statuses = self.shared.statuses.read().unwrap();
                let state_map: HashMap<String, TaskState> = statuses.iter().map(|(id, status)| (id.clone(), status.state)).collect();
                tasks
                    .iter()
                    .filter(|task| {
                        if spawned.contains(&task.id) {
                            return false;
                        }
                        if state_map.get(&task.id) == Some(&TaskState::Done) && !force {
                            return false;
                        }
                        dependencies_ready(task, &state_map)
                    })
                    .cloned()
                    .collect()
            };

            if ready.is_empty() {
                break;
            }

            for task in ready {
                spawned.insert(task.id.clone());
                outcomes.push(self.register_and_spawn(task));
            }

            loop {
                let wave_done = {
                    let statuses = self.shared.statuses.read().unwrap();
                    spawned.iter().all(|id| statuses.get(id).is_some_and(|s| s.state.is_terminal()))
                };
                if wave_done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        outcomes
    }

    /// Register a task's status record and spawn its guarded execution.
    /// Shared by `start` (freshly minted ids) and `run_plan` (catalog ids,
    /// possibly re-running a task already in the map).
    fn register_and_spawn(&self, task: Task) -> StartOutcome {
        let task_id = task.id.clone();
        self.shared.tasks.write().unwrap().insert(task_id.clone(), task);
        self.shared.statuses.write().unwrap().insert(task_id.clone(), TaskStatus::new(&task_id));
        self.shared.cancel_tokens.write().unwrap().insert(task_id.clone(), CancellationToken::new());

        let orchestrator = self.clone();
        let spawned_id = task_id.clone();
        tokio::spawn(async move {
            orchestrator.run_guarded(spawned_id).await;
        });

        StartOutcome {
            task_id,
            accepted: true,
            message: "Task accepted".to_string(),
        }
    }

    fn check_dependencies(&self, task: &Task) -> Result<(), OrchestratorError> {
        let statuses = self.shared.statuses.read().unwrap();
        for dep in &task.depends_on {
            match statuses.get(dep) {
                Some(status) if status.state == TaskState::Done => {}
                _ => {
                    return Err(OrchestratorError::DependencyNotMet {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Top-level panic boundary: any uncaught failure inside `run` is
    /// converted to a Failed status with the panic message and a
    /// `TaskFailed` notification, exactly once (§7 "panics are recovered
    /// exactly once at the top of the execution goroutine").
    async fn run_guarded(&self, task_id: String) {
        let outcome = AssertUnwindSafe(self.run(task_id.clone())).catch_unwind().await;
        if let Err(panic) = outcome {
            let message = panic_message(panic);
            error!(task_id = %task_id, %message, "Orchestrator::run_guarded: task panicked");
            if let Some(status) = self.shared.statuses.write().unwrap().get_mut(&task_id) {
                status.finish_failed("Task failed", format!("internal error: {message}"));
            }
            self.persist_statuses();
            self.emit(OrchestratorEvent::TaskFailed { task_id, error: message, timestamp: Utc::now() });
        }
    }

    /// Plan -> execute-and-repair -> finalize, per §4.6.
    async fn run(&self, task_id: String) {
        let task = match self.shared.tasks.read().unwrap().get(&task_id).cloned() {
            Some(task) => task,
            None => return,
        };
        let cancel = self.cancel_token(&task_id);

        self.set_progress(&task_id, 0.0, "Starting".to_string(), true);
        self.emit(OrchestratorEvent::TaskStarted { task_id: task_id.clone(), timestamp: Utc::now() });

        let ephemeral_guard = self.shared.deps.guardrail.enable_ephemeral(&task_id, task_type_of(&task), DEFAULT_EPHEMERAL_TTL);

        let project_path = PathBuf::from(task.project_path().unwrap_or("."));
        let languages = task.languages();
        let context = ContextPack {
            project_path: task.project_path().unwrap_or_default().to_string(),
            sla: task.sla().unwrap_or(SlaPolicy::Standard),
            task_text: task.description().unwrap_or_default().to_string(),
            languages: languages.clone(),
            changed_files: Vec::new(),
        };

        self.set_progress(&task_id, 0.10, "Planning".to_string(), false);

        let base_pipeline = match &self.shared.deps.llm_provider {
            Some(provider) => {
                let (planned, fallback_used) = planning::create_pipeline_with_llm(&task, &context, provider.as_ref(), cancel.clone()).await;
                if fallback_used {
                    debug!(task_id = %task_id, "Orchestrator::run: planner fell back to heuristic policy");
                }
                match planning::create_pipeline(&task, Some(planned)) {
                    Ok(pipeline) => pipeline,
                    Err(err) => {
                        self.fail(&task_id, format!("planning failed: {err}")).await;
                        drop(ephemeral_guard);
                        return;
                    }
                }
            }
            None => match planning::create_pipeline(&task, None) {
                Ok(pipeline) => pipeline,
                Err(err) => {
                    self.fail(&task_id, format!("planning failed: {err}")).await;
                    drop(ephemeral_guard);
                    return;
                }
            },
        };

        self.set_progress(&task_id, 0.20, "Execution plan created".to_string(), false);

        let exec_ctx = ExecutionContext {
            project_path,
            languages,
            command_runner: self.shared.deps.command_runner.as_ref(),
            llm_provider: self.shared.deps.llm_provider.as_deref(),
        };

        let max_attempts = self.shared.deps.max_execute_attempts;
        let mut pipeline = base_pipeline.fresh_copy();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                self.cancel_internal(&task_id, "Task cancelled by user".to_string());
                drop(ephemeral_guard);
                return;
            }

            if let Err(err) = self.shared.deps.guardrail.validate(&task_id, context.changed_files.len() as u32, 0, &task.budgets) {
                self.fail(&task_id, format!("guardrail blocked execution: {err}")).await;
                drop(ephemeral_guard);
                return;
            }

            if let Err(err) = executor::execute(&mut pipeline, &exec_ctx, cancel.clone()).await {
                self.fail(&task_id, format!("execution error: {err}")).await;
                drop(ephemeral_guard);
                return;
            }

            if pipeline.state == crate::domain::PipelineState::Completed {
                break;
            }

            attempt += 1;
            let correction_progress = (0.80 + 0.05 * attempt as f64).min(0.94);
            self.set_progress(&task_id, correction_progress, format!("Correction attempt {attempt}"), false);

            if attempt > max_attempts {
                self.fail(&task_id, pipeline.error.clone().unwrap_or_else(|| "pipeline failed".to_string())).await;
                drop(ephemeral_guard);
                return;
            }

            match repair::attempt_repair(
                &task_id,
                &context,
                &base_pipeline,
                &pipeline,
                &exec_ctx,
                Some(self.shared.deps.max_repair_attempts),
                cancel.clone(),
            )
            .await
            {
                Ok(fresh) => {
                    pipeline = fresh;
                    self.emit(OrchestratorEvent::TaskRepaired { task_id: task_id.clone(), attempt, timestamp: Utc::now() });
                }
                Err(err) => {
                    self.fail(&task_id, format!("repair failed: {err}")).await;
                    drop(ephemeral_guard);
                    return;
                }
            }
        }

        self.set_progress(&task_id, 0.95, "Finalizing".to_string(), false);
        drop(ephemeral_guard);

        if let Some(status) = self.shared.statuses.write().unwrap().get_mut(&task_id) {
            status.finish_done("Task completed successfully");
        }
        self.persist_statuses();
        self.emit(OrchestratorEvent::TaskCompleted { task_id: task_id.clone(), timestamp: Utc::now() });
        info!(task_id = %task_id, "Orchestrator::run: task completed");
    }

    async fn fail(&self, task_id: &str, error: String) {
        warn!(task_id, %error, "Orchestrator::run: task failed");
        if let Some(status) = self.shared.statuses.write().unwrap().get_mut(task_id) {
            status.finish_failed("Task failed", error.clone());
        }
        self.persist_statuses();
        self.emit(OrchestratorEvent::TaskFailed { task_id: task_id.to_string(), error, timestamp: Utc::now() });
    }

    fn cancel_internal(&self, task_id: &str, message: String) {
        if let Some(status) = self.shared.statuses.write().unwrap().get_mut(task_id) {
            status.finish_failed(message.clone(), message.clone());
        }
        self.persist_statuses();
        self.emit(OrchestratorEvent::TaskFailed { task_id: task_id.to_string(), error: message, timestamp: Utc::now() });
    }

    /// Snapshot every task's current state and persist it through the
    /// Repository (§4.6/§4.7 "terminal status is written through the
    /// Repository"). A no-op when no Repository is configured. Persistence
    /// failure is logged, not propagated — a task has already reached its
    /// terminal in-memory state and a caller observing `status()` must see
    /// that regardless of whether the on-disk mirror could be written.
    fn persist_statuses(&self) {
        let Some(repository) = &self.shared.deps.repository else { return };
        let snapshot: HashMap<String, TaskState> =
            self.shared.statuses.read().unwrap().iter().map(|(id, status)| (id.clone(), status.state)).collect();
        if let Err(err) = repository.save_statuses(&snapshot) {
            warn!(%err, "Orchestrator::persist_statuses: failed to persist task statuses");
        }
    }

    /// `CancelAutonomousTask`. Rejects a task that's already terminal
    /// (`Done`) per the state table's "Done | any | Done (no-op; cancel
    /// rejected)" row; any other state transitions to Failed and triggers
    /// the task's cancellation token so the in-flight execution (if any)
    /// stops at its next suspension point instead of racing to completion.
    pub async fn cancel(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let state = {
            let statuses = self.shared.statuses.read().unwrap();
            statuses.get(task_id).map(|s| s.state).ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?
        };
        if state == TaskState::Done {
            return Err(OrchestratorError::InvalidTaskState("cannot cancel a task that already completed".to_string()));
        }
        if let Some(token) = self.shared.cancel_tokens.read().unwrap().get(task_id) {
            token.cancel();
        }
        self.cancel_internal(task_id, "Task cancelled by user".to_string());
        Ok(())
    }

    /// `GetAutonomousTaskStatus`.
    pub fn status(&self, task_id: &str) -> Result<TaskStatus, OrchestratorError> {
        self.shared
            .statuses
            .read()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))
    }

    /// `ListAutonomousTasks(projectPath)`.
    pub fn list(&self, project_path: Option<&str>) -> Vec<Task> {
        let tasks = self.shared.tasks.read().unwrap();
        tasks
            .values()
            .filter(|task| project_path.is_none_or(|path| task.project_path() == Some(path)))
            .cloned()
            .collect()
    }

    /// `GetTaskLogs`. Returns the accumulated materialized log for the task
    /// (created/status-change/error/completed entries built as each
    /// `OrchestratorEvent` fires) — a pure read of recorded history, never
    /// re-derived any other way (§4.6.1/§4.9).
    pub fn logs(&self, task_id: &str) -> Result<Vec<LogEntry>, OrchestratorError> {
        if !self.shared.statuses.read().unwrap().contains_key(task_id) {
            return Err(OrchestratorError::TaskNotFound(task_id.to_string()));
        }
        Ok(self.shared.logs.read().unwrap().get(task_id).cloned().unwrap_or_default())
    }

    /// `Pause(taskId)`: only valid from `Todo`, per the state table.
    pub fn pause(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let mut statuses = self.shared.statuses.write().unwrap();
        let status = statuses.get_mut(task_id).ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if status.state != TaskState::Todo {
            return Err(OrchestratorError::InvalidTaskState(format!("cannot pause a task in state {}", status.state)));
        }
        status.block("Paused by user");
        Ok(())
    }

    /// `Resume(taskId)`: only valid from `Blocked`.
    pub fn resume(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let mut statuses = self.shared.statuses.write().unwrap();
        let status = statuses.get_mut(task_id).ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if status.state != TaskState::Blocked {
            return Err(OrchestratorError::InvalidTaskState(format!("cannot resume a task in state {}", status.state)));
        }
        status.unblock();
        Ok(())
    }

    fn cancel_token(&self, task_id: &str) -> CancellationToken {
        self.shared
            .cancel_tokens
            .read()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    fn set_progress(&self, task_id: &str, progress: f64, message: String, starting: bool) {
        {
            let mut statuses = self.shared.statuses.write().unwrap();
            if let Some(status) = statuses.get_mut(task_id) {
                if starting {
                    status.start();
                }
                status.set_progress(progress, message.clone());
            }
        }
        self.emit(OrchestratorEvent::TaskProgressed {
            task_id: task_id.to_string(),
            progress,
            message,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: OrchestratorEvent) {
        let entry = log_projection::log_entry_from_event(&event);
        self.shared.logs.write().unwrap().entry(event.task_id().to_string()).or_default().push(entry);
        let _ = self.shared.events_tx.send(event);
    }
}

fn task_type_of(task: &Task) -> &str {
    task.metadata.get("task_type").and_then(serde_json::Value::as_str).unwrap_or("generic")
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

/// Whether every dependency `task` declares is Done, per the whole-plan
/// pass's readiness rule (§4.6 "Dependencies between tasks").
fn dependencies_ready(task: &Task, statuses: &HashMap<String, TaskState>) -> bool {
    task.depends_on.iter().all(|dep| statuses.get(dep) == Some(&TaskState::Done))
}

//! Task Catalog Repository: a thin adapter over the `taskstore` crate that
//! maps its plan/status file types onto `core::domain::Task`/`TaskStatus`.
//!
//! Grounded on `taskstore::plan`/`taskstore::statusfile` directly (kept as
//! its own workspace member per the teacher's split between the engine
//! binary and a reusable store crate) — this module owns only the mapping,
//! none of the file-format logic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::{Budgets, Task, TaskState};
use taskstore::{PlanDocument, PlanTask, StoreError};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("status file contains unrecognized state '{0}' for task {1}")]
    UnrecognizedState(String, String),
}

pub struct Repository {
    plan_path: PathBuf,
    status_path: PathBuf,
}

impl Repository {
    pub fn new(plan_path: impl Into<PathBuf>, status_path: impl Into<PathBuf>) -> Self {
        Self {
            plan_path: plan_path.into(),
            status_path: status_path.into(),
        }
    }

    /// `load-tasks()`: parse the plan document and map each `PlanTask` into a
    /// domain `Task`. The plan's own `status` field seeds `metadata["sla"]`
    /// is not carried here — SLA is a per-request concern for submitted
    /// tasks, not a plan-file field — so plan-loaded tasks default to no SLA
    /// tier until the orchestrator assigns one.
    pub fn load_tasks(&self) -> Result<Vec<Task>, RepositoryError> {
        let doc = PlanDocument::load(&self.plan_path)?;
        Ok(doc.into_tasks().into_iter().map(plan_task_to_domain).collect())
    }

    /// `load-statuses()`: the persisted task id -> state map, with each tag
    /// parsed back into a `TaskState`.
    pub fn load_statuses(&self) -> Result<HashMap<String, TaskState>, RepositoryError> {
        let raw = taskstore::load_statuses(&self.status_path)?;
        raw.into_iter()
            .map(|(task_id, tag)| match TaskState::parse(&tag) {
                Some(state) => Ok((task_id, state)),
                None => Err(RepositoryError::UnrecognizedState(tag, task_id)),
            })
            .collect()
    }

    /// `save-statuses(...)`: persist the current task id -> state map
    /// atomically (write-to-temp-then-rename, per `taskstore::statusfile`).
    pub fn save_statuses(&self, statuses: &HashMap<String, TaskState>) -> Result<(), RepositoryError> {
        let raw: HashMap<String, String> = statuses.iter().map(|(id, state)| (id.clone(), state.to_string())).collect();
        taskstore::save_statuses(&self.status_path, &raw)?;
        Ok(())
    }

    /// `validate()`: delegates to the plan document's own validation (unique
    /// ids, acyclic dependency graph, step files exist) anchored at the
    /// plan file's parent directory.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        let doc = PlanDocument::load(&self.plan_path)?;
        let base_dir = self.plan_path.parent().unwrap_or_else(|| Path::new("."));
        doc.validate(base_dir)?;
        Ok(())
    }
}

fn plan_task_to_domain(plan_task: PlanTask) -> Task {
    let metadata = serde_json::json!({
        "description": plan_task.name,
        "step_file": plan_task.step_file,
    });
    Task {
        id: plan_task.id,
        name: plan_task.name.clone(),
        depends_on: plan_task.depends_on,
        step_file: plan_task.step_file.map(|p| p.display().to_string()),
        budgets: Budgets {
            max_files: plan_task.budgets.max_files,
            max_changed_lines: plan_task.budgets.max_changed_lines,
        },
        metadata,
        created_at: chrono::Utc::now(),
    }
}

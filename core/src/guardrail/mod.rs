//! Guardrail Hook: pre-execution validation and ephemeral-mode lifecycle for
//! sensitive task types.
//!
//! Grounded on `worktree::manager`'s create/remove scoped-resource pair
//! (`WorktreeManager::create`/`remove`), adapted into a `Drop`-based RAII
//! guard (`EphemeralGuard`) instead of an explicit remove call, since the
//! spec requires `disable-ephemeral` to run on every exit path — success,
//! failure, cancellation, and panic — rather than only the happy path
//! (§4.8.1, §9 "scoped acquisition").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::Budgets;

const SENSITIVE_TASK_TYPES: &[&str] = &["scaffold", "deps_fix"];

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("task {task_id} exceeds file budget: touched {touched}, max {max}")]
    FileBudgetExceeded { task_id: String, touched: u32, max: u32 },

    #[error("task {task_id} exceeds changed-line budget: changed {changed}, max {max}")]
    LineBudgetExceeded { task_id: String, changed: u32, max: u32 },
}

/// Scoped guard returned by `enable_ephemeral`. `disable_ephemeral` runs
/// automatically on drop, which is what makes it fire on every exit path —
/// success, failure, cancellation, or a caught panic's unwind — rather than
/// only when the Orchestrator remembers to call it.
pub struct EphemeralGuard {
    task_id: String,
    task_type: String,
    enabled: Arc<AtomicBool>,
}

impl EphemeralGuard {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl Drop for EphemeralGuard {
    fn drop(&mut self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!(task_id = %self.task_id, task_type = %self.task_type, "EphemeralGuard::drop: ephemeral mode disabled");
        }
    }
}

/// Sensitive-task-type set plus optional budget enforcement. The set is
/// configurable (not a hardcoded match) so a caller can widen it without a
/// code change, but defaults to the spec's `{scaffold, deps_fix}`.
pub struct GuardrailHook {
    sensitive_types: Vec<String>,
}

impl Default for GuardrailHook {
    fn default() -> Self {
        Self {
            sensitive_types: SENSITIVE_TASK_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl GuardrailHook {
    pub fn new(sensitive_types: Vec<String>) -> Self {
        Self { sensitive_types }
    }

    pub fn is_sensitive(&self, task_type: &str) -> bool {
        self.sensitive_types.iter().any(|t| t == task_type)
    }

    /// `enable-ephemeral(task-id, type, ttl)`. Returns a guard regardless of
    /// whether `task_type` is actually sensitive, so the Orchestrator can
    /// call this unconditionally ahead of every dispatch rather than
    /// branching on task type itself; the guard is simply inert for a
    /// non-sensitive type.
    pub fn enable_ephemeral(&self, task_id: &str, task_type: &str, ttl: Duration) -> EphemeralGuard {
        let sensitive = self.is_sensitive(task_type);
        if sensitive {
            info!(task_id, task_type, ?ttl, "GuardrailHook::enable_ephemeral: ephemeral mode enabled");
        } else {
            debug!(task_id, task_type, "GuardrailHook::enable_ephemeral: task type not sensitive, no-op guard");
        }
        EphemeralGuard {
            task_id: task_id.to_string(),
            task_type: task_type.to_string(),
            enabled: Arc::new(AtomicBool::new(sensitive)),
        }
    }

    /// `validate(task-id, files, changed-lines)`. A budget field left unset
    /// is unconstrained; a declared budget that's exceeded blocks execution
    /// before a single step runs.
    pub fn validate(&self, task_id: &str, files_touched: u32, changed_lines: u32, budgets: &Budgets) -> Result<(), GuardrailError> {
        if let Some(max) = budgets.max_files {
            if files_touched > max {
                warn!(task_id, files_touched, max, "GuardrailHook::validate: file budget exceeded");
                return Err(GuardrailError::FileBudgetExceeded {
                    task_id: task_id.to_string(),
                    touched: files_touched,
                    max,
                });
            }
        }
        if let Some(max) = budgets.max_changed_lines {
            if changed_lines > max {
                warn!(task_id, changed_lines, max, "GuardrailHook::validate: changed-line budget exceeded");
                return Err(GuardrailError::LineBudgetExceeded {
                    task_id: task_id.to_string(),
                    changed: changed_lines,
                    max,
                });
            }
        }
        Ok(())
    }
}

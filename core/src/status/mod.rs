//! Status & Log Projection: derived, read-only views over a task's
//! `TaskStatus` and its materialized event log. Never a source of truth —
//! the Orchestrator owns `TaskStatus` mutation; this module only computes
//! views from it.
//!
//! Grounded on the teacher's `progress::strategy::ProgressStrategy`/
//! `system_captured::SystemCapturedProgress` ("derive a view from recorded
//! state, never recompute the state itself") and `td::events::logger`'s
//! event-to-log-line formatting, narrowed to this spec's closed
//! `OrchestratorEvent` vocabulary.

use chrono::Utc;

use crate::domain::{LogEntry, LogLevel, TaskState, TaskStatus};
use crate::orchestrator::OrchestratorEvent;

const DEFAULT_MAX_ETA_SECS: i64 = 60 * 60;
const DEFAULT_ETA_WHEN_UNKNOWN_SECS: i64 = 5 * 60;
const MIN_PROGRESS_FOR_ETA: f64 = 0.01;

/// `GetAutonomousTaskStatus` response shape: everything the status record
/// carries, plus the two values the status record doesn't itself store
/// (current step label the caller supplies, and estimated time remaining).
#[derive(Debug, Clone)]
pub struct StatusView {
    pub task_id: String,
    pub state: TaskState,
    pub progress_percent: f64,
    pub message: String,
    pub error: Option<String>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub updated_at: chrono::DateTime<Utc>,
    pub estimated_time_remaining_secs: i64,
}

/// Project a `TaskStatus` into the external status view. `updated_at`
/// defaults to now since `TaskStatus` itself doesn't track a per-field
/// last-touched timestamp — `completed_at` when terminal, otherwise the
/// instant of projection.
pub fn project(status: &TaskStatus) -> StatusView {
    let updated_at = status.completed_at.unwrap_or_else(Utc::now);
    StatusView {
        task_id: status.task_id.clone(),
        state: status.state,
        progress_percent: status.progress * 100.0,
        message: status.message.clone(),
        error: status.error.clone(),
        started_at: status.started_at,
        updated_at,
        estimated_time_remaining_secs: estimated_time_remaining(status),
    }
}

/// `elapsed * (1 - progress) / progress`, clamped to
/// `[0, DEFAULT_MAX_ETA_SECS]`; 0 in a terminal state; the default fallback
/// when progress is too small to extrapolate from or the task never
/// started.
pub fn estimated_time_remaining(status: &TaskStatus) -> i64 {
    if status.state.is_terminal() {
        return 0;
    }
    let started_at = match status.started_at {
        Some(t) => t,
        None => return DEFAULT_ETA_WHEN_UNKNOWN_SECS,
    };
    if status.progress < MIN_PROGRESS_FOR_ETA {
        return DEFAULT_ETA_WHEN_UNKNOWN_SECS;
    }
    let elapsed_secs = (Utc::now() - started_at).num_seconds().max(0) as f64;
    let remaining = elapsed_secs * (1.0 - status.progress) / status.progress;
    (remaining.round() as i64).clamp(0, DEFAULT_MAX_ETA_SECS)
}

/// Fold one `OrchestratorEvent` into a materialized `LogEntry`, the shape
/// `Orchestrator::emit` appends to a task's log stream per §4.6.1/§4.9 — the
/// log projection never re-derives this from anything but the event itself.
pub fn log_entry_from_event(event: &OrchestratorEvent) -> LogEntry {
    match event {
        OrchestratorEvent::TaskStarted { task_id, timestamp } => LogEntry {
            id: format!("{task_id}-started"),
            task_id: task_id.clone(),
            level: LogLevel::Info,
            message: "Task started".to_string(),
            timestamp: *timestamp,
            metadata: serde_json::Value::Null,
        },
        OrchestratorEvent::TaskProgressed { task_id, progress, message, timestamp } => LogEntry {
            id: format!("{task_id}-progress-{}", (progress * 1000.0) as i64),
            task_id: task_id.clone(),
            level: LogLevel::Info,
            message: message.clone(),
            timestamp: *timestamp,
            metadata: serde_json::json!({"progress": progress}),
        },
        OrchestratorEvent::TaskRepaired { task_id, attempt, timestamp } => LogEntry {
            id: format!("{task_id}-repaired-{attempt}"),
            task_id: task_id.clone(),
            level: LogLevel::Info,
            message: format!("Repair attempt {attempt} applied"),
            timestamp: *timestamp,
            metadata: serde_json::json!({"attempt": attempt}),
        },
        OrchestratorEvent::TaskCompleted { task_id, timestamp } => LogEntry {
            id: format!("{task_id}-completed"),
            task_id: task_id.clone(),
            level: LogLevel::Info,
            message: "Task completed successfully".to_string(),
            timestamp: *timestamp,
            metadata: serde_json::Value::Null,
        },
        OrchestratorEvent::TaskFailed { task_id, error, timestamp } => LogEntry {
            id: format!("{task_id}-failed"),
            task_id: task_id.clone(),
            level: LogLevel::Error,
            message: error.clone(),
            timestamp: *timestamp,
            metadata: serde_json::Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn status_running_with(progress: f64, started_secs_ago: i64) -> TaskStatus {
        let mut status = TaskStatus::new("t1");
        status.start();
        status.started_at = Some(Utc::now() - Duration::seconds(started_secs_ago));
        status.progress = progress;
        status
    }

    #[test]
    fn test_eta_is_zero_in_terminal_state() {
        let mut status = TaskStatus::new("t1");
        status.start();
        status.finish_done("done");
        assert_eq!(estimated_time_remaining(&status), 0);
    }

    #[test]
    fn test_eta_is_default_when_not_started() {
        let status = TaskStatus::new("t1");
        assert_eq!(estimated_time_remaining(&status), DEFAULT_ETA_WHEN_UNKNOWN_SECS);
    }

    #[test]
    fn test_eta_is_default_when_progress_too_small() {
        let status = status_running_with(0.001, 30);
        assert_eq!(estimated_time_remaining(&status), DEFAULT_ETA_WHEN_UNKNOWN_SECS);
    }

    #[test]
    fn test_eta_extrapolates_from_elapsed_and_progress() {
        let status = status_running_with(0.5, 100);
        let eta = estimated_time_remaining(&status);
        assert!((90..=110).contains(&eta), "expected ~100s, got {eta}");
    }

    #[test]
    fn test_eta_clamped_to_max() {
        let status = status_running_with(0.001_01, 10_000_000);
        assert_eq!(estimated_time_remaining(&status), DEFAULT_MAX_ETA_SECS);
    }

    #[test]
    fn test_project_converts_progress_to_percent() {
        let mut status = TaskStatus::new("t1");
        status.start();
        status.set_progress(0.42, "working");
        let view = project(&status);
        assert!((view.progress_percent - 42.0).abs() < f64::EPSILON);
        assert_eq!(view.state, TaskState::Running);
    }

    #[test]
    fn test_log_entry_from_task_failed_event_is_error_level() {
        let event = OrchestratorEvent::TaskFailed {
            task_id: "t1".to_string(),
            error: "boom".to_string(),
            timestamp: Utc::now(),
        };
        let entry = log_entry_from_event(&event);
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.message, "boom");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn status_at(progress: f64, elapsed_secs: i64) -> TaskStatus {
        let mut status = TaskStatus::new("t1");
        status.start();
        status.started_at = Some(Utc::now() - Duration::seconds(elapsed_secs));
        status.progress = progress;
        status
    }

    proptest! {
        /// For a fixed elapsed time, ETA is non-increasing as progress
        /// increases: more work done never extrapolates to more time left.
        #[test]
        fn eta_is_monotonically_non_increasing_in_progress(
            elapsed in 1i64..100_000,
            low in MIN_PROGRESS_FOR_ETA..0.9,
            delta in 0.0001f64..0.1,
        ) {
            let high = (low + delta).min(0.999);
            let eta_low = estimated_time_remaining(&status_at(low, elapsed));
            let eta_high = estimated_time_remaining(&status_at(high, elapsed));
            prop_assert!(eta_high <= eta_low);
        }

        /// ETA is always within the documented bounds regardless of input.
        #[test]
        fn eta_is_always_within_bounds(progress in 0.0f64..1.0, elapsed in 0i64..50_000_000) {
            let eta = estimated_time_remaining(&status_at(progress, elapsed));
            prop_assert!(eta >= 0 && eta <= DEFAULT_MAX_ETA_SECS);
        }
    }
}

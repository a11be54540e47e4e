//! TaskState and TaskStatus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle state.
///
/// Done/Failed/Blocked are terminal for the status record; transitioning out
/// of them only happens via an explicit `resume` (Blocked -> Todo). Done is a
/// true sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Todo,
    Running,
    Done,
    Failed,
    Blocked,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Blocked)
    }

    /// Parse the lowercase tag the status file stores back into a state.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "todo" => Some(Self::Todo),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "todo"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// The orchestrator's durable-intent view of a task's progress.
///
/// Owned exclusively by the Orchestrator; the Repository only persists it,
/// never mutates it. `started_at` is set once and never cleared;
/// `completed_at`/`duration` are set exactly once, together, on first entry
/// into a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub state: TaskState,

    /// Fractional progress in [0.0, 1.0], non-decreasing within one execution.
    pub progress: f64,

    pub message: String,

    pub error: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall-clock duration in milliseconds, set alongside `completed_at`.
    pub duration_ms: Option<i64>,
}

impl TaskStatus {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Todo,
            progress: 0.0,
            message: "Created".to_string(),
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Advance progress; never decreases it.
    pub fn set_progress(&mut self, progress: f64, message: impl Into<String>) {
        let clamped = progress.clamp(0.0, 1.0);
        self.progress = self.progress.max(clamped);
        self.message = message.into();
    }

    /// Transition into Running, stamping `started_at` the first time only.
    pub fn start(&mut self) {
        self.state = TaskState::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Enter a terminal state, stamping `completed_at`/`duration_ms` exactly
    /// once (subsequent calls on an already-terminal status are no-ops, which
    /// is what keeps the "set exactly once" invariant true even if a caller
    /// calls finish twice).
    fn finish(&mut self, state: TaskState, message: impl Into<String>, error: Option<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.message = message.into();
        self.error = error;
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some(
            self.started_at
                .map(|start| (now - start).num_milliseconds())
                .unwrap_or(0),
        );
    }

    pub fn finish_done(&mut self, message: impl Into<String>) {
        self.progress = self.progress.max(1.0);
        self.finish(TaskState::Done, message, None);
    }

    pub fn finish_failed(&mut self, message: impl Into<String>, error: impl Into<String>) {
        self.finish(TaskState::Failed, message, Some(error.into()));
    }

    pub fn block(&mut self, message: impl Into<String>) {
        self.state = TaskState::Blocked;
        self.message = message.into();
    }

    pub fn unblock(&mut self) {
        if self.state == TaskState::Blocked {
            self.state = TaskState::Todo;
        }
    }
}

//! ContextPack, RepairStrategy, LogEntry — small value types shared across
//! the Planner's LLM call, Protocol Integration's correction-guidance call,
//! and the Status & Log Projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::SlaPolicy;

/// Facts handed to an LLM call that needs to reason about a task: the
/// planner's policy request and the protocol integration's correction
/// request both build one of these rather than passing a raw `Task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPack {
    pub project_path: String,
    pub sla: SlaPolicy,
    pub task_text: String,
    pub languages: Vec<String>,
    pub changed_files: Vec<String>,
}

/// Repair approach carried on a repair step's config. Only `AutoFix` is
/// driven automatically today; the others are reserved for a future
/// planner-chosen strategy so the data model doesn't need to change when
/// that lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    AutoFix,
    TargetedPatch,
    Rewrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub task_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

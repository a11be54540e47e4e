//! Task: the user-submitted unit of autonomous work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scheduling tier — an input to planning, not enforced by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaPolicy {
    Lite,
    Standard,
    Strict,
}

impl SlaPolicy {
    /// Parse from a free-form string, the shape a transport-layer request arrives in.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "lite" => Some(Self::Lite),
            "standard" => Some(Self::Standard),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

impl std::fmt::Display for SlaPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lite => write!(f, "lite"),
            Self::Standard => write!(f, "standard"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

/// Budgets bounding how much a task is allowed to change (mirrors the plan
/// file's `budgets` block).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Budgets {
    pub max_files: Option<u32>,
    pub max_changed_lines: Option<u32>,
}

/// A user-submitted unit of autonomous work.
///
/// Created when loaded from the plan file or submitted via the autonomous
/// API; mutated only by the Orchestrator's state machine; not itself durable
/// (the status record, not the Task, is what persists across process exit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,

    /// Ids of prerequisite tasks that must reach Done before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub step_file: Option<String>,

    #[serde(default)]
    pub budgets: Budgets,

    /// Free-form task metadata: project path, requested languages, SLA tier,
    /// and anything a planner or protocol stage wants to read back out.
    #[serde(default)]
    pub metadata: Value,

    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build a task for submission through the autonomous API
    /// (`StartAutonomousTask`). `id` is allocated by the caller (the
    /// Orchestrator), not chosen by the submitter.
    pub fn new(id: impl Into<String>, description: impl Into<String>, project_path: impl Into<String>, sla: SlaPolicy) -> Self {
        let description = description.into();
        let metadata = serde_json::json!({
            "description": description,
            "project_path": project_path.into(),
            "sla": sla.to_string(),
        });
        Self {
            id: id.into(),
            name: description,
            depends_on: Vec::new(),
            step_file: None,
            budgets: Budgets::default(),
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn project_path(&self) -> Option<&str> {
        self.metadata.get("project_path").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.metadata.get("description").and_then(Value::as_str)
    }

    pub fn sla(&self) -> Option<SlaPolicy> {
        self.metadata.get("sla").and_then(Value::as_str).and_then(SlaPolicy::parse)
    }

    pub fn languages(&self) -> Vec<String> {
        self.metadata
            .get("languages")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sla_policy_parse() {
        assert_eq!(SlaPolicy::parse("lite"), Some(SlaPolicy::Lite));
        assert_eq!(SlaPolicy::parse("standard"), Some(SlaPolicy::Standard));
        assert_eq!(SlaPolicy::parse("strict"), Some(SlaPolicy::Strict));
        assert_eq!(SlaPolicy::parse(""), None);
        assert_eq!(SlaPolicy::parse("bogus"), None);
    }

    #[test]
    fn test_task_accessors() {
        let task = Task::new("autonomous_1", "add endpoint /ping", "/p", SlaPolicy::Standard);
        assert_eq!(task.project_path(), Some("/p"));
        assert_eq!(task.description(), Some("add endpoint /ping"));
        assert_eq!(task.sla(), Some(SlaPolicy::Standard));
    }
}

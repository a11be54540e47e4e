//! Step and StepType: the atomic units dispatched within a Pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed dispatch tag for a step. Planner-defined tags fall through to the
/// executor's generic shell-command handler rather than being rejected — the
/// enum still needs a variant to carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepType {
    Analysis,
    Build,
    Test,
    Repair,
    /// A planner-defined tag not in the heuristic planner's fixed vocabulary.
    Custom { name: String },
}

impl StepType {
    pub fn label(&self) -> &str {
        match self {
            Self::Analysis => "analysis",
            Self::Build => "build",
            Self::Test => "test",
            Self::Repair => "repair",
            Self::Custom { name } => name,
        }
    }
}

/// A step's status. Transitions monotonically Pending -> Running ->
/// (Completed | Failed); a step is Completed only after every step it
/// depends on is Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// An atomic unit of work within a Pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub step_type: StepType,
    pub status: StepStatus,

    /// Repair steps are `priority = 1` so they are never deferred behind
    /// regular work.
    pub priority: u32,

    /// Ids of steps in the same pipeline that must be Completed first.
    pub depends_on: Vec<String>,

    /// Free-form parameters consumed by the step's handler.
    pub config: Value,

    pub error: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type,
            status: StepStatus::Pending,
            priority: 0,
            depends_on: Vec::new(),
            config: Value::Null,
            error: None,
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether every id in `depends_on` is present (and Completed) in `completed_ids`.
    pub fn dependencies_satisfied(&self, completed_ids: &std::collections::HashSet<String>) -> bool {
        self.depends_on.iter().all(|dep| completed_ids.contains(dep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_dependencies_satisfied() {
        let step = Step::new("s2", "Test", StepType::Test).with_depends_on(vec!["s1".to_string()]);

        let mut completed = HashSet::new();
        assert!(!step.dependencies_satisfied(&completed));

        completed.insert("s1".to_string());
        assert!(step.dependencies_satisfied(&completed));
    }

    #[test]
    fn test_step_type_label() {
        assert_eq!(StepType::Build.label(), "build");
        assert_eq!(StepType::Custom { name: "lint".into() }.label(), "lint");
    }
}

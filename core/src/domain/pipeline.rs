//! Pipeline and PipelinePolicy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Fail-fast and other planner-chosen scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePolicy {
    /// If true, the first Failed step collapses the whole pipeline
    /// immediately. If false, independent steps continue running.
    pub fail_fast: bool,

    /// If true, each wave of ready steps runs concurrently. Default false:
    /// sequential execution is kept as the default to preserve deterministic
    /// ordering.
    pub parallel: bool,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            fail_fast: true,
            parallel: false,
        }
    }
}

/// An ordered, DAG-structured sequence of Steps planned for a Task.
///
/// A pipeline is a value object: the planner produces it and never mutates
/// it afterward; the executor works on a clone so that every retry begins
/// from the same canonical definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub task_id: String,
    pub steps: Vec<Step>,
    pub state: PipelineState,
    pub policy: PipelinePolicy,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Pipeline {
    pub fn new(task_id: impl Into<String>, steps: Vec<Step>, policy: PipelinePolicy) -> Self {
        Self {
            task_id: task_id.into(),
            steps,
            state: PipelineState::Pending,
            policy,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// A fresh, unexecuted copy of this pipeline's definition — what the
    /// executor is handed on every retry attempt, leaving the base pipeline
    /// untouched.
    pub fn fresh_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.state = PipelineState::Pending;
        copy.started_at = None;
        copy.completed_at = None;
        copy.error = None;
        for step in &mut copy.steps {
            step.status = super::step::StepStatus::Pending;
            step.error = None;
        }
        copy
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn first_failed_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.status == super::step::StepStatus::Failed)
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == super::step::StepStatus::Completed)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::step::{Step, StepType};

    #[test]
    fn test_fresh_copy_resets_step_status() {
        let mut pipeline = Pipeline::new("t1", vec![Step::new("s1", "Build", StepType::Build)], PipelinePolicy::default());
        pipeline.state = PipelineState::Failed;
        pipeline.step_mut("s1").unwrap().status = super::super::step::StepStatus::Failed;
        pipeline.step_mut("s1").unwrap().error = Some("boom".to_string());

        let fresh = pipeline.fresh_copy();
        assert_eq!(fresh.state, PipelineState::Pending);
        assert_eq!(fresh.steps[0].status, super::super::step::StepStatus::Pending);
        assert!(fresh.steps[0].error.is_none());
    }

    #[test]
    fn test_first_failed_step_finds_earliest() {
        let mut pipeline = Pipeline::new(
            "t1",
            vec![
                Step::new("s1", "Analysis", StepType::Analysis),
                Step::new("s2", "Build", StepType::Build),
            ],
            PipelinePolicy::default(),
        );
        pipeline.step_mut("s2").unwrap().status = super::super::step::StepStatus::Failed;
        let failed = pipeline.first_failed_step().unwrap();
        assert_eq!(failed.id, "s2");
    }
}

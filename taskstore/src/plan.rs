//! Plan document parsing and validation
//!
//! The plan file is a YAML document listing the tasks a catalog knows about,
//! their dependencies, and their declared budgets. It is the durable input to
//! the Task Catalog Repository (core orchestration spec §4.7, §6): the
//! orchestrator's in-memory `Task` values are built from `PlanTask` records
//! loaded here.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;

/// Currently supported plan document schema version
pub const SUPPORTED_VERSION: u32 = 1;

/// Per-task budgets limiting how much a task is allowed to change
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Budgets {
    #[serde(rename = "maxFiles", default)]
    pub max_files: Option<u32>,

    #[serde(rename = "maxChangedLines", default)]
    pub max_changed_lines: Option<u32>,
}

/// A single task record as declared in the plan file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanTask {
    pub id: String,

    pub name: String,

    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<String>,

    #[serde(rename = "stepFile", default)]
    pub step_file: Option<PathBuf>,

    #[serde(default)]
    pub budgets: Budgets,

    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "todo".to_string()
}

/// The full plan document: a version tag plus the task list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    pub version: u32,

    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

impl PlanDocument {
    /// Load and parse a plan document from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!(?path, "PlanDocument::load: called");
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let doc: PlanDocument = serde_yaml::from_str(&content)?;
        if doc.version != SUPPORTED_VERSION {
            return Err(StoreError::UnsupportedVersion(doc.version));
        }
        info!(task_count = doc.tasks.len(), ?path, "PlanDocument::load: parsed plan document");
        Ok(doc)
    }

    /// Validate the plan: unique ids, acyclic dependency graph, existing step files.
    ///
    /// `base_dir` anchors relative step-file paths (typically the directory the
    /// plan file lives in).
    pub fn validate(&self, base_dir: impl AsRef<Path>) -> Result<(), StoreError> {
        let base_dir = base_dir.as_ref();
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(StoreError::DuplicateId(task.id.clone()));
            }
        }

        for task in &self.tasks {
            if let Some(step_file) = &task.step_file {
                let full_path = if step_file.is_absolute() {
                    step_file.clone()
                } else {
                    base_dir.join(step_file)
                };
                if !full_path.exists() {
                    return Err(StoreError::MissingStepFile {
                        task: task.id.clone(),
                        step_file: step_file.display().to_string(),
                    });
                }
            }
        }

        validate_acyclic(&self.tasks)?;

        Ok(())
    }

    /// The plain task list, the shape the Repository exposes to the orchestrator.
    pub fn into_tasks(self) -> Vec<PlanTask> {
        self.tasks
    }
}

/// DFS cycle detection over the `dependsOn` graph.
///
/// Mirrors the dependency-graph validation used by the pipeline planner
/// (`InvalidPlan`) and by the whole-plan execution pass (`CircularDependency`):
/// same algorithm, reused here so the plan file itself never admits a cycle.
fn validate_acyclic(tasks: &[PlanTask]) -> Result<(), StoreError> {
    let by_id: HashMap<&str, &PlanTask> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut visited = HashSet::new();
    let mut stack = HashSet::new();
    let mut path = Vec::new();

    for task in tasks {
        if !visited.contains(task.id.as_str()) && has_cycle(&task.id, &by_id, &mut visited, &mut stack, &mut path) {
            return Err(StoreError::CircularDependency(path.join(" -> ")));
        }
    }
    Ok(())
}

fn has_cycle<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a PlanTask>,
    visited: &mut HashSet<&'a str>,
    stack: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    stack.insert(node);
    path.push(node.to_string());

    if let Some(task) = graph.get(node) {
        for dep in &task.depends_on {
            if !visited.contains(dep.as_str()) {
                if graph.contains_key(dep.as_str()) && has_cycle(dep.as_str(), graph, visited, stack, path) {
                    return true;
                }
            } else if stack.contains(dep.as_str()) {
                path.push(dep.clone());
                return true;
            }
        }
    }

    stack.remove(node);
    path.pop();
    false
}

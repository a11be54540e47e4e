//! Pipeline Planner: turn a Task into an ordered step graph, either
//! heuristically or by consulting an LLM.
//!
//! Grounded on the teacher's `PlanDecomposer` (LLM structured output parsed
//! into domain objects, two-pass id resolution, dependency validation before
//! persistence) and `loop::manager`'s `validate_dependency_graph`/
//! `has_cycle_dfs`, reused near-verbatim for `InvalidPlan` cycle rejection.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{derive_step_id, ContextPack, Pipeline, PipelinePolicy, Step, StepType, Task};
use crate::llm::{GenerateRequest, Provider};

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("pipeline contains a cycle: {0}")]
    Cycle(String),

    #[error("planner produced an empty pipeline")]
    Empty,
}

/// Languages that imply a separate compile step ahead of test.
const COMPILED_LANGUAGES: &[&str] = &["rust", "go", "c", "cpp", "java"];

/// A single step as named by either the heuristic planner or an LLM
/// response, before dependency names are resolved into the deterministic
/// step ids the domain `Step` type carries.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub name: String,
    pub step_type: StepType,
    pub depends_on: Vec<String>,
    pub config: serde_json::Value,
}

impl PlannedStep {
    pub fn new(name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            name: name.into(),
            step_type,
            depends_on: Vec::new(),
            config: serde_json::Value::Null,
        }
    }

    pub fn depends_on(mut self, names: Vec<String>) -> Self {
        self.depends_on = names;
        self
    }
}

/// A full plan: the pipeline-level policy plus the named step graph, either
/// chosen heuristically or returned by an LLM.
#[derive(Debug, Clone)]
pub struct PlannedPolicy {
    pub pipeline_policy: PipelinePolicy,
    pub steps: Vec<PlannedStep>,
}

/// `create-pipeline(task, optional policy)`. If `policy` is supplied
/// (LLM-authored), it is honored as-is; otherwise a heuristic default is
/// built from the task's requested languages.
pub fn create_pipeline(task: &Task, policy: Option<PlannedPolicy>) -> Result<Pipeline, PlannerError> {
    let planned = policy.unwrap_or_else(|| heuristic_policy(task));
    assemble_pipeline(task, planned)
}

/// `create-pipeline-with-llm(task, context-pack)`. Asks the LLM for a policy;
/// on refusal, network failure, or a malformed/cyclic response the caller
/// gets the heuristic policy instead, with `fallback_used=true` so upstream
/// status messages can say planning fell back.
pub async fn create_pipeline_with_llm(
    task: &Task,
    context: &ContextPack,
    provider: &dyn Provider,
    cancel: CancellationToken,
) -> (PlannedPolicy, bool) {
    match request_llm_policy(task, context, provider, cancel).await {
        Some(policy) if validate_acyclic(task, &policy).is_ok() && !policy.steps.is_empty() => (policy, false),
        Some(_) => {
            warn!(task_id = %task.id, "create_pipeline_with_llm: llm plan rejected (cycle or empty), falling back");
            (heuristic_policy(task), true)
        }
        None => {
            debug!(task_id = %task.id, "create_pipeline_with_llm: llm call failed or malformed, falling back");
            (heuristic_policy(task), true)
        }
    }
}

async fn request_llm_policy(task: &Task, context: &ContextPack, provider: &dyn Provider, cancel: CancellationToken) -> Option<PlannedPolicy> {
    let system = "You plan a pipeline of steps to accomplish a coding task. Respond with JSON only: \
        {\"fail_fast\": bool, \"parallel\": bool, \"steps\": [{\"name\": string, \"type\": \"analysis\"|\"build\"|\"test\"|\"custom\", \"depends_on\": [string]}]}";
    let user = format!(
        "Task: {}\nProject: {}\nSLA: {}\nLanguages: {}\n",
        context.task_text,
        context.project_path,
        context.sla,
        context.languages.join(", ")
    );
    let request = GenerateRequest::new(task_model_hint(task), system, user).with_grammar("{}", vec!["steps".to_string()]);

    let response = provider.generate(request, cancel).await.ok()?;
    parse_llm_plan(&response.content)
}

/// The planner doesn't own model selection; it asks for whatever the task's
/// metadata requests, defaulting to a name the registry will reject loudly
/// rather than silently substitute.
fn task_model_hint(task: &Task) -> String {
    task.metadata
        .get("model")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("default")
        .to_string()
}

fn parse_llm_plan(content: &str) -> Option<PlannedPolicy> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    let steps_value = value.get("steps")?.as_array()?;
    if steps_value.is_empty() {
        return None;
    }
    let mut steps = Vec::with_capacity(steps_value.len());
    for raw in steps_value {
        let name = raw.get("name")?.as_str()?.to_string();
        let step_type = match raw.get("type").and_then(serde_json::Value::as_str) {
            Some("analysis") => StepType::Analysis,
            Some("build") => StepType::Build,
            Some("test") => StepType::Test,
            Some("repair") => StepType::Repair,
            Some(other) => StepType::Custom { name: other.to_string() },
            None => StepType::Custom { name: name.clone() },
        };
        let depends_on = raw
            .get("depends_on")
            .and_then(serde_json::Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        steps.push(PlannedStep { name, step_type, depends_on, config: serde_json::Value::Null });
    }
    let pipeline_policy = PipelinePolicy {
        fail_fast: value.get("fail_fast").and_then(serde_json::Value::as_bool).unwrap_or(true),
        parallel: value.get("parallel").and_then(serde_json::Value::as_bool).unwrap_or(false),
    };
    Some(PlannedPolicy { pipeline_policy, steps })
}

/// The default step set: `Analysis` always first, `Build` appended when a
/// requested language implies a compile step, `Test` depending on whichever
/// of those ran last — the same fixed-vocabulary shape as the teacher's
/// `DecomposerConfig` default `loop_types` list, narrowed to this spec's step
/// type vocabulary.
fn heuristic_policy(task: &Task) -> PlannedPolicy {
    let languages = task.languages();
    let needs_build = languages.iter().any(|lang| COMPILED_LANGUAGES.contains(&lang.as_str()));

    let mut steps = vec![PlannedStep::new("Analysis", StepType::Analysis)];
    let mut last = "Analysis".to_string();
    if needs_build {
        steps.push(PlannedStep::new("Build", StepType::Build).depends_on(vec![last.clone()]));
        last = "Build".to_string();
    }
    steps.push(PlannedStep::new("Test", StepType::Test).depends_on(vec![last]));

    PlannedPolicy {
        pipeline_policy: PipelinePolicy::default(),
        steps,
    }
}

fn assemble_pipeline(task: &Task, planned: PlannedPolicy) -> Result<Pipeline, PlannerError> {
    if planned.steps.is_empty() {
        return Err(PlannerError::Empty);
    }
    validate_acyclic(task, &planned)?;

    let name_to_id: HashMap<String, String> = planned
        .steps
        .iter()
        .map(|s| (s.name.clone(), derive_step_id(&task.id, &s.name)))
        .collect();

    let steps: Vec<Step> = planned
        .steps
        .iter()
        .map(|planned_step| {
            let id = name_to_id[&planned_step.name].clone();
            let depends_on = planned_step.depends_on.iter().filter_map(|name| name_to_id.get(name).cloned()).collect();
            let priority = if planned_step.step_type == StepType::Repair { 1 } else { 0 };
            Step::new(id, planned_step.name.clone(), planned_step.step_type.clone())
                .with_depends_on(depends_on)
                .with_config(planned_step.config.clone())
                .with_priority(priority)
        })
        .collect();

    Ok(Pipeline::new(task.id.clone(), steps, planned.pipeline_policy))
}

fn validate_acyclic(task: &Task, planned: &PlannedPolicy) -> Result<(), PlannerError> {
    let names: HashSet<&str> = planned.steps.iter().map(|s| s.name.as_str()).collect();
    let graph: HashMap<&str, Vec<&str>> = planned
        .steps
        .iter()
        .map(|s| (s.name.as_str(), s.depends_on.iter().map(String::as_str).filter(|d| names.contains(d)).collect()))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    for step in &planned.steps {
        if !visited.contains(step.name.as_str()) {
            let mut path = Vec::new();
            if has_cycle_dfs(step.name.as_str(), &graph, &mut visited, &mut rec_stack, &mut path) {
                return Err(PlannerError::Cycle(format!("{} (task {})", path.join(" -> "), task.id)));
            }
        }
    }
    Ok(())
}

fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node.to_string());

    if let Some(deps) = graph.get(node) {
        for &dep in deps {
            if !visited.contains(dep) {
                if has_cycle_dfs(dep, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(dep) {
                path.push(dep.to_string());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SlaPolicy;
    use crate::llm::client::mock::MockProvider;

    fn task_with_languages(langs: &[&str]) -> Task {
        let mut task = Task::new("autonomous_1", "add endpoint", "/p", SlaPolicy::Standard);
        task.metadata["languages"] = serde_json::json!(langs);
        task
    }

    #[test]
    fn test_heuristic_policy_skips_build_for_interpreted_language() {
        let task = task_with_languages(&["python"]);
        let pipeline = create_pipeline(&task, None).unwrap();
        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.steps[0].step_type, StepType::Analysis);
        assert_eq!(pipeline.steps[1].step_type, StepType::Test);
        assert_eq!(pipeline.steps[1].depends_on, vec![pipeline.steps[0].id.clone()]);
    }

    #[test]
    fn test_heuristic_policy_adds_build_for_compiled_language() {
        let task = task_with_languages(&["rust"]);
        let pipeline = create_pipeline(&task, None).unwrap();
        assert_eq!(pipeline.steps.len(), 3);
        assert_eq!(pipeline.steps[1].step_type, StepType::Build);
        assert_eq!(pipeline.steps[2].depends_on, vec![pipeline.steps[1].id.clone()]);
    }

    #[test]
    fn test_step_ids_are_deterministic_across_plans_of_same_task() {
        let task = task_with_languages(&["rust"]);
        let p1 = create_pipeline(&task, None).unwrap();
        let p2 = create_pipeline(&task, None).unwrap();
        assert_eq!(p1.steps[0].id, p2.steps[0].id);
    }

    #[test]
    fn test_cyclic_plan_is_rejected() {
        let task = task_with_languages(&[]);
        let planned = PlannedPolicy {
            pipeline_policy: PipelinePolicy::default(),
            steps: vec![
                PlannedStep::new("A", StepType::Analysis).depends_on(vec!["B".to_string()]),
                PlannedStep::new("B", StepType::Build).depends_on(vec!["A".to_string()]),
            ],
        };
        let err = create_pipeline(&task, Some(planned)).unwrap_err();
        assert!(matches!(err, PlannerError::Cycle(_)));
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let task = task_with_languages(&[]);
        let planned = PlannedPolicy {
            pipeline_policy: PipelinePolicy::default(),
            steps: vec![],
        };
        let err = create_pipeline(&task, Some(planned)).unwrap_err();
        assert!(matches!(err, PlannerError::Empty));
    }

    #[tokio::test]
    async fn test_create_pipeline_with_llm_falls_back_on_malformed_response() {
        let task = task_with_languages(&["python"]);
        let context = ContextPack {
            project_path: "/p".to_string(),
            sla: SlaPolicy::Standard,
            task_text: "add endpoint".to_string(),
            languages: vec!["python".to_string()],
            changed_files: vec![],
        };
        let provider = MockProvider::new(vec![Ok("not json".to_string())]);
        let (policy, fallback_used) = create_pipeline_with_llm(&task, &context, &provider, CancellationToken::new()).await;
        assert!(fallback_used);
        assert_eq!(policy.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_create_pipeline_with_llm_honors_valid_response() {
        let task = task_with_languages(&["python"]);
        let context = ContextPack {
            project_path: "/p".to_string(),
            sla: SlaPolicy::Standard,
            task_text: "add endpoint".to_string(),
            languages: vec!["python".to_string()],
            changed_files: vec![],
        };
        let plan = serde_json::json!({
            "fail_fast": false,
            "parallel": false,
            "steps": [{"name": "Analysis", "type": "analysis", "depends_on": []}],
        })
        .to_string();
        let provider = MockProvider::new(vec![Ok(plan)]);
        let (policy, fallback_used) = create_pipeline_with_llm(&task, &context, &provider, CancellationToken::new()).await;
        assert!(!fallback_used);
        assert_eq!(policy.steps.len(), 1);
        assert!(!policy.pipeline_policy.fail_fast);
    }
}

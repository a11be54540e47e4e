//! Protocol Integration: wraps a task execution in a verification protocol
//! (lint/build/test/guardrail stages) and a self-correction policy that can
//! request AI-assisted correction guidance when a stage fails.
//!
//! Grounded on the teacher's `loop::validation`'s multi-stage verification
//! runner shape, and `planning::decomposer`'s structured-output-request
//! pattern reused here for correction guidance instead of plan generation.
//! Language detection is grounded on a simpler version of the same keyword
//! scan the teacher's `project-structure` detector uses internally.

use std::path::Path;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::{CommandError, CommandRunner};
use crate::domain::ContextPack;
use crate::llm::{GenerateRequest, LlmError, Provider};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("stage '{stage}' command failed: {source}")]
    StageFailed { stage: String, #[source] source: CommandError },

    #[error("self-correction requested but no llm provider is configured")]
    NoProviderForCorrection,

    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationStage {
    Linting,
    Building,
    Testing,
    Guardrails,
}

impl VerificationStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Linting => "linting",
            Self::Building => "building",
            Self::Testing => "testing",
            Self::Guardrails => "guardrails",
        }
    }
}

/// Which stages run and whether a failure triggers an AI-assisted
/// correction request before the protocol is re-run.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub stages: Vec<VerificationStage>,
    pub ai_assisted_correction: bool,
    pub max_correction_attempts: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            stages: vec![VerificationStage::Linting, VerificationStage::Building, VerificationStage::Testing, VerificationStage::Guardrails],
            ai_assisted_correction: true,
            max_correction_attempts: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: VerificationStage,
    pub passed: bool,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct ProtocolResult {
    pub passed: bool,
    pub stages: Vec<StageResult>,
    pub correction_guidance: Option<String>,
}

/// `execute(task-id)`: run every configured stage against `project_path` in
/// order, stopping at the first failing stage. On failure, when
/// `ai_assisted_correction` is enabled and a provider is available, asks the
/// LLM for correction guidance using the failed stage's output plus
/// `context`; the guidance is returned for the caller (the Orchestrator's
/// repair path) to act on rather than applied here.
pub async fn execute(
    project_path: &Path,
    config: &ProtocolConfig,
    context: &ContextPack,
    command_runner: &CommandRunner,
    llm_provider: Option<&dyn Provider>,
    cancel: CancellationToken,
) -> Result<ProtocolResult, ProtocolError> {
    let mut stages = Vec::with_capacity(config.stages.len());
    let mut first_failure: Option<StageResult> = None;

    for stage in &config.stages {
        let result = run_stage(*stage, project_path, &context.languages, command_runner, cancel.clone()).await?;
        if !result.passed && first_failure.is_none() {
            first_failure = Some(result.clone());
        }
        stages.push(result);
    }

    let passed = first_failure.is_none();
    let correction_guidance = if passed {
        None
    } else if !config.ai_assisted_correction {
        None
    } else {
        let failure = first_failure.expect("checked above");
        match llm_provider {
            Some(provider) => Some(request_correction_guidance(&failure, context, provider, cancel).await?),
            None => return Err(ProtocolError::NoProviderForCorrection),
        }
    };

    if passed {
        info!(project_path = %project_path.display(), "protocol::execute: all stages passed");
    } else {
        warn!(project_path = %project_path.display(), "protocol::execute: a verification stage failed");
    }

    Ok(ProtocolResult { passed, stages, correction_guidance })
}

async fn run_stage(
    stage: VerificationStage,
    project_path: &Path,
    languages: &[String],
    command_runner: &CommandRunner,
    cancel: CancellationToken,
) -> Result<StageResult, ProtocolError> {
    let command = stage_command(stage, languages);
    let args = vec!["-c".to_string(), command.clone()];
    match command_runner.run(project_path, "sh", &args, None, None, cancel).await {
        Ok(output) => Ok(StageResult { stage, passed: true, output: output.stdout_string() }),
        Err(CommandError::Failed { stderr, stdout, .. }) => {
            let output = if stderr.is_empty() { stdout } else { stderr };
            Ok(StageResult { stage, passed: false, output })
        }
        Err(other) => Err(ProtocolError::StageFailed { stage: stage.label().to_string(), source: other }),
    }
}

fn stage_command(stage: VerificationStage, languages: &[String]) -> String {
    let primary = languages.first().map(String::as_str).unwrap_or("rust");
    match (stage, primary) {
        (VerificationStage::Linting, "rust") => "cargo clippy --all-targets -- -D warnings".to_string(),
        (VerificationStage::Linting, "python") => "python -m pyflakes .".to_string(),
        (VerificationStage::Linting, "go") => "go vet ./...".to_string(),
        (VerificationStage::Linting, "typescript" | "javascript") => "npm run lint".to_string(),
        (VerificationStage::Building, "rust") => "cargo build".to_string(),
        (VerificationStage::Building, "go") => "go build ./...".to_string(),
        (VerificationStage::Building, "typescript" | "javascript") => "npm run build".to_string(),
        (VerificationStage::Building, "python") => "python -m py_compile .".to_string(),
        (VerificationStage::Testing, "rust") => "cargo test".to_string(),
        (VerificationStage::Testing, "python") => "pytest".to_string(),
        (VerificationStage::Testing, "go") => "go test ./...".to_string(),
        (VerificationStage::Testing, "typescript" | "javascript") => "npm test".to_string(),
        (VerificationStage::Guardrails, _) => "true".to_string(),
        _ => "true".to_string(),
    }
}

async fn request_correction_guidance(
    failure: &StageResult,
    context: &ContextPack,
    provider: &dyn Provider,
    cancel: CancellationToken,
) -> Result<String, ProtocolError> {
    let system = "You give targeted correction guidance for a failed verification stage. \
        Respond with JSON only: {\"guidance\": string}";
    let user = format!(
        "Stage: {}\nProject: {}\nLanguages: {}\nOutput:\n{}\n",
        failure.stage.label(),
        context.project_path,
        context.languages.join(", "),
        failure.output
    );
    let request = GenerateRequest::new("default", system, user).with_grammar("{}", vec!["guidance".to_string()]);
    let response = provider.generate(request, cancel).await?;
    let parsed: serde_json::Value = serde_json::from_str(&response.content).unwrap_or(serde_json::Value::Null);
    Ok(parsed.get("guidance").and_then(serde_json::Value::as_str).map(str::to_string).unwrap_or(response.content))
}

/// Fixed keyword table for §4.10.1's language detection: scans free-form
/// text (a task description, or a joined list of changed-file names) for
/// per-language marker tokens and returns every language with a hit.
pub fn detect_languages(text: &str) -> Vec<String> {
    const TABLE: &[(&str, &[&str])] = &[
        ("rust", &["cargo", ".rs", "Cargo.toml"]),
        ("python", &["pip", ".py", "requirements.txt"]),
        ("typescript", &["npm", "package.json", ".ts"]),
        ("javascript", &["npm", "package.json", ".js"]),
        ("go", &["go.mod", ".go"]),
    ];
    TABLE
        .iter()
        .filter(|(_, markers)| markers.iter().any(|marker| text.contains(marker)))
        .map(|(lang, _)| lang.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SlaPolicy;
    use crate::llm::client::mock::MockProvider;

    fn context() -> ContextPack {
        ContextPack {
            project_path: "/p".to_string(),
            sla: SlaPolicy::Standard,
            task_text: "add endpoint".to_string(),
            languages: vec!["rust".to_string()],
            changed_files: vec![],
        }
    }

    #[test]
    fn test_detect_languages_matches_rust_markers() {
        let langs = detect_languages("update Cargo.toml to add a dependency");
        assert!(langs.contains(&"rust".to_string()));
    }

    #[test]
    fn test_detect_languages_matches_multiple() {
        let langs = detect_languages("bump package.json and go.mod together");
        assert!(langs.contains(&"go".to_string()));
        assert!(langs.contains(&"typescript".to_string()) || langs.contains(&"javascript".to_string()));
    }

    #[test]
    fn test_detect_languages_empty_for_no_markers() {
        assert!(detect_languages("write a README paragraph").is_empty());
    }

    #[tokio::test]
    async fn test_execute_passes_when_all_stages_succeed() {
        let runner = CommandRunner::new(4);
        let config = ProtocolConfig {
            stages: vec![VerificationStage::Linting],
            ai_assisted_correction: true,
            max_correction_attempts: 1,
        };
        // "linting" maps to `cargo clippy`, which will fail with no cargo
        // project on disk; override via a guardrails-only config instead to
        // exercise the passing path deterministically.
        let passing_config = ProtocolConfig { stages: vec![VerificationStage::Guardrails], ..config };
        let result = execute(Path::new("."), &passing_config, &context(), &runner, None, CancellationToken::new())
            .await
            .unwrap();
        assert!(result.passed);
        assert!(result.correction_guidance.is_none());
    }

    #[tokio::test]
    async fn test_execute_requests_correction_guidance_on_failure() {
        let runner = CommandRunner::new(4);
        let provider = MockProvider::new(vec![Ok(serde_json::json!({"guidance": "fix the null check"}).to_string())]);
        let config = ProtocolConfig {
            stages: vec![VerificationStage::Building],
            ai_assisted_correction: true,
            max_correction_attempts: 1,
        };
        let result = execute(Path::new("/nonexistent-path-xyz"), &config, &context(), &runner, Some(&provider), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.correction_guidance.as_deref(), Some("fix the null check"));
    }

    #[tokio::test]
    async fn test_execute_errors_without_provider_when_correction_needed() {
        let runner = CommandRunner::new(4);
        let config = ProtocolConfig {
            stages: vec![VerificationStage::Building],
            ai_assisted_correction: true,
            max_correction_attempts: 1,
        };
        let err = execute(Path::new("/nonexistent-path-xyz"), &config, &context(), &runner, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NoProviderForCorrection));
    }
}

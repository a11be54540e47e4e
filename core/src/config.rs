//! Layered configuration: explicit `--config` path, else a project-local
//! dotfile, else a user config directory, else compiled defaults.
//!
//! Grounded on the teacher's `config::Config::load` fallback chain verbatim,
//! narrowed to this crate's sub-config groupings.

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

const PROJECT_LOCAL_CONFIG: &str = ".forgecore.yml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub concurrency: ConcurrencyConfig,
    pub guardrail: GuardrailConfig,
    pub repository: RepositoryConfig,
}

impl Config {
    /// Explicit path -> `.forgecore.yml` in the current directory ->
    /// `dirs::config_dir()/forgecore/forgecore.yml` -> compiled defaults. A
    /// malformed file at a fallback location is logged and skipped rather
    /// than propagated, so a stray broken dotfile never blocks startup; an
    /// explicitly-requested path that fails to load IS propagated, since the
    /// caller asked for it by name.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(PROJECT_LOCAL_CONFIG);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(err) => tracing::warn!("Failed to load config from {}: {}", local_config.display(), err),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("forgecore").join("forgecore.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(err) => tracing::warn!("Failed to load config from {}: {}", user_config.display(), err),
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.display());
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,

    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
            timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    #[serde(rename = "max-pipelines")]
    pub max_pipelines: u32,

    #[serde(rename = "max-commands")]
    pub max_commands: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_pipelines: 1,
            max_commands: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    #[serde(rename = "sensitive-task-types")]
    pub sensitive_task_types: Vec<String>,

    #[serde(rename = "ephemeral-ttl-secs")]
    pub ephemeral_ttl_secs: u64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            sensitive_task_types: vec!["scaffold".to_string(), "deps_fix".to_string()],
            ephemeral_ttl_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    #[serde(rename = "plan-path")]
    pub plan_path: PathBuf,

    #[serde(rename = "status-path")]
    pub status_path: PathBuf,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            plan_path: PathBuf::from("forge-plan.yml"),
            status_path: PathBuf::from(".forgecore/status.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.concurrency.max_pipelines, 1);
        assert_eq!(config.guardrail.sensitive_task_types, vec!["scaffold", "deps_fix"]);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  provider: openai
  model: gpt-4o
  api-key-env: MY_API_KEY
  base-url: https://api.openai.com
  max-tokens: 4096
  timeout-ms: 60000

concurrency:
  max-pipelines: 3
  max-commands: 4
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.api_key_env, "MY_API_KEY");
        assert_eq!(config.concurrency.max_pipelines, 3);
        assert_eq!(config.guardrail.sensitive_task_types, vec!["scaffold", "deps_fix"]);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = "llm:\n  model: claude-haiku\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.model, "claude-haiku");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.concurrency.max_pipelines, 1);
    }

    #[test]
    fn test_load_with_no_file_anywhere_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = Config::load(None);
        std::env::set_current_dir(original).unwrap();
        let config = result.unwrap();
        assert_eq!(config.llm.provider, "anthropic");
    }
}

//! Maps a provider id to an API key, reading from the settings DTO first and
//! falling back to the provider's conventional environment variable.

use std::collections::HashMap;

use super::error::LlmError;

/// `provider id -> env var name` for providers that don't need a key
/// supplied explicitly (local inference, CLI subprocess) are simply absent.
fn default_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "gemini" => Some("GEMINI_API_KEY"),
        "qwen" => Some("QWEN_API_KEY"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyResolver {
    /// Explicit overrides from settings, keyed by provider id.
    overrides: HashMap<String, String>,
}

impl KeyResolver {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    /// Resolve the API key for `provider`. `localai`, `llamacpp`, and
    /// `qwen-cli` never need one and resolving them is a caller bug, not a
    /// missing-key error, so they're not modeled here at all.
    pub fn resolve(&self, provider: &str) -> Result<String, LlmError> {
        if let Some(key) = self.overrides.get(provider) {
            return Ok(key.clone());
        }
        let env_var = default_env_var(provider).ok_or_else(|| LlmError::InvalidAPIKey {
            provider: provider.to_string(),
        })?;
        std::env::var(env_var).map_err(|_| LlmError::InvalidAPIKey {
            provider: provider.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_takes_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert("anthropic".to_string(), "sk-override".to_string());
        let resolver = KeyResolver::new(overrides);
        assert_eq!(resolver.resolve("anthropic").unwrap(), "sk-override");
    }

    #[test]
    fn test_unknown_provider_without_override_errors() {
        let resolver = KeyResolver::default();
        let err = resolver.resolve("llamacpp").unwrap_err();
        assert!(matches!(err, LlmError::InvalidAPIKey { .. }));
    }
}

//! `Registry`: provider id -> adapter, built from a set of factories closed
//! over a `KeyResolver` and host overrides so call sites never branch on
//! backend identity (§9 "sum-type dispatch over interface tables" — adapter
//! selection happens once, here).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::adapters::{AnthropicAdapter, GeminiAdapter, LlamaCppAdapter, OpenAiCompatibleAdapter, QwenCliAdapter};
use super::client::Provider;
use super::error::LlmError;
use super::key_resolver::KeyResolver;
use crate::command::CommandRunner;

/// Host overrides for the providers whose endpoint isn't fixed. `None` means
/// "use the provider's conventional default" (§6): `openrouter`'s public
/// endpoint, `localai`'s localhost endpoint, `llamacpp`'s configured local
/// server.
#[derive(Debug, Clone, Default)]
pub struct HostOverrides {
    pub openrouter_base_url: Option<String>,
    pub localai_base_url: Option<String>,
    pub llamacpp_base_url: Option<String>,
}

#[derive(Clone)]
pub struct RegistryConfig {
    pub max_tokens: u32,
    pub timeout: Duration,
    pub host_overrides: HostOverrides,
    pub qwen_cli_binary: String,
    pub qwen_cli_working_dir: PathBuf,
    pub command_runner: Arc<CommandRunner>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            timeout: Duration::from_secs(300),
            host_overrides: HostOverrides::default(),
            qwen_cli_binary: "qwen".to_string(),
            qwen_cli_working_dir: PathBuf::from("."),
            command_runner: Arc::new(CommandRunner::new(8)),
        }
    }
}

type Factory = Box<dyn Fn() -> Result<Arc<dyn Provider>, LlmError> + Send + Sync>;

/// Builds and caches one adapter per provider id. Each provider is
/// constructed lazily on first `get` so a caller that never touches, say,
/// `gemini` never needs a `GEMINI_API_KEY` in the environment; once built an
/// adapter is reused for the life of the registry (the factory set itself is
/// immutable after `Registry::new`, per §5 "process-wide and immutable after
/// construction").
pub struct Registry {
    factories: HashMap<&'static str, Factory>,
    cache: Mutex<HashMap<&'static str, Arc<dyn Provider>>>,
}

impl Registry {
    pub fn new(key_resolver: KeyResolver, config: RegistryConfig) -> Self {
        let mut factories: HashMap<&'static str, Factory> = HashMap::new();
        let resolver = Arc::new(key_resolver);

        {
            let resolver = Arc::clone(&resolver);
            let config = config.clone();
            factories.insert(
                "anthropic",
                Box::new(move || {
                    let key = resolver.resolve("anthropic")?;
                    let adapter = AnthropicAdapter::new(key, "https://api.anthropic.com".to_string(), config.max_tokens, config.timeout)?;
                    Ok(Arc::new(adapter) as Arc<dyn Provider>)
                }),
            );
        }
        {
            let resolver = Arc::clone(&resolver);
            let config = config.clone();
            factories.insert(
                "openai",
                Box::new(move || {
                    let key = resolver.resolve("openai")?;
                    let adapter = OpenAiCompatibleAdapter::new(
                        "openai",
                        Some(key),
                        "https://api.openai.com".to_string(),
                        config.max_tokens,
                        config.timeout,
                        vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
                    )?;
                    Ok(Arc::new(adapter) as Arc<dyn Provider>)
                }),
            );
        }
        {
            let resolver = Arc::clone(&resolver);
            let config = config.clone();
            factories.insert(
                "openrouter",
                Box::new(move || {
                    let key = resolver.resolve("openrouter")?;
                    let base_url = config.host_overrides.openrouter_base_url.clone().unwrap_or_else(|| "https://openrouter.ai/api".to_string());
                    let adapter = OpenAiCompatibleAdapter::new(
                        "openrouter",
                        Some(key),
                        base_url,
                        config.max_tokens,
                        config.timeout,
                        vec!["anthropic/claude-3.5-sonnet".to_string(), "meta-llama/llama-3.1-70b".to_string()],
                    )?;
                    Ok(Arc::new(adapter) as Arc<dyn Provider>)
                }),
            );
        }
        {
            let config = config.clone();
            factories.insert(
                "localai",
                Box::new(move || {
                    let base_url = config.host_overrides.localai_base_url.clone().unwrap_or_else(|| "http://localhost:8080".to_string());
                    let adapter =
                        OpenAiCompatibleAdapter::new("localai", None, base_url, config.max_tokens, config.timeout, vec!["local-model".to_string()])?;
                    Ok(Arc::new(adapter) as Arc<dyn Provider>)
                }),
            );
        }
        {
            let resolver = Arc::clone(&resolver);
            let config = config.clone();
            factories.insert(
                "qwen",
                Box::new(move || {
                    let key = resolver.resolve("qwen")?;
                    let adapter = OpenAiCompatibleAdapter::new(
                        "qwen",
                        Some(key),
                        "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
                        config.max_tokens,
                        config.timeout,
                        vec!["qwen-plus".to_string(), "qwen-turbo".to_string()],
                    )?;
                    Ok(Arc::new(adapter) as Arc<dyn Provider>)
                }),
            );
        }
        {
            let resolver = Arc::clone(&resolver);
            let config = config.clone();
            factories.insert(
                "gemini",
                Box::new(move || {
                    let key = resolver.resolve("gemini")?;
                    let adapter = GeminiAdapter::new(key, "https://generativelanguage.googleapis.com".to_string(), config.max_tokens, config.timeout)?;
                    Ok(Arc::new(adapter) as Arc<dyn Provider>)
                }),
            );
        }
        {
            let config = config.clone();
            factories.insert(
                "llamacpp",
                Box::new(move || {
                    let base_url = config.host_overrides.llamacpp_base_url.clone().unwrap_or_else(|| "http://localhost:8081".to_string());
                    let adapter = LlamaCppAdapter::new(base_url, config.max_tokens, config.timeout)?;
                    Ok(Arc::new(adapter) as Arc<dyn Provider>)
                }),
            );
        }
        {
            let config = config.clone();
            factories.insert(
                "qwen-cli",
                Box::new(move || {
                    let adapter = QwenCliAdapter::new(
                        config.qwen_cli_binary.clone(),
                        Arc::clone(&config.command_runner),
                        config.qwen_cli_working_dir.clone(),
                        config.timeout,
                    );
                    Ok(Arc::new(adapter) as Arc<dyn Provider>)
                }),
            );
        }

        Self {
            factories,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `provider_id` to a constructed, cached adapter.
    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn Provider>, LlmError> {
        if let Some(cached) = self.cache.lock().unwrap().get(provider_id) {
            return Ok(Arc::clone(cached));
        }
        let (&key, factory) = self
            .factories
            .iter()
            .find(|(id, _)| **id == provider_id)
            .ok_or_else(|| LlmError::UnknownProvider(provider_id.to_string()))?;
        let provider = factory()?;
        self.cache.lock().unwrap().insert(key, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn provider_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

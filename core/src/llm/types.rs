//! LLM request/response types shared across every provider adapter.

use serde::{Deserialize, Serialize};

/// Message role in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// A single request to a `Provider`.
///
/// `grammar` carries a GBNF grammar string when the caller needs structured
/// JSON output; adapters that can't honor a grammar natively still validate
/// the response against `required_fields` after the fact.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub grammar: Option<String>,
    pub required_fields: Vec<String>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            messages: vec![Message::user(user_text)],
            max_tokens: 4096,
            temperature: None,
            grammar: None,
            required_fields: Vec::new(),
        }
    }

    pub fn with_grammar(mut self, grammar: impl Into<String>, required_fields: Vec<String>) -> Self {
        self.grammar = Some(grammar.into());
        self.required_fields = required_fields;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Error,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub model: String,
}

/// One increment of a streamed response. The final chunk has `done = true`.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
    pub finish_reason: Option<FinishReason>,
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: false,
            finish_reason: None,
            error: None,
        }
    }

    pub fn done(finish_reason: FinishReason) -> Self {
        Self {
            delta: String::new(),
            done: true,
            finish_reason: Some(finish_reason),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delta: String::new(),
            done: true,
            finish_reason: Some(FinishReason::Error),
            error: Some(message.into()),
        }
    }
}

/// A capability a provider adapter may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    Streaming,
    Grammar,
    ToolUse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderLimits {
    pub max_tokens: u32,
    pub max_concurrent_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<Capability>,
    pub limits: ProviderLimits,
    pub supported_models: Vec<String>,
}

/// Per-1000-token pricing for a model, in the provider's billing currency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub currency: &'static str,
}

//! LLM Provider Registry & Adapters.
//!
//! `Provider` is the uniform capability set every backend implements;
//! `Registry` maps a provider id from the fixed set `{openai, openrouter,
//! gemini, localai, qwen, qwen-cli, llamacpp}` to a constructed adapter,
//! closed over a `KeyResolver` and host overrides, the way the teacher's
//! `LlmClient` factory never lets call sites branch on backend identity
//! themselves.

pub mod adapters;
pub mod client;
pub mod error;
pub mod key_resolver;
pub mod registry;
pub mod types;

pub use client::{validate_structured_output, Provider};
pub use error::LlmError;
pub use key_resolver::KeyResolver;
pub use registry::{HostOverrides, Registry, RegistryConfig};
pub use types::{
    Capability, FinishReason, GenerateRequest, GenerateResponse, Message, Pricing, ProviderInfo, ProviderLimits, Role,
    StreamChunk, TokenUsage,
};

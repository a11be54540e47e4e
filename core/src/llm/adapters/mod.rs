//! Adapter implementations, one per backend shape. The `Registry` is the only
//! thing that names these types; the rest of the crate only ever sees
//! `Arc<dyn Provider>`.

pub mod anthropic;
pub mod gemini;
pub mod llamacpp;
pub mod openai_compatible;
pub mod qwen_cli;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use llamacpp::LlamaCppAdapter;
pub use openai_compatible::OpenAiCompatibleAdapter;
pub use qwen_cli::QwenCliAdapter;

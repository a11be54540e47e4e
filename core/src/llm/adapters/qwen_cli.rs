//! Qwen CLI subprocess adapter.
//!
//! Shells out to the `qwen` CLI binary via the Command Runner, feeding the
//! folded prompt over stdin and treating stdout as the completion text — the
//! same "subprocess as a backend" shape the Command Runner was built for,
//! rather than an HTTP client. A non-zero exit is wrapped into
//! `LlmError::Command`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::command::CommandRunner;
use crate::llm::client::{validate_structured_output, Provider};
use crate::llm::error::LlmError;
use crate::llm::types::{
    Capability, FinishReason, GenerateRequest, GenerateResponse, Pricing, ProviderInfo, ProviderLimits, StreamChunk,
    TokenUsage,
};

pub struct QwenCliAdapter {
    binary: String,
    runner: Arc<CommandRunner>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl QwenCliAdapter {
    pub fn new(binary: String, runner: Arc<CommandRunner>, working_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            binary,
            runner,
            working_dir,
            timeout,
        }
    }

    fn build_prompt(&self, request: &GenerateRequest) -> String {
        let mut prompt = request.system_prompt.clone();
        for message in &request.messages {
            prompt.push_str("\n\n");
            prompt.push_str(&message.content);
        }
        prompt
    }

    fn args(&self, request: &GenerateRequest) -> Vec<String> {
        vec!["-m".to_string(), request.model.clone()]
    }
}

#[async_trait]
impl Provider for QwenCliAdapter {
    async fn generate(&self, request: GenerateRequest, cancel: CancellationToken) -> Result<GenerateResponse, LlmError> {
        self.validate_request(&request)?;
        let prompt = self.build_prompt(&request);
        let args = self.args(&request);

        let output = self
            .runner
            .run(&self.working_dir, &self.binary, &args, Some(prompt.as_bytes()), Some(self.timeout), cancel)
            .await?;

        let content = output.stdout_string();

        if !request.required_fields.is_empty() {
            validate_structured_output(&content, &request.required_fields)?;
        }

        Ok(GenerateResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            model: request.model,
        })
    }

    async fn stream(
        &self,
        request: GenerateRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) -> Result<GenerateResponse, LlmError> {
        // The qwen CLI has no incremental-output mode; run to completion and
        // deliver it as a single chunk, the same fallback the Gemini adapter
        // uses for its not-yet-wired streaming endpoint.
        let response = self.generate(request, cancel).await?;
        let _ = chunk_tx.send(StreamChunk::delta(response.content.clone())).await;
        let _ = chunk_tx.send(StreamChunk::done(response.finish_reason.clone())).await;
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.provider_info().supported_models)
    }

    fn validate_request(&self, request: &GenerateRequest) -> Result<(), LlmError> {
        if request.messages.is_empty() && request.system_prompt.is_empty() {
            return Err(LlmError::InvalidResponse("empty prompt".to_string()));
        }
        Ok(())
    }

    fn estimate_tokens(&self, request: &GenerateRequest) -> u32 {
        (self.build_prompt(request).len() / 4) as u32
    }

    fn pricing(&self, _model: &str) -> Option<Pricing> {
        None
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "qwen-cli".to_string(),
            version: "cli".to_string(),
            capabilities: vec![Capability::Streaming],
            limits: ProviderLimits {
                max_tokens: 32_768,
                max_concurrent_requests: 1,
            },
            supported_models: vec!["qwen-plus".to_string(), "qwen-turbo".to_string()],
        }
    }
}

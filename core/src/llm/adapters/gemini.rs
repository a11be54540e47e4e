//! Gemini adapter.
//!
//! Gemini's wire format is not OpenAI-compatible — `contents`/`parts`
//! request shape, `candidates`/`content`/`parts` response shape — so this
//! adapter keeps its own request/response types rather than reusing the
//! chat-completions structs, the way the corpus's Gemini smoke-test probes
//! the same `generateContent` endpoint shape.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::llm::client::{validate_structured_output, Provider};
use crate::llm::error::LlmError;
use crate::llm::types::{
    Capability, FinishReason, GenerateRequest, GenerateResponse, Pricing, ProviderInfo, ProviderLimits, StreamChunk,
    TokenUsage,
};

pub struct GeminiAdapter {
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl GeminiAdapter {
    pub fn new(api_key: String, base_url: String, max_tokens: u32, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            base_url,
            http,
            max_tokens,
        })
    }

    fn build_request_body(&self, request: &GenerateRequest) -> GeminiRequest {
        let mut text = request.system_prompt.clone();
        for message in &request.messages {
            text.push_str("\n\n");
            text.push_str(&message.content);
        }

        GeminiRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text }],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(request.max_tokens.min(self.max_tokens)),
                response_mime_type: request.grammar.as_ref().map(|_| "application/json".to_string()),
            }),
        }
    }
}

#[async_trait]
impl Provider for GeminiAdapter {
    async fn generate(&self, request: GenerateRequest, cancel: CancellationToken) -> Result<GenerateResponse, LlmError> {
        self.validate_request(&request)?;
        let url = format!("{}/v1beta/models/{}:generateContent?key={}", self.base_url, request.model, self.api_key);
        let body = self.build_request_body(&request);

        let response = tokio::select! {
            result = self.http.post(url).json(&body).send() => result?,
            _ = cancel.cancelled() => return Err(LlmError::InvalidResponse("cancelled".to_string())),
        };

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(LlmError::InvalidAPIKey {
                provider: "gemini".to_string(),
            });
        }
        if status == 429 {
            return Err(LlmError::RateLimitExceeded {
                retry_after: Duration::from_secs(60),
            });
        }
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message });
        }

        let api_response: GeminiApiResponse = response.json().await?;

        if let Some(feedback) = &api_response.prompt_feedback
            && feedback.block_reason.is_some()
        {
            return Err(LlmError::InvalidResponse(format!(
                "prompt blocked: {}",
                feedback.block_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let candidate = api_response.candidates.into_iter().next().ok_or(LlmError::NoChoices)?;
        let content = candidate.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("");

        let finish_reason = match candidate.finish_reason.as_deref() {
            Some("MAX_TOKENS") => FinishReason::MaxTokens,
            _ => FinishReason::Stop,
        };

        if !request.required_fields.is_empty() {
            validate_structured_output(&content, &request.required_fields)?;
        }

        Ok(GenerateResponse {
            content,
            finish_reason,
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
        // Gemini's streaming endpoint isn't wired up; fall back to one
        // blocking call and deliver it as a single chunk so callers that
        // only know how to consume a stream still get a response.
        let response = self.generate(request, cancel).await?;
        let _ = chunk_tx.send(StreamChunk::delta(response.content.clone())).await;
        let _ = chunk_tx.send(StreamChunk::done(response.finish_reason.clone())).await;
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.provider_info().supported_models)
    }

    fn validate_request(&self, request: &GenerateRequest) -> Result<(), LlmError> {
        if request.model.is_empty() {
            return Err(LlmError::ModelNotFound(String::new()));
        }
        Ok(())
    }

    fn estimate_tokens(&self, request: &GenerateRequest) -> u32 {
        let chars: usize = request.system_prompt.len() + request.messages.iter().map(|m| m.content.len()).sum::<usize>();
        (chars / 4) as u32
    }

    fn pricing(&self, _model: &str) -> Option<Pricing> {
        Some(Pricing {
            input_per_1k: 0.00125,
            output_per_1k: 0.005,
            currency: "USD",
        })
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "gemini".to_string(),
            version: "v1beta".to_string(),
            capabilities: vec![Capability::Grammar],
            limits: ProviderLimits {
                max_tokens: self.max_tokens,
                max_concurrent_requests: 8,
            },
            supported_models: vec!["gemini-2.5-pro".to_string(), "gemini-2.5-flash".to_string()],
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new(
            "test-key".to_string(),
            "https://generativelanguage.googleapis.com".to_string(),
            8192,
            Duration::from_secs(300),
        )
        .unwrap()
    }

    #[test]
    fn test_build_request_body_folds_messages_into_single_text() {
        let adapter = adapter();
        let request = GenerateRequest::new("gemini-2.5-flash", "be helpful", "what is 2+2?");
        let body = adapter.build_request_body(&request);
        assert_eq!(body.contents.len(), 1);
        assert!(body.contents[0].parts[0].text.contains("be helpful"));
        assert!(body.contents[0].parts[0].text.contains("what is 2+2?"));
    }

    #[test]
    fn test_grammar_forces_json_mime_type() {
        let adapter = adapter();
        let request = GenerateRequest::new("gemini-2.5-flash", "s", "u").with_grammar("root ::= object", vec![]);
        let body = adapter.build_request_body(&request);
        assert_eq!(
            body.generation_config.unwrap().response_mime_type.as_deref(),
            Some("application/json")
        );
    }
}

//! Anthropic Messages API adapter.
//!
//! Follows the teacher's `AnthropicClient` almost unchanged: system/user
//! content blocks, stop-reason mapping, token usage fields, SSE streaming.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::llm::client::{validate_structured_output, Provider};
use crate::llm::error::LlmError;
use crate::llm::types::{
    Capability, FinishReason, GenerateRequest, GenerateResponse, Pricing, ProviderInfo, ProviderLimits, Role,
    StreamChunk, TokenUsage,
};

pub struct AnthropicAdapter {
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, base_url: String, max_tokens: u32, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            base_url,
            http,
            max_tokens,
        })
    }

    fn build_request_body(&self, request: &GenerateRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "system": request.system_prompt,
            "messages": request.messages.iter().filter(|m| m.role != Role::System).map(|m| {
                serde_json::json!({ "role": role_str(m.role), "content": m.content })
            }).collect::<Vec<_>>(),
        })
    }

    fn parse_response(&self, model: &str, api_response: AnthropicResponse) -> GenerateResponse {
        let content = api_response.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");
        GenerateResponse {
            content,
            finish_reason: match api_response.stop_reason.as_str() {
                "max_tokens" => FinishReason::MaxTokens,
                _ => FinishReason::Stop,
            },
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
            model: model.to_string(),
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "user",
    }
}

#[async_trait]
impl Provider for AnthropicAdapter {
    async fn generate(&self, request: GenerateRequest, cancel: CancellationToken) -> Result<GenerateResponse, LlmError> {
        self.validate_request(&request)?;
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);

        let send = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send();

        let response = tokio::select! {
            result = send => result?,
            _ = cancel.cancelled() => return Err(LlmError::InvalidResponse("cancelled".to_string())),
        };

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimitExceeded {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message });
        }

        let api_response: AnthropicResponse = response.json().await?;
        let generated = self.parse_response(&request.model, api_response);

        if !request.required_fields.is_empty() {
            validate_structured_output(&generated.content, &request.required_fields)?;
        }

        Ok(generated)
    }

    async fn stream(
        &self,
        request: GenerateRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) -> Result<GenerateResponse, LlmError> {
        self.validate_request(&request)?;
        let url = format!("{}/v1/messages", self.base_url);
        let mut body = self.build_request_body(&request);
        body["stream"] = serde_json::json!(true);

        let http_request = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .json(&body);

        let mut es = EventSource::new(http_request).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let mut full_content = String::new();
        let mut finish_reason = FinishReason::Stop;
        let mut usage = TokenUsage::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = chunk_tx.send(StreamChunk::error("cancelled")).await;
                    return Err(LlmError::InvalidResponse("cancelled".to_string()));
                }
                event = es.next() => {
                    let Some(event) = event else { break };
                    match event {
                        Ok(Event::Message(msg)) => {
                            let data: serde_json::Value = serde_json::from_str(&msg.data)?;
                            match data["type"].as_str() {
                                Some("content_block_delta") => {
                                    if let Some(text) = data["delta"]["text"].as_str() {
                                        full_content.push_str(text);
                                        let _ = chunk_tx.send(StreamChunk::delta(text)).await;
                                    }
                                }
                                Some("message_delta") => {
                                    if data["delta"]["stop_reason"].as_str() == Some("max_tokens") {
                                        finish_reason = FinishReason::MaxTokens;
                                    }
                                    if let Some(u) = data.get("usage") {
                                        usage.output_tokens = u["output_tokens"].as_u64().unwrap_or(0);
                                    }
                                }
                                Some("message_start") => {
                                    if let Some(u) = data["message"].get("usage") {
                                        usage.input_tokens = u["input_tokens"].as_u64().unwrap_or(0);
                                    }
                                }
                                Some("message_stop") => break,
                                _ => {}
                            }
                        }
                        Ok(Event::Open) => {}
                        Err(e) => {
                            let _ = chunk_tx.send(StreamChunk::error(e.to_string())).await;
                            return Err(LlmError::InvalidResponse(e.to_string()));
                        }
                    }
                }
            }
        }

        let _ = chunk_tx.send(StreamChunk::done(finish_reason.clone())).await;

        Ok(GenerateResponse {
            content: full_content,
            finish_reason,
            usage,
            model: request.model,
        })
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

    fn pricing(&self, model: &str) -> Option<Pricing> {
        let (input_per_1k, output_per_1k) = match model {
            m if m.contains("opus") => (0.015, 0.075),
            m if m.contains("haiku") => (0.00025, 0.00125),
            _ => (0.003, 0.015),
        };
        Some(Pricing {
            input_per_1k,
            output_per_1k,
            currency: "USD",
        })
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "anthropic".to_string(),
            version: "2023-06-01".to_string(),
            capabilities: vec![Capability::Streaming, Capability::ToolUse],
            limits: ProviderLimits {
                max_tokens: self.max_tokens,
                max_concurrent_requests: 8,
            },
            supported_models: vec![
                "claude-opus-4".to_string(),
                "claude-sonnet-4".to_string(),
                "claude-haiku-4".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: String,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

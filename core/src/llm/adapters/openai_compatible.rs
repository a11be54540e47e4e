//! Shared adapter for every OpenAI-chat-completions-shaped backend:
//! `openai`, `openrouter`, `localai`, and cloud `qwen`.
//!
//! One wire format, parameterized by base URL and a default-model table, the
//! same way the teacher's `OpenAIClient` talks to `/v1/chat/completions`;
//! `openrouter`/`localai` only differ in which host the `Registry` resolves
//! for them.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
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

pub struct OpenAiCompatibleAdapter {
    provider_name: &'static str,
    api_key: Option<String>,
    base_url: String,
    http: Client,
    max_tokens: u32,
    supported_models: Vec<String>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        provider_name: &'static str,
        api_key: Option<String>,
        base_url: String,
        max_tokens: u32,
        timeout: Duration,
        supported_models: Vec<String>,
    ) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            provider_name,
            api_key,
            base_url,
            http,
            max_tokens,
            supported_models,
        })
    }

    fn build_request_body(&self, request: &GenerateRequest) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({ "role": "system", "content": request.system_prompt })];
        messages.extend(request.messages.iter().map(|m| {
            serde_json::json!({ "role": role_str(m.role), "content": m.content })
        }));

        serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.min(self.max_tokens),
        })
    }

    fn auth_header(&self) -> Option<(&'static str, String)> {
        self.api_key.as_ref().map(|key| ("Authorization", format!("Bearer {key}")))
    }

    fn parse_response(&self, model: &str, api_response: ChatResponse) -> GenerateResponse {
        let choice = api_response.choices.into_iter().next();
        match choice {
            Some(c) => GenerateResponse {
                content: c.message.content.unwrap_or_default(),
                finish_reason: match c.finish_reason.as_deref() {
                    Some("length") => FinishReason::MaxTokens,
                    _ => FinishReason::Stop,
                },
                usage: TokenUsage {
                    input_tokens: api_response.usage.prompt_tokens,
                    output_tokens: api_response.usage.completion_tokens,
                },
                model: model.to_string(),
            },
            None => GenerateResponse {
                content: String::new(),
                finish_reason: FinishReason::Stop,
                usage: TokenUsage::default(),
                model: model.to_string(),
            },
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleAdapter {
    async fn generate(&self, request: GenerateRequest, cancel: CancellationToken) -> Result<GenerateResponse, LlmError> {
        self.validate_request(&request)?;
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        let mut req = self.http.post(&url).json(&body);
        if let Some((name, value)) = self.auth_header() {
            req = req.header(name, value);
        }

        let response = tokio::select! {
            result = req.send() => result?,
            _ = cancel.cancelled() => return Err(LlmError::InvalidResponse("cancelled".to_string())),
        };

        let status = response.status().as_u16();

        if status == 429 {
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
            let message = response.text().await.unwrap_or_default();
            if status == 401 || status == 403 {
                return Err(LlmError::InvalidAPIKey {
                    provider: self.provider_name.to_string(),
                });
            }
            return Err(LlmError::ApiError { status, message });
        }

        let api_response: ChatResponse = response.json().await?;
        if api_response.choices.is_empty() {
            return Err(LlmError::NoChoices);
        }
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
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut body = self.build_request_body(&request);
        body["stream"] = serde_json::json!(true);

        let mut req = self.http.post(&url).json(&body);
        if let Some((name, value)) = self.auth_header() {
            req = req.header(name, value);
        }

        let response = req.send().await.map_err(LlmError::Network)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message });
        }

        let mut stream = response.bytes_stream();
        let mut full_content = String::new();
        let mut finish_reason = FinishReason::Stop;
        let mut usage = TokenUsage::default();
        let mut buffer = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = chunk_tx.send(StreamChunk::error("cancelled")).await;
                    return Err(LlmError::InvalidResponse("cancelled".to_string()));
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk.map_err(LlmError::Network)?;
                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    while let Some(line_end) = buffer.find('\n') {
                        let line = buffer[..line_end].trim().to_string();
                        buffer = buffer[line_end + 1..].to_string();

                        if line.is_empty() || line == "data: [DONE]" {
                            continue;
                        }
                        let Some(data) = line.strip_prefix("data: ") else { continue };
                        let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) else { continue };
                        if let Some(choice) = parsed.choices.first() {
                            if let Some(content) = &choice.delta.content {
                                full_content.push_str(content);
                                let _ = chunk_tx.send(StreamChunk::delta(content.clone())).await;
                            }
                            if choice.finish_reason.as_deref() == Some("length") {
                                finish_reason = FinishReason::MaxTokens;
                            }
                        }
                        if let Some(u) = parsed.usage {
                            usage.input_tokens = u.prompt_tokens;
                            usage.output_tokens = u.completion_tokens;
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
        Ok(self.supported_models.clone())
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
        None
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.provider_name.to_string(),
            version: "1".to_string(),
            capabilities: vec![Capability::Streaming, Capability::ToolUse],
            limits: ProviderLimits {
                max_tokens: self.max_tokens,
                max_concurrent_requests: 8,
            },
            supported_models: self.supported_models.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OpenAiCompatibleAdapter {
        OpenAiCompatibleAdapter::new(
            "openai",
            Some("test-key".to_string()),
            "https://api.openai.com".to_string(),
            8192,
            Duration::from_secs(300),
            vec!["gpt-4o".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_build_request_body_has_system_message_first() {
        let adapter = adapter();
        let request = GenerateRequest::new("gpt-4o", "be helpful", "hi");
        let body = adapter.build_request_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_auth_header_absent_without_key() {
        let adapter = OpenAiCompatibleAdapter::new(
            "localai",
            None,
            "http://localhost:8080".to_string(),
            4096,
            Duration::from_secs(300),
            vec!["local-model".to_string()],
        )
        .unwrap();
        assert!(adapter.auth_header().is_none());
    }
}

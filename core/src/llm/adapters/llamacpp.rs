//! llama.cpp local-inference adapter.
//!
//! Talks to the llama.cpp server's `/completion` endpoint: a flat prompt
//! string, an optional `grammar` field carrying a GBNF grammar verbatim, and
//! NDJSON/SSE-style streaming with `{"content": "...", "stop": bool}` lines
//! per chunk — the same line-buffered decode idiom as the corpus's
//! `SseDecoder`, adapted to llama.cpp's shape instead of OpenAI's.

use async_trait::async_trait;
use futures::StreamExt;
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

pub struct LlamaCppAdapter {
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl LlamaCppAdapter {
    pub fn new(base_url: String, max_tokens: u32, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, http, max_tokens })
    }

    fn build_prompt(&self, request: &GenerateRequest) -> String {
        let mut prompt = request.system_prompt.clone();
        for message in &request.messages {
            prompt.push_str("\n\n");
            prompt.push_str(&message.content);
        }
        prompt
    }

    fn build_request_body(&self, request: &GenerateRequest, stream: bool) -> CompletionBody {
        CompletionBody {
            prompt: self.build_prompt(request),
            n_predict: request.max_tokens.min(self.max_tokens),
            grammar: request.grammar.clone(),
            stream,
        }
    }
}

/// Decode llama.cpp's `data: {...}` SSE lines into parsed JSON payloads,
/// buffering across chunk boundaries.
fn decode_sse_lines(buffer: &mut String, chunk: &[u8]) -> Vec<serde_json::Value> {
    buffer.push_str(&String::from_utf8_lossy(chunk));
    let mut values = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(data) = line.strip_prefix("data: ")
            && let Ok(value) = serde_json::from_str::<serde_json::Value>(data)
        {
            values.push(value);
        }
    }
    values
}

#[async_trait]
impl Provider for LlamaCppAdapter {
    async fn generate(&self, request: GenerateRequest, cancel: CancellationToken) -> Result<GenerateResponse, LlmError> {
        self.validate_request(&request)?;
        let url = format!("{}/completion", self.base_url);
        let body = self.build_request_body(&request, false);

        let response = tokio::select! {
            result = self.http.post(url).json(&body).send() => result?,
            _ = cancel.cancelled() => return Err(LlmError::InvalidResponse("cancelled".to_string())),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message });
        }

        let api_response: CompletionResponse = response.json().await?;

        if !request.required_fields.is_empty() {
            validate_structured_output(&api_response.content, &request.required_fields)?;
        }

        Ok(GenerateResponse {
            content: api_response.content,
            finish_reason: if api_response.stopped_limit {
                FinishReason::MaxTokens
            } else {
                FinishReason::Stop
            },
            usage: TokenUsage {
                input_tokens: api_response.tokens_evaluated.unwrap_or(0),
                output_tokens: api_response.tokens_predicted.unwrap_or(0),
            },
            model: request.model,
        })
    }

    async fn stream(
        &self,
        request: GenerateRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) -> Result<GenerateResponse, LlmError> {
        self.validate_request(&request)?;
        let url = format!("{}/completion", self.base_url);
        let body = self.build_request_body(&request, true);

        let response = self.http.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_content = String::new();
        let mut finish_reason = FinishReason::Stop;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = chunk_tx.send(StreamChunk::error("cancelled")).await;
                    return Err(LlmError::InvalidResponse("cancelled".to_string()));
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk.map_err(LlmError::Network)?;
                    for value in decode_sse_lines(&mut buffer, &chunk) {
                        if let Some(content) = value["content"].as_str() {
                            full_content.push_str(content);
                            let _ = chunk_tx.send(StreamChunk::delta(content)).await;
                        }
                        if value["stop"].as_bool() == Some(true) && value["stopped_limit"].as_bool() == Some(true) {
                            finish_reason = FinishReason::MaxTokens;
                        }
                    }
                }
            }
        }

        let _ = chunk_tx.send(StreamChunk::done(finish_reason.clone())).await;

        Ok(GenerateResponse {
            content: full_content,
            finish_reason,
            usage: TokenUsage::default(),
            model: request.model,
        })
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
            name: "llamacpp".to_string(),
            version: "server".to_string(),
            capabilities: vec![Capability::Streaming, Capability::Grammar],
            limits: ProviderLimits {
                max_tokens: self.max_tokens,
                max_concurrent_requests: 1,
            },
            supported_models: vec!["local".to_string()],
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionBody {
    prompt: String,
    n_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    grammar: Option<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    stopped_limit: bool,
    #[serde(default)]
    tokens_evaluated: Option<u64>,
    #[serde(default)]
    tokens_predicted: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> LlamaCppAdapter {
        LlamaCppAdapter::new("http://localhost:8080".to_string(), 2048, Duration::from_secs(120)).unwrap()
    }

    #[test]
    fn test_build_request_body_carries_grammar() {
        let adapter = adapter();
        let request = GenerateRequest::new("local", "s", "u").with_grammar("root ::= object", vec![]);
        let body = adapter.build_request_body(&request, false);
        assert_eq!(body.grammar.as_deref(), Some("root ::= object"));
    }

    #[test]
    fn test_decode_sse_lines_buffers_partial_chunks() {
        let mut buffer = String::new();
        let mut values = decode_sse_lines(&mut buffer, b"data: {\"content\": \"he");
        assert!(values.is_empty());
        values = decode_sse_lines(&mut buffer, b"llo\", \"stop\": false}\n");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["content"], "hello");
    }

    #[test]
    fn test_validate_request_rejects_empty_prompt() {
        let adapter = adapter();
        let request = GenerateRequest {
            messages: vec![],
            system_prompt: String::new(),
            ..GenerateRequest::new("local", "", "")
        };
        assert!(adapter.validate_request(&request).is_err());
    }
}

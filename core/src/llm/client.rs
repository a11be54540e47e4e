//! `Provider`: the single capability set every LLM adapter implements.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::LlmError;
use super::types::{GenerateRequest, GenerateResponse, Pricing, ProviderInfo, StreamChunk};

/// A capability set for invoking a large language model over some backend.
///
/// Every adapter (cloud chat-completions, native SDK, local inference, CLI
/// subprocess) implements this one trait; callers never branch on adapter
/// identity, only on the `Provider` object the `Registry` handed them.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, request: GenerateRequest, cancel: CancellationToken) -> Result<GenerateResponse, LlmError>;

    async fn stream(
        &self,
        request: GenerateRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) -> Result<GenerateResponse, LlmError>;

    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    fn validate_request(&self, request: &GenerateRequest) -> Result<(), LlmError>;

    fn estimate_tokens(&self, request: &GenerateRequest) -> u32;

    fn pricing(&self, model: &str) -> Option<Pricing>;

    fn provider_info(&self) -> ProviderInfo;
}

/// Validate a generated response parses as JSON and carries every field the
/// caller flagged as required (§4.1 "minimal shape check"). Adapters call
/// this after grammar-guided or best-effort structured generation.
pub fn validate_structured_output(text: &str, required_fields: &[String]) -> Result<serde_json::Value, LlmError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    for field in required_fields {
        if value.get(field).is_none() {
            return Err(LlmError::SchemaViolation(field.clone()));
        }
    }
    Ok(value)
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::llm::types::{Capability, FinishReason, ProviderLimits, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A scripted provider for planner/repair/protocol tests.
    pub struct MockProvider {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        call_count: AtomicUsize,
    }

    impl MockProvider {
        pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn generate(&self, request: GenerateRequest, _cancel: CancellationToken) -> Result<GenerateResponse, LlmError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::NoChoices);
            }
            let next = responses.remove(0);
            next.map(|content| GenerateResponse {
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
            let response = self.generate(request, cancel).await?;
            let _ = chunk_tx.send(StreamChunk::delta(response.content.clone())).await;
            let _ = chunk_tx.send(StreamChunk::done(FinishReason::Stop)).await;
            Ok(response)
        }

        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(vec!["mock-model".to_string()])
        }

        fn validate_request(&self, _request: &GenerateRequest) -> Result<(), LlmError> {
            Ok(())
        }

        fn estimate_tokens(&self, request: &GenerateRequest) -> u32 {
            (request.system_prompt.len() / 4) as u32
        }

        fn pricing(&self, _model: &str) -> Option<Pricing> {
            None
        }

        fn provider_info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "mock".to_string(),
                version: "0".to_string(),
                capabilities: vec![Capability::Streaming],
                limits: ProviderLimits {
                    max_tokens: 4096,
                    max_concurrent_requests: 8,
                },
                supported_models: vec!["mock-model".to_string()],
            }
        }
    }

    #[tokio::test]
    async fn test_mock_provider_returns_scripted_responses() {
        let provider = MockProvider::new(vec![Ok("first".to_string()), Ok("second".to_string())]);
        let req = GenerateRequest::new("mock-model", "sys", "hi");
        let r1 = provider.generate(req.clone(), CancellationToken::new()).await.unwrap();
        assert_eq!(r1.content, "first");
        let r2 = provider.generate(req, CancellationToken::new()).await.unwrap();
        assert_eq!(r2.content, "second");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_provider_errors_when_exhausted() {
        let provider = MockProvider::new(vec![]);
        let req = GenerateRequest::new("mock-model", "sys", "hi");
        let result = provider.generate(req, CancellationToken::new()).await;
        assert!(result.is_err());
    }
}

#[cfg(test)]
mod validate_tests {
    use super::*;

    #[test]
    fn test_validate_structured_output_accepts_required_fields() {
        let value = validate_structured_output(r#"{"policy": "fail_fast", "steps": []}"#, &["policy".to_string()]).unwrap();
        assert_eq!(value["policy"], "fail_fast");
    }

    #[test]
    fn test_validate_structured_output_rejects_missing_field() {
        let err = validate_structured_output(r#"{"steps": []}"#, &["policy".to_string()]).unwrap_err();
        assert!(matches!(err, LlmError::SchemaViolation(field) if field == "policy"));
    }

    #[test]
    fn test_validate_structured_output_rejects_non_json() {
        let err = validate_structured_output("not json", &[]).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}

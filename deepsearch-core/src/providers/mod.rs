//! Model provider abstraction.
//!
//! Defines the [`LlmProvider`] trait for model-agnostic completions,
//! the [`ModelRouter`] that applies ordered fallback across providers,
//! and an OpenAI-compatible HTTP implementation.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{FallbackHop, ModelRouter, RoutedCompletion, RouterCursor};

use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Trait for model providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a completion and return the response.
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Return the default model name.
    fn model_name(&self) -> &str;
}

/// A mock provider for testing and development.
///
/// Returns queued responses/errors in order; once the script is empty
/// it repeats a configured default outcome.
pub struct MockLlmProvider {
    model: String,
    script: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
    default_outcome: Result<CompletionResponse, ProviderError>,
    calls: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            script: Mutex::new(VecDeque::new()),
            default_outcome: Ok(Self::text_response("mock response")),
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let mut provider = Self::new();
        provider.default_outcome = Ok(Self::text_response(text));
        provider
    }

    /// A provider that always fails with the given error.
    pub fn always_failing(error: ProviderError) -> Self {
        let mut provider = Self::new();
        provider.default_outcome = Err(error);
        provider
    }

    /// Queue a text response for the next `complete` call.
    pub fn queue_text(&self, text: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(Self::text_response(text)));
    }

    /// Queue an error for the next `complete` call.
    pub fn queue_error(&self, error: ProviderError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Build a simple text response.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse::new(text, "mock-model")
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => self.default_outcome.clone(),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_scripted_then_default() {
        let provider = MockLlmProvider::with_response("default");
        provider.queue_text("first");
        provider.queue_error(ProviderError::Timeout { timeout_secs: 1 });

        let r1 = provider
            .complete(CompletionRequest::new("q"))
            .await
            .unwrap();
        assert_eq!(r1.text, "first");

        let r2 = provider.complete(CompletionRequest::new("q")).await;
        assert!(matches!(r2, Err(ProviderError::Timeout { .. })));

        let r3 = provider
            .complete(CompletionRequest::new("q"))
            .await
            .unwrap();
        assert_eq!(r3.text, "default");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_always_failing() {
        let provider = MockLlmProvider::always_failing(ProviderError::Connection {
            message: "refused".into(),
        });
        for _ in 0..3 {
            assert!(provider.complete(CompletionRequest::new("q")).await.is_err());
        }
    }
}

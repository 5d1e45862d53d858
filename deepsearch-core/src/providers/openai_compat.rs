//! OpenAI-compatible HTTP provider.
//!
//! Speaks the `POST {base_url}/chat/completions` protocol used by
//! OpenAI, Gemini's compatibility endpoint, DeepSeek, and most hosted
//! gateways. HTTP 429, 5xx, and transport timeouts are classified as
//! transient so the Model Router can fall back.

use super::LlmProvider;
use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// A provider speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatProvider {
    /// Create a provider for the given endpoint.
    ///
    /// `base_url` is the API root without the `/chat/completions`
    /// suffix, e.g. `https://generativelanguage.googleapis.com/v1beta/openai`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent("deepsearch/0.3")
            .build()
            .map_err(|e| ProviderError::Connection {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn build_payload(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut payload = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        payload
    }

    fn classify_status(&self, status: reqwest::StatusCode, body: String) -> ProviderError {
        match status.as_u16() {
            401 | 403 => ProviderError::AuthFailed {
                provider: self.model.clone(),
            },
            429 => ProviderError::RateLimited {
                retry_after_secs: 30,
            },
            code if code >= 500 => ProviderError::Server {
                status: code,
                message: body,
            },
            _ => ProviderError::BadRequest { message: body },
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = self.build_payload(&request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout { timeout_secs: 0 }
                } else {
                    ProviderError::Connection {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status, body));
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ProviderError::ResponseParse {
                    message: e.to_string(),
                })?;

        let text = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::ResponseParse {
                message: "response missing choices[0].message.content".into(),
            })?;
        let model = body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model);

        Ok(CompletionResponse::new(text, model))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

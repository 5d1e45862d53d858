//! Shared type definitions for the engine core.
//!
//! The engine's phases drive single-prompt completions, so the request
//! shape is deliberately slim: a prompt, an optional system preamble,
//! and sampling constraints.

use serde::{Deserialize, Serialize};

/// Identifier of a configured model provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A request for a model completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The user-facing prompt for this completion.
    pub prompt: String,
    /// Optional system preamble.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate, provider default if `None`.
    pub max_tokens: Option<u32>,
    /// Model override, provider default if `None`.
    pub model: Option<String>,
}

impl CompletionRequest {
    /// Create a request with default sampling settings.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.7,
            max_tokens: None,
            model: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The result of a model completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The generated text.
    pub text: String,
    /// The model that produced it.
    pub model: String,
}

impl CompletionResponse {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
        }
    }
}

//! Error types for the DeepSearch engine core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering model providers, web search, stage generation, and
//! configuration. Cancellation is modelled as a control-flow variant,
//! not a failure: it terminates a session with a `cancelled` terminal
//! event, never an `error` event.

/// Top-level error type for the engine.
///
/// Search failures have no variant here: a failing query is recovered
/// inside the iteration and surfaces as a `search_failed` event, never
/// as a session error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session was cancelled")]
    Cancelled,
}

impl EngineError {
    /// Stable machine-readable error kind, carried in `error` event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Generation(GenerationError::Provider {
                source: ProviderError::Exhausted { .. },
                ..
            }) => "provider_exhausted",
            EngineError::Generation(_) => "generation_failure",
            EngineError::Config(_) => "configuration_error",
            EngineError::Cancelled => "cancelled",
        }
    }
}

/// Errors from model provider interactions.
///
/// Transient variants drive the Model Router's fallback to the next
/// provider in order; fatal variants propagate immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Provider server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider rejected request: {message}")]
    BadRequest { message: String },

    #[error("Provider response parse error: {message}")]
    ResponseParse { message: String },

    #[error("All {attempts} configured providers failed")]
    Exhausted { attempts: usize },
}

impl ProviderError {
    /// Whether the Model Router should fall back to the next provider.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::Connection { .. }
                | ProviderError::Server { .. }
        )
    }
}

/// A pipeline stage could not produce valid output.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Provider error during {stage}: {source}")]
    Provider {
        stage: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("Stage {stage} produced invalid output: {message}")]
    InvalidOutput { stage: &'static str, message: String },
}

impl GenerationError {
    pub fn provider(stage: &'static str, source: ProviderError) -> Self {
        GenerationError::Provider { stage, source }
    }
}

/// Errors from a single search-provider call.
///
/// Always recovered locally: the failing query contributes no findings
/// and the iteration continues.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("Search timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Search connection failed: {message}")]
    Connection { message: String },

    #[error("Search API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Search response parse error: {message}")]
    ResponseParse { message: String },
}

/// Invalid session or engine configuration, rejected synchronously at
/// `start` before any session is created.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unknown provider in provider_order: {id}")]
    UnknownProvider { id: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

//! Engine and session configuration.
//!
//! Uses `figment` for layered configuration: defaults -> TOML file ->
//! `DEEPSEARCH_`-prefixed environment variables. Session configuration
//! is validated synchronously at `start`; an invalid configuration is
//! rejected before any session state is created.

use crate::error::ConfigError;
use crate::event::BufferPolicy;
use crate::types::ProviderId;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-session configuration, supplied by the caller at `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum search iterations before forced progression to Enhancing.
    pub max_iterations: usize,
    /// Maximum re-plans the Reflection Evaluator may request.
    pub max_replans: usize,
    /// Providers to try, primary first. Must match ids registered with
    /// the Model Router.
    pub provider_order: Vec<ProviderId>,
    /// Search queries issued per iteration.
    pub queries_per_iteration: usize,
    /// Results requested per search query.
    pub results_per_query: usize,
    /// Per-call model completion timeout in seconds.
    pub model_timeout_secs: u64,
    /// Per-query search timeout in seconds.
    pub search_timeout_secs: u64,
    /// When report generation fails, flush the enhanced findings as a
    /// degraded report instead of failing the session.
    pub degraded_report: bool,
    /// Event stream buffering policy.
    pub event_buffer: BufferPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_replans: 1,
            provider_order: Vec::new(),
            queries_per_iteration: 5,
            results_per_query: 8,
            model_timeout_secs: 60,
            search_timeout_secs: 15,
            degraded_report: true,
            event_buffer: BufferPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Validate the configuration. Called synchronously by
    /// `Orchestrator::start` before a session exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "max_iterations must be >= 1".into(),
            });
        }
        if self.provider_order.is_empty() {
            return Err(ConfigError::MissingField {
                field: "provider_order".into(),
            });
        }
        if self.queries_per_iteration == 0 {
            return Err(ConfigError::Invalid {
                message: "queries_per_iteration must be >= 1".into(),
            });
        }
        if self.results_per_query == 0 {
            return Err(ConfigError::Invalid {
                message: "results_per_query must be >= 1".into(),
            });
        }
        if self.model_timeout_secs == 0 || self.search_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "timeouts must be >= 1s".into(),
            });
        }
        match self.event_buffer {
            BufferPolicy::Backpressure { capacity } | BufferPolicy::DropOldest { capacity } => {
                if capacity == 0 {
                    return Err(ConfigError::Invalid {
                        message: "event buffer capacity must be >= 1".into(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

/// Connection settings for one model provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Identifier referenced by `SessionConfig::provider_order`.
    pub id: String,
    /// OpenAI-compatible base URL (e.g. `https://host/v1`).
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Default model name.
    pub model: String,
}

/// Connection settings for the web search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Web search endpoint URL.
    pub base_url: String,
    /// Environment variable holding the API key, if required.
    pub api_key_env: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: None,
        }
    }
}

/// Process-wide engine configuration, loadable from file and environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub providers: Vec<ProviderSettings>,
    pub search: SearchSettings,
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Load configuration with layering: defaults -> optional TOML file
    /// -> `DEEPSEARCH_`-prefixed environment variables (`__` splits
    /// nesting levels).
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("DEEPSEARCH_").split("__"));
        figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

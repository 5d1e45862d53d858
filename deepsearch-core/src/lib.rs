//! DeepSearch engine core.
//!
//! A streaming research orchestration engine: a session takes a
//! research goal through planning, iterative web search, reflection,
//! quality enhancement, and report synthesis, emitting an ordered
//! event stream along the way.
//!
//! The [`Orchestrator`] is the entry point. Model access goes through
//! the [`providers::ModelRouter`], which applies ordered fallback
//! across [`providers::LlmProvider`] implementations; web search goes
//! through the [`search::SearchProvider`] trait. Both seams accept mock
//! implementations, so the whole pipeline is testable without network
//! access.
//!
//! ```no_run
//! use deepsearch_core::{Orchestrator, SessionConfig};
//! use deepsearch_core::providers::{LlmProvider, MockLlmProvider, ModelRouter};
//! use deepsearch_core::search::MockSearchProvider;
//! use deepsearch_core::types::ProviderId;
//! use std::sync::Arc;
//!
//! # async fn run() -> deepsearch_core::Result<()> {
//! let router = ModelRouter::new(vec![(
//!     ProviderId::new("mock"),
//!     Arc::new(MockLlmProvider::new()) as Arc<dyn LlmProvider>,
//! )]);
//! let engine = Orchestrator::new(Arc::new(router), Arc::new(MockSearchProvider::new(3)));
//!
//! let config = SessionConfig {
//!     provider_order: vec![ProviderId::new("mock")],
//!     ..SessionConfig::default()
//! };
//! let (handle, mut events) = engine.start("quantum networking market outlook", config)?;
//! while let Some(event) = events.next().await {
//!     println!("{} {:?}", event.sequence, event.kind);
//! }
//! # let _ = handle;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod enhance;
pub mod error;
pub mod event;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod providers;
pub mod reflect;
pub mod report;
pub mod search;
pub mod session;
pub mod types;

pub use config::{EngineConfig, ProviderSettings, SearchSettings, SessionConfig};
pub use error::{ConfigError, EngineError, GenerationError, ProviderError, Result, SearchError};
pub use event::{BufferPolicy, Event, EventKind, EventStream};
pub use orchestrator::{Orchestrator, SessionHandle};
pub use planner::{Plan, Query};
pub use reflect::ReflectionVerdict;
pub use report::ResearchReport;
pub use session::{ConfidenceTier, Finding, Session, SessionPhase, SourceRef};

//! DeepSearch command line: runs one research session and prints its
//! event stream as JSON lines. Ctrl-C cancels the session cooperatively
//! and the stream still ends with a terminal event.

use anyhow::{bail, Context, Result};
use clap::Parser;
use deepsearch_core::providers::{LlmProvider, ModelRouter, OpenAiCompatProvider};
use deepsearch_core::search::HttpSearchProvider;
use deepsearch_core::types::ProviderId;
use deepsearch_core::{BufferPolicy, EngineConfig, EventKind, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "deepsearch", version, about = "Streaming deep-research engine")]
struct Cli {
    /// Research goal to investigate.
    goal: String,

    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the maximum number of search iterations.
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Override the number of queries per iteration.
    #[arg(long)]
    queries: Option<usize>,

    /// Drop oldest buffered events instead of applying backpressure.
    #[arg(long)]
    drop_oldest: bool,

    /// Print only report chunks and the terminal event.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let mut session_config = config.session.clone();
    if let Some(max_iterations) = cli.max_iterations {
        session_config.max_iterations = max_iterations;
    }
    if let Some(queries) = cli.queries {
        session_config.queries_per_iteration = queries;
    }
    if cli.drop_oldest {
        session_config.event_buffer = BufferPolicy::DropOldest { capacity: 256 };
    }

    let engine = build_engine(&config)?;
    let (handle, mut events) = engine.start(&cli.goal, session_config)?;
    info!(session_id = %handle.id(), "Session started");

    let cancel_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling session");
            cancel_handle.cancel();
        }
    });

    let mut failed = false;
    while let Some(event) = events.next().await {
        if event.kind == EventKind::Error {
            failed = true;
        }
        if cli.quiet && !matches!(event.kind, EventKind::ReportChunk) && !event.kind.is_terminal() {
            continue;
        }
        println!("{}", serde_json::to_string(&event)?);
    }

    if failed {
        bail!("session ended with an error");
    }
    Ok(())
}

fn build_engine(config: &EngineConfig) -> Result<Orchestrator> {
    if config.providers.is_empty() {
        bail!("no model providers configured; add a [[providers]] entry");
    }
    if config.search.base_url.is_empty() {
        bail!("no search endpoint configured; set [search] base_url");
    }

    let mut providers: Vec<(ProviderId, Arc<dyn LlmProvider>)> = Vec::new();
    for settings in &config.providers {
        let api_key = std::env::var(&settings.api_key_env)
            .with_context(|| format!("environment variable {} not set", settings.api_key_env))?;
        let provider =
            OpenAiCompatProvider::new(&settings.base_url, api_key, &settings.model)
                .with_context(|| format!("building provider {}", settings.id))?;
        providers.push((ProviderId::new(&settings.id), Arc::new(provider)));
    }
    let router = Arc::new(ModelRouter::new(providers));

    let search_key = match &config.search.api_key_env {
        Some(var) => Some(
            std::env::var(var)
                .with_context(|| format!("environment variable {var} not set"))?,
        ),
        None => None,
    };
    let search = Arc::new(
        HttpSearchProvider::new(&config.search.base_url, search_key)
            .context("building search provider")?,
    );

    Ok(Orchestrator::new(router, search))
}

//! Search execution: one iteration's queries run concurrently.
//!
//! Queries of an iteration are spawned together and folded into
//! findings as each completes. A failing query is reported through a
//! `search_failed` event and contributes nothing; only cancellation
//! aborts the batch. Per-query timeouts are enforced here so one hung
//! backend call cannot stall the iteration.

use crate::error::{EngineError, SearchError};
use crate::event::{EventEmitter, EventKind};
use crate::planner::Query;
use crate::search::{SearchHit, SearchProvider};
use crate::session::{ConfidenceTier, Finding, Session, SourceRef};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome counters for one executed batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub succeeded: usize,
    pub failed: usize,
    pub findings_added: usize,
}

/// Runs the Searching phase for one iteration.
#[derive(Debug, Clone, Default)]
pub struct SearchExecutor;

impl SearchExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute all queries concurrently, recording findings on the
    /// session and emitting per-query events as results arrive.
    ///
    /// Returns `EngineError::Cancelled` as soon as the token fires;
    /// in-flight queries are aborted and contribute nothing.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        provider: Arc<dyn SearchProvider>,
        queries: &[Query],
        results_per_query: usize,
        timeout: Duration,
        cancel: &CancellationToken,
        session: &mut Session,
        emitter: &mut EventEmitter,
    ) -> Result<BatchStats, EngineError> {
        let mut tasks = JoinSet::new();
        for query in queries {
            let provider = provider.clone();
            let text = query.text.clone();
            tasks.spawn(async move {
                let outcome =
                    match tokio::time::timeout(timeout, provider.search(&text, results_per_query))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(SearchError::Timeout {
                            timeout_secs: timeout.as_secs(),
                        }),
                    };
                (text, outcome)
            });
        }

        let mut stats = BatchStats::default();
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(EngineError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            let (query_text, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Search task did not complete");
                    continue;
                }
            };

            match outcome {
                Ok(hits) => {
                    stats.succeeded += 1;
                    debug!(query = %query_text, results = hits.len(), "Search query completed");
                    emitter
                        .emit(
                            EventKind::ResultReceived,
                            json!({
                                "query": query_text,
                                "result_count": hits.len(),
                                "sources": hits.iter().map(|h| &h.source).collect::<Vec<_>>(),
                            }),
                        )
                        .await;

                    if let Some(finding) = fold_finding(&query_text, &hits) {
                        emitter
                            .emit(
                                EventKind::FindingAdded,
                                json!({
                                    "finding_id": finding.id,
                                    "query": finding.query,
                                    "claim": finding.claim,
                                    "confidence": finding.confidence,
                                    "source_count": finding.sources.len(),
                                }),
                            )
                            .await;
                        session.add_finding(finding);
                        stats.findings_added += 1;
                    }
                }
                Err(error) => {
                    stats.failed += 1;
                    warn!(query = %query_text, error = %error, "Search query failed");
                    emitter
                        .emit(
                            EventKind::SearchFailed,
                            json!({
                                "query": query_text,
                                "error": error.to_string(),
                            }),
                        )
                        .await;
                }
            }
        }

        Ok(stats)
    }
}

/// Fold a query's hits into a single finding. Empty result sets yield
/// no finding.
fn fold_finding(query: &str, hits: &[SearchHit]) -> Option<Finding> {
    if hits.is_empty() {
        return None;
    }

    let claim = hits
        .iter()
        .filter(|h| !h.snippet.is_empty())
        .take(3)
        .map(|h| h.snippet.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if claim.is_empty() {
        return None;
    }

    let sources = hits
        .iter()
        .map(|h| SourceRef {
            title: h.title.clone(),
            url: h.url.clone(),
            site: h.source.clone(),
        })
        .collect();

    let average_score = hits.iter().map(|h| h.score).sum::<f64>() / hits.len() as f64;

    Some(
        Finding::new(query, claim, sources)
            .with_confidence(ConfidenceTier::from_score(average_score)),
    )
}

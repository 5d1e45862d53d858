//! Web search provider abstraction.
//!
//! The engine consumes search through the [`SearchProvider`] trait; a
//! JSON-POST HTTP implementation and a scriptable mock are provided.
//! Per-query failures are always recovered by the Search Executor, so
//! implementations report errors instead of panicking or retrying.

use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// One normalized search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Site or publisher name.
    pub source: String,
    /// Result title.
    pub title: String,
    pub url: Option<String>,
    /// Content snippet or summary.
    pub snippet: String,
    /// Relevance signal in [0, 1].
    pub score: f64,
}

/// Trait for web search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search and return up to `limit` normalized hits.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// HTTP search provider speaking a JSON POST protocol:
/// `{"query": ..., "count": ..., "summary": true}` against a web-search
/// endpoint returning `data.webPages.value` entries.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSearchProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent("deepsearch/0.3")
            .build()
            .map_err(|e| SearchError::Connection {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    fn parse_hits(body: &serde_json::Value, limit: usize) -> Vec<SearchHit> {
        let pages = body
            .pointer("/data/webPages/value")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        pages
            .iter()
            .take(limit)
            .enumerate()
            .map(|(rank, page)| {
                let text_field = |key: &str| {
                    page.get(key)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                let snippet = {
                    let summary = text_field("summary");
                    if summary.is_empty() {
                        text_field("snippet")
                    } else {
                        summary
                    }
                };
                SearchHit {
                    source: text_field("siteName"),
                    title: text_field("name"),
                    url: page
                        .get("url")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    snippet,
                    // Rank-derived relevance: providers on this protocol
                    // return results ordered but unscored.
                    score: (1.0 - rank as f64 * 0.05).max(0.1),
                }
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let mut request = self.client.post(&self.base_url).json(&json!({
            "query": query,
            "count": limit,
            "summary": true,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout { timeout_secs: 0 }
            } else {
                SearchError::Connection {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| SearchError::ResponseParse {
                    message: e.to_string(),
                })?;

        Ok(Self::parse_hits(&body, limit))
    }
}

/// A scriptable mock search provider for tests.
///
/// Produces `hits_per_query` synthetic hits per query; queries
/// containing any configured failure marker fail with a connection
/// error, and an optional artificial delay simulates slow backends.
pub struct MockSearchProvider {
    hits_per_query: usize,
    fail_markers: Vec<String>,
    delay: Option<Duration>,
}

impl MockSearchProvider {
    pub fn new(hits_per_query: usize) -> Self {
        Self {
            hits_per_query,
            fail_markers: Vec::new(),
            delay: None,
        }
    }

    /// Queries containing `marker` will fail.
    pub fn fail_queries_containing(mut self, marker: impl Into<String>) -> Self {
        self.fail_markers.push(marker.into());
        self
    }

    /// Delay every call by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_markers.iter().any(|m| query.contains(m.as_str())) {
            return Err(SearchError::Connection {
                message: format!("mock failure for query: {query}"),
            });
        }
        Ok((0..self.hits_per_query.min(limit))
            .map(|i| SearchHit {
                source: "mock".to_string(),
                title: format!("{query} (result {})", i + 1),
                url: Some(format!("https://example.com/{}", i + 1)),
                snippet: format!("Snippet {} about {query}.", i + 1),
                score: (0.9 - i as f64 * 0.1).max(0.1),
            })
            .collect())
    }
}

//! Model Router — ordered multi-provider fallback with per-session
//! sticky selection.
//!
//! The router holds the process-wide provider registry, read-only after
//! construction and safely shared across sessions. Each session derives
//! a [`RouterCursor`] from its configured provider order; after a
//! fallback succeeds, the cursor stays on the last successful provider
//! so the session stops retrying a known-bad primary.

use super::LlmProvider;
use crate::error::{ConfigError, ProviderError};
use crate::types::{CompletionRequest, ProviderId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

struct RouterEntry {
    id: ProviderId,
    provider: Arc<dyn LlmProvider>,
}

/// Ordered registry of model providers.
pub struct ModelRouter {
    entries: Vec<RouterEntry>,
}

impl ModelRouter {
    pub fn new(providers: Vec<(ProviderId, Arc<dyn LlmProvider>)>) -> Self {
        let entries = providers
            .into_iter()
            .map(|(id, provider)| RouterEntry { id, provider })
            .collect();
        Self { entries }
    }

    /// Registered provider ids, in registration order.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Resolve a session's provider order into a cursor.
    ///
    /// Fails with `ConfigError` if the order references an unregistered
    /// provider; this is part of synchronous `start` validation.
    pub fn session_cursor(&self, order: &[ProviderId]) -> Result<RouterCursor, ConfigError> {
        let mut indices = Vec::with_capacity(order.len());
        for id in order {
            let index = self
                .entries
                .iter()
                .position(|e| &e.id == id)
                .ok_or_else(|| ConfigError::UnknownProvider {
                    id: id.to_string(),
                })?;
            indices.push(index);
        }
        Ok(RouterCursor {
            order: indices,
            position: 0,
        })
    }

    /// Complete against the cursor's current provider, falling back on
    /// transient failures (timeout, rate limit, connection, 5xx).
    ///
    /// The per-call `timeout` is enforced here and treated as a
    /// transient failure. Fatal errors propagate immediately without
    /// fallback. If every remaining provider fails transiently the call
    /// returns `ProviderError::Exhausted`.
    pub async fn complete(
        &self,
        cursor: &mut RouterCursor,
        request: CompletionRequest,
        timeout: Duration,
    ) -> Result<RoutedCompletion, ProviderError> {
        let mut fallbacks = Vec::new();

        for pos in cursor.position..cursor.order.len() {
            let entry = &self.entries[cursor.order[pos]];
            debug!(provider = %entry.id, "Dispatching completion");

            let outcome =
                match tokio::time::timeout(timeout, entry.provider.complete(request.clone())).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    }),
                };

            match outcome {
                Ok(response) => {
                    cursor.position = pos;
                    return Ok(RoutedCompletion {
                        text: response.text,
                        model: response.model,
                        provider: entry.id.clone(),
                        fallbacks,
                    });
                }
                Err(e) if e.is_transient() => {
                    warn!(provider = %entry.id, error = %e, "Provider failed, trying next");
                    if let Some(next_pos) = cursor.order.get(pos + 1) {
                        fallbacks.push(FallbackHop {
                            from: entry.id.clone(),
                            to: self.entries[*next_pos].id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                Err(e) => {
                    warn!(provider = %entry.id, error = %e, "Provider failed fatally");
                    return Err(e);
                }
            }
        }

        Err(ProviderError::Exhausted {
            attempts: cursor.order.len() - cursor.position,
        })
    }
}

/// Per-session provider selection state. Owned by the session task.
#[derive(Debug, Clone)]
pub struct RouterCursor {
    /// Indices into the router registry, session's priority order.
    order: Vec<usize>,
    /// Current starting position; advances on successful fallback.
    position: usize,
}

impl RouterCursor {
    /// Position within the session's provider order (0 = primary).
    pub fn position(&self) -> usize {
        self.position
    }
}

/// A completion annotated with routing information.
#[derive(Debug, Clone)]
pub struct RoutedCompletion {
    pub text: String,
    pub model: String,
    /// Provider that produced the completion.
    pub provider: ProviderId,
    /// Fallback hops taken before success, in order.
    pub fallbacks: Vec<FallbackHop>,
}

/// One fallback from a failed provider to the next in order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FallbackHop {
    pub from: ProviderId,
    pub to: ProviderId,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockLlmProvider;

    fn router_of(providers: Vec<(&str, MockLlmProvider)>) -> ModelRouter {
        ModelRouter::new(
            providers
                .into_iter()
                .map(|(id, p)| {
                    (
                        ProviderId::new(id),
                        Arc::new(p) as Arc<dyn LlmProvider>,
                    )
                })
                .collect(),
        )
    }

    fn order(ids: &[&str]) -> Vec<ProviderId> {
        ids.iter().map(|s| ProviderId::new(*s)).collect()
    }

    #[tokio::test]
    async fn test_primary_succeeds_no_fallback() {
        let router = router_of(vec![
            ("a", MockLlmProvider::with_response("primary")),
            ("b", MockLlmProvider::with_response("secondary")),
        ]);
        let mut cursor = router.session_cursor(&order(&["a", "b"])).unwrap();

        let routed = router
            .complete(
                &mut cursor,
                CompletionRequest::new("q"),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(routed.text, "primary");
        assert_eq!(routed.provider, ProviderId::new("a"));
        assert!(routed.fallbacks.is_empty());
        assert_eq!(cursor.position(), 0);
    }

    #[tokio::test]
    async fn test_fallback_to_secondary_and_sticky() {
        let router = router_of(vec![
            (
                "a",
                MockLlmProvider::always_failing(ProviderError::Connection {
                    message: "refused".into(),
                }),
            ),
            ("b", MockLlmProvider::with_response("secondary")),
        ]);
        let mut cursor = router.session_cursor(&order(&["a", "b"])).unwrap();

        let routed = router
            .complete(
                &mut cursor,
                CompletionRequest::new("q"),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(routed.text, "secondary");
        assert_eq!(routed.fallbacks.len(), 1);
        assert_eq!(routed.fallbacks[0].from, ProviderId::new("a"));
        assert_eq!(routed.fallbacks[0].to, ProviderId::new("b"));

        // Subsequent calls start from the secondary: no new fallbacks.
        let routed = router
            .complete(
                &mut cursor,
                CompletionRequest::new("q2"),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(routed.provider, ProviderId::new("b"));
        assert!(routed.fallbacks.is_empty());
        assert_eq!(cursor.position(), 1);
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let router = router_of(vec![
            (
                "a",
                MockLlmProvider::always_failing(ProviderError::RateLimited {
                    retry_after_secs: 5,
                }),
            ),
            (
                "b",
                MockLlmProvider::always_failing(ProviderError::Server {
                    status: 503,
                    message: "overloaded".into(),
                }),
            ),
        ]);
        let mut cursor = router.session_cursor(&order(&["a", "b"])).unwrap();

        let result = router
            .complete(
                &mut cursor,
                CompletionRequest::new("q"),
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::Exhausted { attempts: 2 })
        ));
    }

    #[tokio::test]
    async fn test_fatal_error_skips_fallback() {
        let fatal = MockLlmProvider::always_failing(ProviderError::AuthFailed {
            provider: "a".into(),
        });
        let router = router_of(vec![("a", fatal), ("b", MockLlmProvider::new())]);
        let mut cursor = router.session_cursor(&order(&["a", "b"])).unwrap();

        let result = router
            .complete(
                &mut cursor,
                CompletionRequest::new("q"),
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(result, Err(ProviderError::AuthFailed { .. })));
    }

    #[tokio::test]
    async fn test_session_order_subsets_registry() {
        let router = router_of(vec![
            ("a", MockLlmProvider::with_response("a-text")),
            ("b", MockLlmProvider::with_response("b-text")),
        ]);
        // Session that only wants the secondary.
        let mut cursor = router.session_cursor(&order(&["b"])).unwrap();
        let routed = router
            .complete(
                &mut cursor,
                CompletionRequest::new("q"),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(routed.text, "b-text");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let router = router_of(vec![("a", MockLlmProvider::new())]);
        let result = router.session_cursor(&order(&["a", "missing"]));
        assert!(matches!(
            result,
            Err(ConfigError::UnknownProvider { .. })
        ));
    }

    #[tokio::test]
    async fn test_call_timeout_is_transient() {
        struct SlowProvider;
        #[async_trait::async_trait]
        impl LlmProvider for SlowProvider {
            async fn complete(
                &self,
                _request: CompletionRequest,
            ) -> Result<crate::types::CompletionResponse, ProviderError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(MockLlmProvider::text_response("too late"))
            }
            fn model_name(&self) -> &str {
                "slow"
            }
        }

        let router = ModelRouter::new(vec![
            (
                ProviderId::new("slow"),
                Arc::new(SlowProvider) as Arc<dyn LlmProvider>,
            ),
            (
                ProviderId::new("fast"),
                Arc::new(MockLlmProvider::with_response("fast")) as Arc<dyn LlmProvider>,
            ),
        ]);
        let mut cursor = router.session_cursor(&order(&["slow", "fast"])).unwrap();

        let routed = router
            .complete(
                &mut cursor,
                CompletionRequest::new("q"),
                Duration::from_millis(50),
            )
            .await
            .unwrap();
        assert_eq!(routed.text, "fast");
        assert_eq!(routed.fallbacks.len(), 1);
        assert!(routed.fallbacks[0].reason.contains("timed out"));
    }
}

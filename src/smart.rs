//! The orchestrating backend.
//!
//! [`SmartBackend`] implements the [`Backend`] contract and composes the
//! circuit breaker, response cache, model-list cache, and metrics around an
//! inner backend (a [`MultiBackend`](crate::routing::MultiBackend) in
//! production). Every query runs the same gauntlet:
//!
//! 1. circuit gate → 2. cache lookup → 3. dispatch → 4. record + store.
//!
//! The cache and the breaker can each be disabled independently.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{Backend, ModelInfo, QueryOptions, QueryResponse};
use crate::breaker::CircuitBreaker;
use crate::cache::{cache_key, ModelListCache, ResponseCache};
use crate::error::{HydraError, Result};
use crate::metrics::Metrics;
use crate::reasoning;

/// Feature flags for the orchestrator's resilience layers.
#[derive(Debug, Clone, Copy)]
pub struct SmartFlags {
    pub cache_enabled: bool,
    pub breaker_enabled: bool,
}

impl Default for SmartFlags {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            breaker_enabled: true,
        }
    }
}

/// Backend wrapper owning all cross-cutting policy.
pub struct SmartBackend {
    inner: Arc<dyn Backend>,
    breaker: CircuitBreaker,
    cache: ResponseCache,
    model_list: ModelListCache,
    metrics: Metrics,
    flags: SmartFlags,
}

impl SmartBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::default(),
            cache: ResponseCache::default(),
            model_list: ModelListCache::default(),
            metrics: Metrics::new(),
            flags: SmartFlags::default(),
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_model_list_cache(mut self, cache: ModelListCache) -> Self {
        self.model_list = cache;
        self
    }

    pub fn with_flags(mut self, flags: SmartFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn tokens_of(response: &QueryResponse) -> u64 {
        response.usage.map(|u| u.total_tokens).unwrap_or(0)
    }
}

#[async_trait]
impl Backend for SmartBackend {
    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    /// The merged catalog, served from the short-TTL cache when fresh.
    ///
    /// Open circuits are filtered on **every** call, cached or not, so a
    /// model entering cooldown mid-cache-window disappears from the catalog
    /// on the very next read.
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut catalog = match self.model_list.get() {
            Some(cached) => cached,
            None => {
                let fresh = self.inner.list_models().await?;
                self.model_list.set(fresh.clone());
                fresh
            }
        };

        if self.flags.breaker_enabled {
            let open = self.breaker.open_models();
            if !open.is_empty() {
                catalog.retain(|m| !open.contains(&m.id));
            }
        }
        Ok(catalog)
    }

    async fn query(
        &self,
        model: &str,
        prompt: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse> {
        // 1. Circuit gate — an open circuit fails fast and never touches
        //    the cache.
        if self.flags.breaker_enabled && self.breaker.is_open(model) {
            let retry_in_ms = self
                .breaker
                .cooldown_remaining(model)
                .unwrap_or_default()
                .as_millis() as u64;
            self.metrics.record_failure(model, 0);
            return Err(HydraError::Unavailable {
                model: model.to_string(),
                retry_in_ms,
            });
        }

        // 2. Cache lookup
        let key = cache_key(model, prompt, options);
        if self.flags.cache_enabled {
            if let Some(mut cached) = self.cache.get(&key) {
                tracing::debug!(model, "serving response from cache");
                self.metrics
                    .record_cache_hit(model, Self::tokens_of(&cached));
                cached.latency_ms = 0;
                return Ok(cached);
            }
        }

        // 3. Dispatch
        match self.inner.query(model, prompt, options).await {
            // 4. Success: close the circuit, record, store
            Ok(mut response) => {
                if self.flags.breaker_enabled {
                    self.breaker.record_success(model);
                }
                reasoning::promote_reasoning(&mut response);
                self.metrics.record_success(
                    model,
                    response.latency_ms,
                    Self::tokens_of(&response),
                );
                if self.flags.cache_enabled {
                    self.cache.set(&key, response.clone());
                }
                Ok(response)
            }
            // 5. Failure: trip the breaker before the error surfaces
            Err(e) => {
                if self.flags.breaker_enabled {
                    self.breaker.record_failure(model);
                }
                self.metrics.record_failure(model, 0);
                tracing::warn!(model, error = %e, "query failed");
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "smart"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockOutcome};
    use crate::backend::TokenUsage;
    use std::time::Duration;

    fn hi_outcome() -> MockOutcome {
        MockOutcome::ReplyWith {
            content: "hi".into(),
            reasoning: None,
            usage: Some(TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            }),
            latency_ms: 400,
        }
    }

    #[tokio::test]
    async fn cache_hit_has_zero_latency_and_skips_backend() {
        let mock = Arc::new(MockBackend::new(vec![hi_outcome()]));
        let smart = SmartBackend::new(mock.clone());
        let opts = QueryOptions::default();

        let first = smart.query("m1", "p", &opts).await.unwrap();
        assert_eq!(first.content, "hi");
        assert_eq!(first.latency_ms, 400);

        let second = smart.query("m1", "p", &opts).await.unwrap();
        assert_eq!(second.content, "hi");
        assert_eq!(second.latency_ms, 0);
        assert_eq!(mock.calls(), 1);

        let session = smart.metrics().session_summary();
        assert_eq!(session.cache_hits, 1);
        assert_eq!(session.cache_tokens_saved, 2);
        assert_eq!(session.total_queries, 2);
    }

    #[tokio::test]
    async fn different_options_miss_the_cache() {
        let mock = Arc::new(MockBackend::fixed("answer"));
        let smart = SmartBackend::new(mock.clone());

        smart
            .query("m1", "p", &QueryOptions::default())
            .await
            .unwrap();
        smart
            .query("m1", "p", &QueryOptions::default().with_temperature(0.1))
            .await
            .unwrap();
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_then_recovers() {
        let mock = Arc::new(MockBackend::new(vec![
            MockOutcome::HttpError(500, "boom".into()),
            MockOutcome::HttpError(500, "boom".into()),
            MockOutcome::HttpError(500, "boom".into()),
            MockOutcome::Reply("recovered".into()),
            MockOutcome::Reply("normal".into()),
        ]));
        let smart = SmartBackend::new(mock.clone());
        let opts = QueryOptions::default();

        for _ in 0..3 {
            assert!(smart.query("m1", "q", &opts).await.is_err());
        }
        assert_eq!(mock.calls(), 3);

        // Circuit open: rejected without invoking the backend
        let err = smart.query("m1", "q", &opts).await.unwrap_err();
        assert!(matches!(err, HydraError::Unavailable { .. }));
        assert_eq!(mock.calls(), 3);

        // After the cooldown one probe goes through and resets the circuit
        tokio::time::advance(Duration::from_millis(60_000)).await;
        let resp = smart.query("m1", "probe", &opts).await.unwrap();
        assert_eq!(resp.content, "recovered");

        let resp = smart.query("m1", "next", &opts).await.unwrap();
        assert_eq!(resp.content, "normal");
        assert_eq!(mock.calls(), 5);
    }

    #[tokio::test]
    async fn circuit_open_failure_is_zero_latency_in_metrics() {
        let mock = Arc::new(MockBackend::failing(500, "down"));
        let smart = SmartBackend::new(mock);
        let opts = QueryOptions::default();

        for _ in 0..3 {
            let _ = smart.query("m1", "q", &opts).await;
        }
        let _ = smart.query("m1", "q", &opts).await;

        let stats = smart.metrics().model_stats("m1").unwrap();
        assert_eq!(stats.failures, 4);
        assert_eq!(stats.total_latency_ms, 0);
    }

    #[tokio::test]
    async fn open_circuit_hides_model_from_catalog() {
        let mock = Arc::new(
            MockBackend::new(vec![
                MockOutcome::HttpError(500, "down".into()),
            ])
            .with_models(&["m1", "m2"]),
        );
        let smart = SmartBackend::new(mock);
        let opts = QueryOptions::default();

        assert_eq!(smart.list_models().await.unwrap().len(), 2);

        for _ in 0..3 {
            let _ = smart.query("m1", "q", &opts).await;
        }

        // Catalog is still cached from the first call, but the open circuit
        // is filtered on this read anyway
        let visible = smart.list_models().await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "m2");
    }

    #[tokio::test]
    async fn catalog_is_cached_between_calls() {
        let mock = Arc::new(MockBackend::fixed("x").with_models(&["m1"]));
        let smart = SmartBackend::new(mock.clone());

        smart.list_models().await.unwrap();
        smart.list_models().await.unwrap();
        // list_models on the mock is cheap to count via recorded queries:
        // only query() is counted, so assert via the model-list cache
        // behavior instead — a fresh fetch would not change the result
        assert_eq!(smart.list_models().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_cache_always_dispatches() {
        let mock = Arc::new(MockBackend::fixed("answer"));
        let smart = SmartBackend::new(mock.clone()).with_flags(SmartFlags {
            cache_enabled: false,
            breaker_enabled: true,
        });
        let opts = QueryOptions::default();

        smart.query("m1", "p", &opts).await.unwrap();
        smart.query("m1", "p", &opts).await.unwrap();
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn disabled_breaker_never_rejects() {
        let mock = Arc::new(MockBackend::failing(500, "down"));
        let smart = SmartBackend::new(mock.clone()).with_flags(SmartFlags {
            cache_enabled: true,
            breaker_enabled: false,
        });
        let opts = QueryOptions::default();

        for _ in 0..5 {
            let err = smart.query("m1", "q", &opts).await.unwrap_err();
            assert!(matches!(err, HydraError::Backend { .. }));
        }
        // Every call reached the backend; none was short-circuited
        assert_eq!(mock.calls(), 5);
    }

    #[tokio::test]
    async fn reasoning_only_response_is_promoted() {
        let mock = Arc::new(MockBackend::new(vec![MockOutcome::ReplyWith {
            content: String::new(),
            reasoning: Some("chain of thought".into()),
            usage: None,
            latency_ms: 10,
        }]));
        let smart = SmartBackend::new(mock);

        let resp = smart
            .query("o3", "p", &QueryOptions::default())
            .await
            .unwrap();
        assert!(resp.content.contains("chain of thought"));
        assert!(resp.content.starts_with(reasoning::REASONING_PREFIX));
    }
}

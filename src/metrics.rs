//! In-memory per-model and session metrics.
//!
//! Append-only within the process lifetime; nothing decays and nothing is
//! persisted. One reader/writer lock per map.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::time::Instant;

/// Accumulated counters for one model.
#[derive(Debug, Clone, Default)]
pub struct ModelStats {
    pub queries: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub total_tokens: u64,
    pub last_query: Option<Instant>,
}

impl ModelStats {
    /// Mean latency over all recorded queries (0 when none).
    pub fn avg_latency_ms(&self) -> u64 {
        if self.queries == 0 {
            0
        } else {
            self.total_latency_ms / self.queries
        }
    }

    /// Fraction of queries that succeeded; 1.0 when none were made.
    pub fn success_rate(&self) -> f64 {
        if self.queries == 0 {
            1.0
        } else {
            self.successes as f64 / self.queries as f64
        }
    }
}

/// Session-level counters across all models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub total_queries: u64,
    pub total_failures: u64,
    pub cache_hits: u64,
    pub cache_tokens_saved: u64,
}

/// Metrics store owned by the orchestrator.
#[derive(Debug, Default)]
pub struct Metrics {
    models: RwLock<HashMap<String, ModelStats>>,
    session: RwLock<SessionSummary>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, model: &str, latency_ms: u64, tokens: u64) {
        let mut models = self.models.write().unwrap();
        let stats = models.entry(model.to_string()).or_default();
        stats.queries += 1;
        stats.successes += 1;
        stats.total_latency_ms += latency_ms;
        stats.total_tokens += tokens;
        stats.last_query = Some(Instant::now());

        self.session.write().unwrap().total_queries += 1;
    }

    pub fn record_failure(&self, model: &str, latency_ms: u64) {
        let mut models = self.models.write().unwrap();
        let stats = models.entry(model.to_string()).or_default();
        stats.queries += 1;
        stats.failures += 1;
        stats.total_latency_ms += latency_ms;
        stats.last_query = Some(Instant::now());

        let mut session = self.session.write().unwrap();
        session.total_queries += 1;
        session.total_failures += 1;
    }

    /// A cache hit counts as a zero-latency success carrying the cached
    /// token total, plus the session-level savings counters.
    pub fn record_cache_hit(&self, model: &str, tokens_saved: u64) {
        self.record_success(model, 0, tokens_saved);
        let mut session = self.session.write().unwrap();
        session.cache_hits += 1;
        session.cache_tokens_saved += tokens_saved;
    }

    pub fn model_stats(&self, model: &str) -> Option<ModelStats> {
        self.models.read().unwrap().get(model).cloned()
    }

    pub fn session_summary(&self) -> SessionSummary {
        *self.session.read().unwrap()
    }
}

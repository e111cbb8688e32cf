//! Mock backend for testing without live providers.
//!
//! [`MockBackend`] plays back a script of outcomes in order, cycling when
//! exhausted, and records every call so orchestration tests can assert on
//! dispatch counts and prompts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Backend, ModelInfo, QueryOptions, QueryResponse, TokenUsage};
use crate::error::{HydraError, Result};

/// One scripted outcome for a mock call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with this content and default metadata.
    Reply(String),
    /// Succeed with full control over the response fields.
    ReplyWith {
        content: String,
        reasoning: Option<String>,
        usage: Option<TokenUsage>,
        latency_ms: u64,
    },
    /// Fail with an HTTP status error.
    HttpError(u16, String),
    /// Fail with a timeout.
    Timeout,
    /// Fail as if this backend does not serve the model.
    UnknownModel,
}

/// A test backend that plays back scripted outcomes in order.
///
/// Cycles back to the beginning when the script is exhausted.
pub struct MockBackend {
    name: &'static str,
    models: Vec<ModelInfo>,
    script: Vec<MockOutcome>,
    index: AtomicUsize,
    calls: AtomicUsize,
    recorded: Mutex<Vec<(String, String)>>,
    healthy: bool,
}

impl MockBackend {
    /// Create a mock with the given script.
    pub fn new(script: Vec<MockOutcome>) -> Self {
        assert!(!script.is_empty(), "MockBackend requires at least one outcome");
        Self {
            name: "mock",
            models: Vec::new(),
            script,
            index: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
            healthy: true,
        }
    }

    /// A mock that always returns the same content.
    pub fn fixed(content: impl Into<String>) -> Self {
        Self::new(vec![MockOutcome::Reply(content.into())])
    }

    /// A mock that always fails with the given HTTP status.
    pub fn failing(status: u16, body: impl Into<String>) -> Self {
        Self::new(vec![MockOutcome::HttpError(status, body.into())])
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set the catalog returned by `list_models`.
    pub fn with_models(mut self, ids: &[&str]) -> Self {
        self.models = ids
            .iter()
            .map(|id| ModelInfo {
                id: id.to_string(),
                display_name: id.to_string(),
                provider_key: self.name.to_string(),
            })
            .collect();
        self
    }

    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Number of `query` calls made against this mock.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// All `(model, prompt)` pairs seen so far, in call order.
    pub fn recorded_calls(&self) -> Vec<(String, String)> {
        self.recorded.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> MockOutcome {
        let idx = self.index.fetch_add(1, Ordering::SeqCst) % self.script.len();
        self.script[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn health_check(&self) -> bool {
        self.healthy
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.models.clone())
    }

    async fn query(
        &self,
        model: &str,
        prompt: &str,
        _options: &QueryOptions,
    ) -> Result<QueryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));

        match self.next_outcome() {
            MockOutcome::Reply(content) => Ok(QueryResponse {
                model: model.to_string(),
                content,
                reasoning_content: None,
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 20,
                    total_tokens: 30,
                }),
                latency_ms: 5,
                finish_reason: Some("stop".into()),
                warning: None,
                fallback_from: None,
            }),
            MockOutcome::ReplyWith {
                content,
                reasoning,
                usage,
                latency_ms,
            } => Ok(QueryResponse {
                model: model.to_string(),
                content,
                reasoning_content: reasoning,
                usage,
                latency_ms,
                finish_reason: Some("stop".into()),
                warning: None,
                fallback_from: None,
            }),
            MockOutcome::HttpError(status, body) => Err(HydraError::Backend {
                status,
                body,
                retry_after: None,
            }),
            MockOutcome::Timeout => Err(HydraError::Timeout { ms: 120_000 }),
            MockOutcome::UnknownModel => Err(HydraError::Routing(format!(
                "model '{model}' not found on {}",
                self.name
            ))),
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_reply() {
        let mock = MockBackend::fixed("Hello!");
        let resp = mock
            .query("m1", "hi", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn script_cycles() {
        let mock = MockBackend::new(vec![
            MockOutcome::Reply("first".into()),
            MockOutcome::HttpError(500, "boom".into()),
        ]);
        let opts = QueryOptions::default();

        assert_eq!(mock.query("m", "p", &opts).await.unwrap().content, "first");
        assert!(mock.query("m", "p", &opts).await.is_err());
        // Exhausted, cycles back
        assert_eq!(mock.query("m", "p", &opts).await.unwrap().content, "first");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn records_prompts() {
        let mock = MockBackend::fixed("ok");
        let opts = QueryOptions::default();
        mock.query("m1", "first prompt", &opts).await.unwrap();
        mock.query("m2", "second prompt", &opts).await.unwrap();

        let calls = mock.recorded_calls();
        assert_eq!(calls[0], ("m1".into(), "first prompt".into()));
        assert_eq!(calls[1], ("m2".into(), "second prompt".into()));
    }

    #[tokio::test]
    async fn catalog_and_health() {
        let mock = MockBackend::fixed("ok")
            .with_name("fake")
            .with_models(&["a", "b"])
            .with_healthy(false);
        assert_eq!(mock.list_models().await.unwrap().len(), 2);
        assert!(!mock.health_check().await);
        assert_eq!(mock.name(), "fake");
    }
}

//! Model routing across registered backends.
//!
//! [`MultiBackend`] exposes the [`Backend`] contract over a registry of
//! `{provider_key → Backend}`. A model ID of the form `"<key>/<id>"`
//! dispatches exclusively to the named backend; a bare ID tries each
//! backend in registration order and the first success wins. Registration
//! order is set deterministically by the entry point (native API backends
//! first, then subscription, then local), which makes bare-ID routing a
//! pure function of the registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::backend::{Backend, ModelInfo, QueryOptions, QueryResponse};
use crate::error::{HydraError, Result};

/// Hard cap on fallback-chain recursion, preventing cascades when chains
/// reference each other.
pub const FALLBACK_MAX_DEPTH: u32 = 2;

/// Routes queries to registered backends and merges their catalogs.
pub struct MultiBackend {
    backends: Vec<(String, Arc<dyn Backend>)>,
    fallbacks: HashMap<String, Vec<String>>,
}

impl MultiBackend {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            fallbacks: HashMap::new(),
        }
    }

    /// Register a backend under a provider key. Order of registration is
    /// the tie-break order for bare model IDs.
    pub fn register(&mut self, key: impl Into<String>, backend: Arc<dyn Backend>) {
        let key = key.into();
        debug_assert!(
            self.backends.iter().all(|(k, _)| *k != key),
            "provider key '{key}' registered twice"
        );
        self.backends.push((key, backend));
    }

    /// Configure fallback chains: `{primary model → [alternatives…]}`.
    pub fn with_fallbacks(mut self, fallbacks: HashMap<String, Vec<String>>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn provider_keys(&self) -> Vec<&str> {
        self.backends.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Split `"<key>/<id>"` at the first separator. A leading `/` does not
    /// count — such an ID is treated as bare.
    fn split_model_id(model: &str) -> Option<(&str, &str)> {
        match model.find('/') {
            Some(pos) if pos > 0 => Some((&model[..pos], &model[pos + 1..])),
            _ => None,
        }
    }

    /// One routing pass, no fallback chains.
    async fn route(&self, model: &str, prompt: &str, options: &QueryOptions)
        -> Result<QueryResponse> {
        if let Some((key, inner_id)) = Self::split_model_id(model) {
            let backend = self
                .backends
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, b)| b)
                .ok_or_else(|| {
                    HydraError::Routing(format!(
                        "unknown provider '{key}' (registered: {})",
                        self.provider_keys().join(", ")
                    ))
                })?;
            let mut resp = backend.query(inner_id, prompt, options).await?;
            resp.model = model.to_string();
            return Ok(resp);
        }

        // Bare ID: first backend that accepts it wins
        let mut attempts = Vec::new();
        for (key, backend) in &self.backends {
            match backend.query(model, prompt, options).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    tracing::debug!(model, provider = %key, error = %e, "backend declined bare model ID");
                    attempts.push(format!("{key}: {e}"));
                }
            }
        }
        Err(HydraError::Routing(format!(
            "no backend accepted model '{model}' ({})",
            if attempts.is_empty() {
                "no backends registered".to_string()
            } else {
                attempts.join("; ")
            }
        )))
    }

    fn query_with_fallback<'a>(
        &'a self,
        model: &'a str,
        prompt: &'a str,
        options: &'a QueryOptions,
        depth: u32,
    ) -> futures::future::BoxFuture<'a, Result<QueryResponse>> {
        Box::pin(async move {
            let primary_err = match self.route(model, prompt, options).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };

            if depth < FALLBACK_MAX_DEPTH {
                if let Some(alternatives) = self.fallbacks.get(model) {
                    for alt in alternatives {
                        tracing::warn!(
                            primary = model,
                            fallback = %alt,
                            error = %primary_err,
                            "primary model failed, trying fallback"
                        );
                        if let Ok(mut resp) =
                            self.query_with_fallback(alt, prompt, options, depth + 1).await
                        {
                            resp.fallback_from = Some(model.to_string());
                            return Ok(resp);
                        }
                    }
                }
            }

            Err(primary_err)
        })
    }
}

impl Default for MultiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MultiBackend {
    /// Healthy iff any registered backend is healthy. Probes run
    /// concurrently.
    async fn health_check(&self) -> bool {
        let probes = self.backends.iter().map(|(_, b)| b.health_check());
        join_all(probes).await.into_iter().any(|healthy| healthy)
    }

    /// Merge all catalogs concurrently. A failing backend contributes
    /// nothing rather than failing the merge; IDs come back prefixed with
    /// their provider key.
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let listings = self.backends.iter().map(|(key, backend)| async move {
            (key.clone(), backend.list_models().await)
        });

        let mut merged = Vec::new();
        for (key, listing) in join_all(listings).await {
            match listing {
                Ok(models) => {
                    for model in models {
                        merged.push(ModelInfo {
                            id: format!("{key}/{}", model.id),
                            display_name: model.display_name,
                            provider_key: key.clone(),
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(provider = %key, error = %e, "catalog listing failed, omitting provider");
                }
            }
        }
        Ok(merged)
    }

    async fn query(
        &self,
        model: &str,
        prompt: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse> {
        self.query_with_fallback(model, prompt, options, 0).await
    }

    fn name(&self) -> &'static str {
        "multi"
    }
}

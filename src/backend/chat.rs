//! Backend for chat-completions APIs (OpenAI family).
//!
//! Endpoint: `/v1/chat/completions`; bearer-token auth; catalog from
//! `/v1/models`. The body builders and parser are shared with the
//! subscription backend, which speaks the same wire format with OAuth
//! bearer tokens.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{
    ensure_content, send_json, with_backoff, Backend, BackoffConfig, ModelInfo, QueryOptions,
    QueryResponse, TokenUsage,
};
use crate::error::{HydraError, Result};
use crate::reasoning;

/// Backend for any chat-completions API.
pub struct ChatCompletionsBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for ChatCompletionsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsBackend")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| {
                    if k.len() > 6 {
                        format!("{}***", &k[..6])
                    } else {
                        "***".to_string()
                    }
                }),
            )
            .finish()
    }
}

impl ChatCompletionsBackend {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            timeout,
            backoff: BackoffConfig::standard(),
        }
    }

    /// Set the API key, sent as `Authorization: Bearer {key}`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }
}

/// Build the request body for `/v1/chat/completions`.
///
/// Reasoning models get the boosted token budget on both `max_tokens` and
/// `max_completion_tokens` — newer API revisions reject the former for the
/// o-series while older proxies only honor it.
pub(crate) fn build_body(model: &str, prompt: &str, options: &QueryOptions) -> Value {
    let mut messages = Vec::new();
    if let Some(sys) = options.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        messages.push(json!({"role": "system", "content": sys}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let max_tokens = reasoning::effective_max_tokens(model, options);
    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": false,
    });
    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }
    if reasoning::is_reasoning_model(model) {
        body["max_completion_tokens"] = json!(max_tokens);
    }
    body
}

/// Parse a chat-completions response into a [`QueryResponse`].
pub(crate) fn parse_response(model: &str, resp: &Value, latency_ms: u64) -> Result<QueryResponse> {
    let choice = resp
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| HydraError::Other(format!("no choices in response from '{model}'")))?;
    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let reasoning_content = message
        .get("reasoning_content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(String::from);
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let usage = resp.get("usage").map(|u| TokenUsage {
        prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        completion_tokens: u
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
    });

    ensure_content(model, &content, reasoning_content.as_deref())?;

    Ok(QueryResponse {
        model: model.to_string(),
        content,
        reasoning_content,
        usage,
        latency_ms,
        finish_reason,
        warning: None,
        fallback_from: None,
    })
}

#[async_trait]
impl Backend for ChatCompletionsBackend {
    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url.trim_end_matches('/'));
        let req = self.auth(self.client.get(&url));
        send_json(req, Duration::from_secs(10)).await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/v1/models", self.base_url.trim_end_matches('/'));
        let req = self.auth(self.client.get(&url));
        let resp = send_json(req, self.timeout).await?;

        let models = resp
            .get("data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .map(|id| ModelInfo {
                        id: id.to_string(),
                        display_name: id.to_string(),
                        provider_key: self.name().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn query(
        &self,
        model: &str,
        prompt: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = build_body(model, prompt, options);
        let deadline = reasoning::deadline_for(model, self.timeout);

        let started = tokio::time::Instant::now();
        let resp = with_backoff(&self.backoff, || {
            let req = self.auth(self.client.post(&url).json(&body));
            send_json(req, deadline)
        })
        .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        parse_response(model, &resp, latency_ms)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

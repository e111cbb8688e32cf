//! Backend for the Anthropic messages API.
//!
//! The wire format differs from chat-completions: the system prompt is a
//! top-level field, `max_tokens` is mandatory, the response content is an
//! array of typed blocks, and usage reports `input_tokens`/`output_tokens`.

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

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Backend for the Anthropic messages API.
pub struct MessagesBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for MessagesBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagesBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl MessagesBackend {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            timeout,
            backoff: BackoffConfig::standard(),
        }
    }

    /// Set the API key, sent as `x-api-key`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("anthropic-version", ANTHROPIC_VERSION);
        match &self.api_key {
            Some(key) => req.header("x-api-key", key.as_str()),
            None => req,
        }
    }
}

/// Build the request body for `/v1/messages`. `max_tokens` is mandatory on
/// this wire format.
pub(crate) fn build_body(model: &str, prompt: &str, options: &QueryOptions) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": reasoning::effective_max_tokens(model, options),
        "messages": [{"role": "user", "content": prompt}],
    });
    if let Some(sys) = options.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        body["system"] = json!(sys);
    }
    if let Some(temp) = options.temperature {
        // The messages API caps temperature at 1
        body["temperature"] = json!(temp.min(1.0));
    }
    body
}

/// Parse a messages-API response: concatenate `text` blocks, keep
/// `thinking` blocks as reasoning content.
pub(crate) fn parse_response(model: &str, resp: &Value, latency_ms: u64) -> Result<QueryResponse> {
    let blocks = resp
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| HydraError::Other(format!("no content blocks in response from '{model}'")))?;

    let mut content = String::new();
    let mut thinking = String::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    content.push_str(text);
                }
            }
            Some("thinking") => {
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    thinking.push_str(text);
                }
            }
            _ => {}
        }
    }
    let reasoning_content = (!thinking.trim().is_empty()).then_some(thinking);

    let usage = resp.get("usage").map(|u| {
        let prompt_tokens = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let completion_tokens = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    });

    let finish_reason = resp
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(String::from);

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
impl Backend for MessagesBackend {
    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url.trim_end_matches('/'));
        let req = self.headers(self.client.get(&url));
        send_json(req, Duration::from_secs(10)).await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/v1/models", self.base_url.trim_end_matches('/'));
        let req = self.headers(self.client.get(&url));
        let resp = send_json(req, self.timeout).await?;

        let models = resp
            .get("data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|m| {
                        let id = m.get("id").and_then(Value::as_str)?;
                        let display_name = m
                            .get("display_name")
                            .and_then(Value::as_str)
                            .unwrap_or(id);
                        Some(ModelInfo {
                            id: id.to_string(),
                            display_name: display_name.to_string(),
                            provider_key: self.name().to_string(),
                        })
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
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = build_body(model, prompt, options);
        let deadline = reasoning::deadline_for(model, self.timeout);

        let started = tokio::time::Instant::now();
        let resp = with_backoff(&self.backoff, || {
            let req = self.headers(self.client.post(&url).json(&body));
            send_json(req, deadline)
        })
        .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        parse_response(model, &resp, latency_ms)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> QueryOptions {
        QueryOptions::default()
            .with_temperature(0.7)
            .with_max_tokens(512)
    }

    #[test]
    fn body_shape() {
        let body = build_body("claude-sonnet-4-5", "Why is the sky blue?", &opts());
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["temperature"], 0.7);
        assert!(body.get("system").is_none());

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn system_prompt_is_top_level() {
        let options = opts().with_system_prompt("You are terse.");
        let body = build_body("claude-sonnet-4-5", "hi there friend", &options);
        assert_eq!(body["system"], "You are terse.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn max_tokens_always_present() {
        let body = build_body("claude-sonnet-4-5", "hello", &QueryOptions::default());
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn temperature_capped_at_one() {
        let options = opts().with_temperature(1.8);
        let body = build_body("claude-sonnet-4-5", "hello", &options);
        assert_eq!(body["temperature"], 1.0);
    }

    #[test]
    fn parses_content_blocks() {
        let resp = json!({
            "content": [
                {"type": "text", "text": "Blue light "},
                {"type": "text", "text": "scatters more."}
            ],
            "usage": {"input_tokens": 11, "output_tokens": 6},
            "stop_reason": "end_turn"
        });
        let parsed = parse_response("claude-sonnet-4-5", &resp, 200).unwrap();
        assert_eq!(parsed.content, "Blue light scatters more.");
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 11);
        assert_eq!(usage.completion_tokens, 6);
        assert_eq!(usage.total_tokens, 17);
        assert_eq!(parsed.finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn thinking_blocks_become_reasoning() {
        let resp = json!({
            "content": [
                {"type": "thinking", "thinking": "consider scattering"},
                {"type": "text", "text": "Rayleigh scattering is the answer."}
            ]
        });
        let parsed = parse_response("claude-sonnet-4-5", &resp, 10).unwrap();
        assert_eq!(parsed.content, "Rayleigh scattering is the answer.");
        assert_eq!(
            parsed.reasoning_content.as_deref(),
            Some("consider scattering")
        );
    }

    #[test]
    fn missing_content_is_an_error() {
        let resp = json!({"id": "msg_x"});
        assert!(parse_response("claude-sonnet-4-5", &resp, 10).is_err());
    }
}

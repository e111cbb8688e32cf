//! Backend for a local Ollama server.
//!
//! Endpoints: `/api/chat` for queries, `/api/tags` for the catalog.
//! Ollama reports token counts as eval counts (`prompt_eval_count`,
//! `eval_count`) rather than a `usage` object, and reasoning models served
//! locally inline their chain-of-thought in `<think>` tags.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{
    ensure_content, send_json, Backend, ModelInfo, QueryOptions, QueryResponse, TokenUsage,
};
use crate::error::{HydraError, Result};
use crate::extract::split_think_tags;
use crate::reasoning;

/// Backend for Ollama's native API. No retry — the server is local, a
/// failure is not transient.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn build_body(model: &str, prompt: &str, options: &QueryOptions) -> Value {
        let mut messages = Vec::new();
        if let Some(sys) = options.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": sys}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut opts = json!({
            "num_predict": reasoning::effective_max_tokens(model, options),
        });
        if let Some(temp) = options.temperature {
            opts["temperature"] = json!(temp);
        }

        json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": opts,
        })
    }

    fn parse_response(model: &str, resp: &Value, latency_ms: u64) -> Result<QueryResponse> {
        let raw = resp
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        // Local reasoning models inline their chain-of-thought
        let (reasoning_content, content) = split_think_tags(&raw);

        let prompt_tokens = resp
            .get("prompt_eval_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let completion_tokens = resp.get("eval_count").and_then(Value::as_u64).unwrap_or(0);
        let usage = (prompt_tokens + completion_tokens > 0).then_some(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        });

        let finish_reason = resp
            .get("done_reason")
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
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        send_json(self.client.get(&url), Duration::from_secs(5))
            .await
            .is_ok()
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        let resp = send_json(self.client.get(&url), self.timeout).await?;

        let models = resp
            .get("models")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(|name| ModelInfo {
                        id: name.to_string(),
                        display_name: name.to_string(),
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
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = Self::build_body(model, prompt, options);
        let deadline = reasoning::deadline_for(model, self.timeout);

        let started = tokio::time::Instant::now();
        let resp = send_json(self.client.post(&url).json(&body), deadline)
            .await
            .map_err(|e| match e {
                HydraError::Transport(inner) => HydraError::Other(format!(
                    "failed to reach Ollama at {url}: {inner} (is `ollama serve` running?)"
                )),
                other => other,
            })?;
        let latency_ms = started.elapsed().as_millis() as u64;

        Self::parse_response(model, &resp, latency_ms)
    }

    fn name(&self) -> &'static str {
        "ollama"
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
        let body = OllamaBackend::build_body("llama3.2", "Why is the sky blue?", &opts());
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 512);
        assert_eq!(body["options"]["temperature"], 0.7);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn body_with_system_prompt() {
        let options = opts().with_system_prompt("Be helpful.");
        let body = OllamaBackend::build_body("llama3.2", "hello world", &options);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Be helpful.");
    }

    #[test]
    fn reasoning_model_boosts_num_predict() {
        let body = OllamaBackend::build_body("deepseek-r1:32b", "prove it", &opts());
        assert_eq!(body["options"]["num_predict"], 4096);
    }

    #[test]
    fn parses_eval_counts_as_usage() {
        let resp = json!({
            "message": {"content": "Rayleigh scattering, mostly."},
            "prompt_eval_count": 15,
            "eval_count": 9,
            "done_reason": "stop"
        });
        let parsed = OllamaBackend::parse_response("llama3.2", &resp, 88).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 15);
        assert_eq!(usage.completion_tokens, 9);
        assert_eq!(usage.total_tokens, 24);
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.latency_ms, 88);
    }

    #[test]
    fn carves_think_tags_into_reasoning() {
        let resp = json!({
            "message": {"content": "<think>4 comes after 3</think>The answer is 4."},
            "eval_count": 20
        });
        let parsed = OllamaBackend::parse_response("deepseek-r1", &resp, 10).unwrap();
        assert_eq!(parsed.content, "The answer is 4.");
        assert_eq!(parsed.reasoning_content.as_deref(), Some("4 comes after 3"));
    }

    #[test]
    fn missing_counts_mean_no_usage() {
        let resp = json!({"message": {"content": "a fine long answer here"}});
        let parsed = OllamaBackend::parse_response("llama3.2", &resp, 10).unwrap();
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn empty_content_is_an_error() {
        let resp = json!({"message": {"content": ""}});
        let err = OllamaBackend::parse_response("llama3.2", &resp, 10).unwrap_err();
        assert!(matches!(err, HydraError::EmptyResponse { .. }));
    }
}

//! Backend for the Gemini generate-content API.
//!
//! The model ID rides in the URL path, the key in a query parameter. The
//! system prompt is a structured `systemInstruction` field and content is
//! split into `parts`. `list_models` pages through the catalog and keeps
//! only generative Gemini variants.

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

/// Backend for the Gemini API.
pub struct GenerateContentBackend {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for GenerateContentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateContentBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .finish()
    }
}

impl GenerateContentBackend {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
            backoff: BackoffConfig::standard(),
        }
    }
}

/// Build the request body for `models/{model}:generateContent`.
pub(crate) fn build_body(model: &str, prompt: &str, options: &QueryOptions) -> Value {
    let mut body = json!({
        "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        "generationConfig": {
            "maxOutputTokens": reasoning::effective_max_tokens(model, options),
        },
    });
    if let Some(temp) = options.temperature {
        body["generationConfig"]["temperature"] = json!(temp);
    }
    if let Some(sys) = options.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        body["systemInstruction"] = json!({"parts": [{"text": sys}]});
    }
    body
}

/// Parse a generate-content response: join candidate parts, map
/// `usageMetadata` counts.
pub(crate) fn parse_response(model: &str, resp: &Value, latency_ms: u64) -> Result<QueryResponse> {
    let candidate = resp
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or_else(|| HydraError::Other(format!("no candidates in response from '{model}'")))?;

    let content = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(String::from);

    let usage = resp.get("usageMetadata").map(|u| {
        let prompt_tokens = u
            .get("promptTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let completion_tokens = u
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let total_tokens = u
            .get("totalTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(prompt_tokens + completion_tokens);
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    });

    ensure_content(model, &content, None)?;

    Ok(QueryResponse {
        model: model.to_string(),
        content,
        reasoning_content: None,
        usage,
        latency_ms,
        finish_reason,
        warning: None,
        fallback_from: None,
    })
}

/// Keep generative Gemini variants only: embedding and AQA models share the
/// catalog but cannot serve `generateContent`.
fn is_generative_gemini(entry: &Value) -> bool {
    let name = entry.get("name").and_then(Value::as_str).unwrap_or("");
    if !name.contains("gemini") {
        return false;
    }
    entry
        .get("supportedGenerationMethods")
        .and_then(Value::as_array)
        .is_some_and(|methods| {
            methods
                .iter()
                .any(|m| m.as_str() == Some("generateContent"))
        })
}

#[async_trait]
impl Backend for GenerateContentBackend {
    async fn health_check(&self) -> bool {
        let url = format!(
            "{}/v1beta/models?key={}&pageSize=1",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        send_json(self.client.get(&url), Duration::from_secs(10))
            .await
            .is_ok()
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let base = format!(
            "{}/v1beta/models?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );

        let mut models = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{base}&pageToken={token}"),
                None => base.clone(),
            };
            let resp = send_json(self.client.get(&url), self.timeout).await?;

            if let Some(list) = resp.get("models").and_then(Value::as_array) {
                for entry in list.iter().filter(|e| is_generative_gemini(e)) {
                    let name = entry.get("name").and_then(Value::as_str).unwrap_or("");
                    let id = name.strip_prefix("models/").unwrap_or(name);
                    let display_name = entry
                        .get("displayName")
                        .and_then(Value::as_str)
                        .unwrap_or(id);
                    models.push(ModelInfo {
                        id: id.to_string(),
                        display_name: display_name.to_string(),
                        provider_key: self.name().to_string(),
                    });
                }
            }

            page_token = resp
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }
        Ok(models)
    }

    async fn query(
        &self,
        model: &str,
        prompt: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            self.api_key
        );
        let body = build_body(model, prompt, options);
        let deadline = reasoning::deadline_for(model, self.timeout);

        let started = tokio::time::Instant::now();
        let resp = with_backoff(&self.backoff, || {
            send_json(self.client.post(&url).json(&body), deadline)
        })
        .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        parse_response(model, &resp, latency_ms)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> QueryOptions {
        QueryOptions::default()
            .with_temperature(0.4)
            .with_max_tokens(256)
    }

    #[test]
    fn body_shape() {
        let body = build_body("gemini-2.0-flash", "Why is the sky blue?", &opts());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(body["generationConfig"]["temperature"], 0.4);
        assert_eq!(
            body["contents"][0]["parts"][0]["text"],
            "Why is the sky blue?"
        );
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn system_instruction_is_structured() {
        let options = opts().with_system_prompt("Answer briefly.");
        let body = build_body("gemini-2.0-flash", "hello there", &options);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "Answer briefly."
        );
    }

    #[test]
    fn thinking_variant_gets_boost() {
        let body = build_body("gemini-2.0-flash-thinking-exp", "prove it", &opts());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn parses_candidates_and_usage() {
        let resp = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Blue light "}, {"text": "scatters."}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 7,
                "candidatesTokenCount": 5,
                "totalTokenCount": 12
            }
        });
        let parsed = parse_response("gemini-2.0-flash", &resp, 150).unwrap();
        assert_eq!(parsed.content, "Blue light scatters.");
        assert_eq!(parsed.usage.unwrap().total_tokens, 12);
        assert_eq!(parsed.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn filters_non_generative_models() {
        let embedding = json!({
            "name": "models/gemini-embedding-001",
            "supportedGenerationMethods": ["embedContent"]
        });
        let flash = json!({
            "name": "models/gemini-2.0-flash",
            "supportedGenerationMethods": ["generateContent", "countTokens"]
        });
        let other = json!({
            "name": "models/aqa",
            "supportedGenerationMethods": ["generateAnswer"]
        });
        assert!(!is_generative_gemini(&embedding));
        assert!(is_generative_gemini(&flash));
        assert!(!is_generative_gemini(&other));
    }

    #[test]
    fn missing_candidates_is_an_error() {
        let resp = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert!(parse_response("gemini-2.0-flash", &resp, 10).is_err());
    }
}

//! Backend contract and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over LLM providers. Each implementation
//! translates the normalized query into one provider wire format and back.
//! Cross-cutting policy (caching, circuit breaking, global metrics) lives
//! above the backends, in [`SmartBackend`](crate::smart::SmartBackend) and
//! [`MultiBackend`](crate::routing::MultiBackend) — a backend only performs
//! the call, measures its latency, and may retry idempotent transport errors.
//!
//! ## Architecture
//!
//! ```text
//! tool handler ──► SmartBackend::query ──► MultiBackend ──► Backend::query
//!                                                  │
//!                    ┌──────────────┬──────────────┼──────────────┐
//!              ChatCompletions  MessagesBackend  GenerateContent  Subscription
//!              /v1/chat/...     /v1/messages     :generateContent  (OAuth files)
//! ```

pub mod anthropic;
pub mod backoff;
pub mod chat;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod subscription;

pub use anthropic::MessagesBackend;
pub use backoff::BackoffConfig;
pub use chat::ChatCompletionsBackend;
pub use gemini::GenerateContentBackend;
pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use subscription::SubscriptionBackend;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HydraError, Result};

/// Token cap applied when the caller does not specify one.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// One entry in a backend's model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Globally unique model identifier. Once a backend is registered the
    /// router prefixes this with `"<provider_key>/"`.
    pub id: String,
    /// Human-readable name for catalog rendering.
    pub display_name: String,
    /// Key of the provider that serves this model.
    pub provider_key: String,
}

/// Per-query knobs, provider-agnostic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Sampling temperature in `[0, 2]`. Provider default when unset.
    pub temperature: Option<f64>,
    /// Completion token cap. [`DEFAULT_MAX_TOKENS`] when unset.
    pub max_tokens: Option<u32>,
}

impl QueryOptions {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// The effective token cap, falling back to [`DEFAULT_MAX_TOKENS`].
    pub fn max_tokens_or_default(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    /// Canonical textual encoding used in cache keys.
    ///
    /// Fields are joined with the ASCII unit separator, which cannot appear
    /// in a system prompt that survived JSON-RPC string decoding of tool
    /// input (it is also stripped by the transport's schema validation).
    pub fn canonical(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}",
            self.system_prompt.as_deref().unwrap_or(""),
            self.temperature.map(|t| format!("{t:.4}")).unwrap_or_default(),
            self.max_tokens.map(|m| m.to_string()).unwrap_or_default(),
        )
    }
}

/// Token accounting reported by a backend, normalized across wire formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A normalized, completed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// The model ID the caller asked for.
    pub model: String,
    /// The generated text.
    pub content: String,
    /// Chain-of-thought text, when the provider reports it separately.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Token accounting, when the provider reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Wall time from send to received body. `0` iff served from cache.
    pub latency_ms: u64,
    /// Provider finish reason (`stop`, `length`, ...), when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Non-fatal condition the tool layer should surface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Set when a fallback chain substituted this model for a failed primary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<String>,
}

impl QueryResponse {
    /// Completion tokens if reported, else a chars/4 estimate of the content.
    pub fn completion_tokens_or_estimate(&self) -> u64 {
        self.usage
            .map(|u| u.completion_tokens)
            .filter(|&t| t > 0)
            .unwrap_or_else(|| estimate_tokens(&self.content))
    }
}

/// Rough token count for text with no reported usage: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Abstraction over LLM providers.
///
/// Implementations must not apply cross-cutting policy (no caching, no
/// circuit breaking, no global metrics) — the orchestrator above owns those.
/// A backend may internally retry idempotent transport errors via
/// [`with_backoff`].
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Probe connectivity. Fails closed: any connectivity or authentication
    /// error yields `false`, never an error.
    async fn health_check(&self) -> bool;

    /// The catalog this backend currently serves. May be empty.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Execute one query. `latency_ms` on the response is wall time from
    /// send to received body.
    async fn query(&self, model: &str, prompt: &str, options: &QueryOptions)
        -> Result<QueryResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Parse a `Retry-After` header value as integer seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// POST a JSON body and return the parsed JSON response, enforcing the
/// per-request deadline and the shared error mapping:
/// timeout → [`HydraError::Timeout`], 401/403 → [`HydraError::Auth`],
/// other non-2xx → [`HydraError::Backend`] with any `Retry-After` hint.
pub(crate) async fn send_json(request: reqwest::RequestBuilder, deadline: Duration) -> Result<Value> {
    let fut = async {
        let resp = request.send().await.map_err(HydraError::Transport)?;
        let status = resp.status().as_u16();

        if status == 401 || status == 403 {
            let body = resp.text().await.unwrap_or_default();
            return Err(HydraError::Auth(format!("HTTP {status}: {body}")));
        }
        if !(200..300).contains(&status) {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(HydraError::Backend {
                status,
                body,
                retry_after,
            });
        }

        resp.json::<Value>().await.map_err(HydraError::Transport)
    };

    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(HydraError::Timeout {
            ms: deadline.as_millis() as u64,
        }),
    }
}

/// Reject near-empty completions: fewer than 10 non-whitespace characters
/// with no reasoning content is treated as a failed call.
pub(crate) fn ensure_content(
    model: &str,
    content: &str,
    reasoning_content: Option<&str>,
) -> Result<()> {
    let meaningful = content.chars().filter(|c| !c.is_whitespace()).count();
    let has_reasoning = reasoning_content.is_some_and(|r| !r.trim().is_empty());
    if meaningful < 10 && !has_reasoning {
        return Err(HydraError::EmptyResponse {
            model: model.to_string(),
        });
    }
    Ok(())
}

/// Execute an idempotent operation with transport-level retry and
/// exponential backoff.
///
/// Retries on transport errors, timeouts, 429 and 5xx (see
/// [`HydraError::is_retryable`]); honors `Retry-After` when the config says
/// to. Returns the first success, or the last error once retries are
/// exhausted.
pub async fn with_backoff<T, F, Fut>(config: &BackoffConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<HydraError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = match &last_error {
                Some(HydraError::Backend {
                    retry_after: Some(ra),
                    ..
                }) if config.respect_retry_after => *ra,
                _ => config.delay_for_attempt(attempt - 1),
            };
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "retrying after transient backend error"
            );
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < config.max_retries && e.is_retryable() {
                    last_error = Some(e);
                    continue;
                }
                return Err(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| HydraError::Other("backoff loop exited unexpectedly".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn canonical_options_are_stable() {
        let opts = QueryOptions::default()
            .with_system_prompt("be terse")
            .with_temperature(0.5)
            .with_max_tokens(256);
        assert_eq!(opts.canonical(), "be terse\u{1f}0.5000\u{1f}256");

        let empty = QueryOptions::default();
        assert_eq!(empty.canonical(), "\u{1f}\u{1f}");
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn empty_response_detection() {
        assert!(ensure_content("m", "hi", None).is_err());
        assert!(ensure_content("m", "   \n\t  ", None).is_err());
        assert!(ensure_content("m", "a perfectly fine answer", None).is_ok());
        // Reasoning content rescues an empty visible answer
        assert!(ensure_content("m", "", Some("because...")).is_ok());
        assert!(ensure_content("m", "", Some("   ")).is_err());
    }

    #[test]
    fn completion_tokens_prefers_reported_usage() {
        let mut resp = QueryResponse {
            model: "m".into(),
            content: "x".repeat(400),
            reasoning_content: None,
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 37,
                total_tokens: 47,
            }),
            latency_ms: 5,
            finish_reason: None,
            warning: None,
            fallback_from: None,
        };
        assert_eq!(resp.completion_tokens_or_estimate(), 37);

        resp.usage = None;
        assert_eq!(resp.completion_tokens_or_estimate(), 100);
    }

    #[tokio::test]
    async fn backoff_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            ..BackoffConfig::standard()
        };

        let result = with_backoff(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HydraError::Backend {
                        status: 503,
                        body: "unavailable".into(),
                        retry_after: None,
                    })
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_gives_up_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig::standard();

        let result: Result<u32> = with_backoff(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HydraError::Auth("bad key".into())) }
        })
        .await;

        assert!(matches!(result, Err(HydraError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_exhausts_retries() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            ..BackoffConfig::standard()
        };

        let result: Result<u32> = with_backoff(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(HydraError::Backend {
                    status: 500,
                    body: "boom".into(),
                    retry_after: None,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(HydraError::Backend { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

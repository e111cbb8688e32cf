use std::time::Duration;
use thiserror::Error;

/// Errors produced by the orchestrator and its backends.
///
/// The tool layer converts these into readable markdown (with a recovery
/// hint); nothing below the tool layer formats user-facing text.
#[derive(Error, Debug)]
pub enum HydraError {
    /// Tool input failed validation (shape, range, or missing field).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Unknown provider prefix, or no registered backend accepted a bare
    /// model ID.
    #[error("Routing failed: {0}")]
    Routing(String),

    /// The circuit for this model is open. `retry_in_ms` is the cooldown
    /// remaining at the time of the check.
    #[error("Model '{model}' is temporarily unavailable (circuit open, retry in {retry_in_ms}ms)")]
    Unavailable { model: String, retry_in_ms: u64 },

    /// The per-request deadline elapsed before the backend responded.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Low-level HTTP transport failure (connection refused, reset, DNS).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx HTTP response from a backend. The `retry_after` field is
    /// populated from the `Retry-After` response header when present.
    #[error("Backend returned HTTP {status}: {body}")]
    Backend {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The backend answered 2xx but produced fewer than 10 non-whitespace
    /// characters and no reasoning content.
    #[error("Model '{model}' returned an empty response")]
    EmptyResponse { model: String },

    /// 401/403 from a backend, or a failed OAuth token refresh.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for HydraError {
    fn from(err: anyhow::Error) -> Self {
        HydraError::Other(err.to_string())
    }
}

impl HydraError {
    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Transport errors, timeouts, 429 and 5xx are retryable; validation,
    /// routing, auth and other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            HydraError::Transport(_) | HydraError::Timeout { .. } => true,
            HydraError::Backend { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HydraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        let rate_limited = HydraError::Backend {
            status: 429,
            body: "rate limited".into(),
            retry_after: None,
        };
        assert!(rate_limited.is_retryable());

        let server_error = HydraError::Backend {
            status: 503,
            body: "unavailable".into(),
            retry_after: None,
        };
        assert!(server_error.is_retryable());

        let bad_request = HydraError::Backend {
            status: 400,
            body: "bad request".into(),
            retry_after: None,
        };
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        assert!(HydraError::Timeout { ms: 120_000 }.is_retryable());
    }

    #[test]
    fn auth_and_routing_are_not_retryable() {
        assert!(!HydraError::Auth("bad key".into()).is_retryable());
        assert!(!HydraError::Routing("no backend".into()).is_retryable());
        assert!(!HydraError::Validation("bad range".into()).is_retryable());
    }

    #[test]
    fn unavailable_message_includes_cooldown() {
        let err = HydraError::Unavailable {
            model: "gpt-4o".into(),
            retry_in_ms: 42_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("gpt-4o"));
        assert!(msg.contains("42000ms"));
    }
}

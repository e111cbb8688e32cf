//! Tool handlers: the high-level semantics behind each MCP tool.
//!
//! Every handler validates its input, drives one or more
//! [`SmartBackend`](crate::smart::SmartBackend) queries, and renders a
//! single markdown string. Handlers never surface protocol-level faults
//! for domain failures — the server wraps any returned error in a
//! tool-level error envelope via [`render_error`].

pub mod analyze;
pub mod ask;
pub mod compare;
pub mod consensus;
pub mod list;
pub mod recap;
pub mod synthesize;

use futures::future::join_all;

use crate::backend::{Backend, QueryOptions, QueryResponse};
use crate::error::{HydraError, Result};
use crate::smart::SmartBackend;

/// Output verbosity shared by the single-model tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Brief,
    #[default]
    Detailed,
}

impl OutputFormat {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None => Ok(Self::default()),
            Some("brief") => Ok(Self::Brief),
            Some("detailed") => Ok(Self::Detailed),
            Some(other) => Err(HydraError::Validation(format!(
                "format must be 'brief' or 'detailed', got '{other}'"
            ))),
        }
    }
}

/// Validate the shared optional query knobs and assemble [`QueryOptions`].
pub(crate) fn build_options(
    system_prompt: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
) -> Result<QueryOptions> {
    if let Some(temp) = temperature {
        if !(0.0..=2.0).contains(&temp) {
            return Err(HydraError::Validation(format!(
                "temperature must be in [0, 2], got {temp}"
            )));
        }
    }
    if max_tokens == Some(0) {
        return Err(HydraError::Validation("max_tokens must be positive".into()));
    }

    let mut options = QueryOptions::default();
    options.system_prompt = system_prompt.filter(|s| !s.is_empty());
    options.temperature = temperature;
    options.max_tokens = max_tokens;
    Ok(options)
}

pub(crate) fn validate_model_count(models: &[String], min: usize, max: usize) -> Result<()> {
    if models.len() < min || models.len() > max {
        return Err(HydraError::Validation(format!(
            "expected between {min} and {max} models, got {}",
            models.len()
        )));
    }
    let mut seen = std::collections::HashSet::new();
    for model in models {
        if model.is_empty() {
            return Err(HydraError::Validation("model IDs must be non-empty".into()));
        }
        if !seen.insert(model) {
            return Err(HydraError::Validation(format!(
                "model '{model}' listed more than once"
            )));
        }
    }
    Ok(())
}

/// Fan the same prompt out to several models concurrently with settled
/// semantics: one failing branch never cancels its siblings. Results come
/// back in input order, split into successes and failures.
pub(crate) async fn fan_out(
    smart: &SmartBackend,
    models: &[String],
    prompt: &str,
    options: &QueryOptions,
) -> (Vec<(String, QueryResponse)>, Vec<(String, HydraError)>) {
    let branches = models.iter().map(|model| {
        let model = model.clone();
        async move {
            let result = smart.query(&model, prompt, options).await;
            (model, result)
        }
    });

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for (model, result) in join_all(branches).await {
        match result {
            Ok(response) => successes.push((model, response)),
            Err(e) => failures.push((model, e)),
        }
    }
    (successes, failures)
}

/// `"400ms"`, or `"0ms (cached)"` for a cache hit.
pub(crate) fn format_latency(latency_ms: u64) -> String {
    if latency_ms == 0 {
        "0ms (cached)".to_string()
    } else {
        format!("{latency_ms}ms")
    }
}

/// Token summary for a response, `"-"` when the backend reported none.
pub(crate) fn format_tokens(response: &QueryResponse) -> String {
    match response.usage {
        Some(usage) => format!("{}", usage.total_tokens),
        None => "-".to_string(),
    }
}

/// The comparison table + per-model blocks + errors section. Shared by
/// `compare_models` and the synthesize fallback rendering.
pub(crate) fn render_comparison(
    successes: &[(String, QueryResponse)],
    failures: &[(String, HydraError)],
) -> String {
    let mut out = String::from("## Model Comparison\n\n");

    if successes.is_empty() {
        out.push_str("All models failed.\n\n");
    } else {
        let fastest = successes
            .iter()
            .map(|(_, r)| r.latency_ms)
            .min()
            .unwrap_or(0);

        out.push_str("| Model | Latency | Tokens |\n|---|---|---|\n");
        for (model, response) in successes {
            let mut latency = format_latency(response.latency_ms);
            if response.latency_ms == fastest {
                latency.push_str(" (fastest)");
            }
            out.push_str(&format!(
                "| {model} | {latency} | {} |\n",
                format_tokens(response)
            ));
        }
        out.push('\n');

        for (model, response) in successes {
            out.push_str(&format!("### {model}\n\n"));
            if let Some(from) = &response.fallback_from {
                out.push_str(&format!("_Fallback for {from}_\n\n"));
            }
            out.push_str(response.content.trim());
            out.push_str("\n\n");
        }
    }

    if !failures.is_empty() {
        out.push_str("### Errors\n\n");
        for (model, error) in failures {
            out.push_str(&format!("- **{model}**: {error}\n"));
        }
        out.push('\n');
    }

    out.trim_end().to_string()
}

/// Remediation hint matched to the error class.
fn recovery_hint(error: &HydraError) -> &'static str {
    match error {
        HydraError::Validation(_) => "Fix the tool input and retry.",
        HydraError::Routing(_) => {
            "Call list_models to see available model IDs, or use a provider/model prefix."
        }
        HydraError::Unavailable { .. } => {
            "Wait out the cooldown or pick a different model; call list_models for healthy options."
        }
        HydraError::Timeout { .. } => {
            "Retry, shorten the prompt, or raise HYDRAMCP_TIMEOUT_MS for long generations."
        }
        HydraError::Transport(_) => {
            "Check connectivity and that the provider (or local server) is running, then retry."
        }
        HydraError::Backend { status, .. } if *status == 429 => {
            "The provider is rate limiting; wait a moment and retry, or switch models."
        }
        HydraError::Backend { status, .. } if *status >= 500 => {
            "The provider is having trouble; retry shortly or switch models."
        }
        HydraError::Backend { .. } => "Check the model ID and request parameters, then retry.",
        HydraError::EmptyResponse { .. } => {
            "Retry, raise max_tokens, or rephrase the prompt; some models need more room."
        }
        HydraError::Auth(_) => {
            "Check the provider's API key or re-login with the vendor CLI to refresh credentials."
        }
        HydraError::Json(_) | HydraError::Other(_) => "Retry; if it persists, change models.",
    }
}

/// Markdown error envelope for a failed tool call.
pub fn render_error(error: &HydraError) -> String {
    format!(
        "## Error\n\n{error}\n\n**Recovery:** {}",
        recovery_hint(error)
    )
}

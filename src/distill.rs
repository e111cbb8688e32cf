//! Response distillation: shrink a worker model's output to a token budget
//! with a cheap model, preserving the content that matters.
//!
//! The distiller's own call goes through the same orchestration as every
//! other query (it benefits from the cache and the breaker). Recursion is
//! impossible by construction: the budget is set directly on `max_tokens`,
//! never re-expressed as a distillation request.

use crate::backend::{Backend, QueryOptions, QueryResponse};
use crate::error::Result;
use crate::selection;
use crate::smart::SmartBackend;

/// Distillation is skipped while `observed <= SKIP_RATIO * budget`;
/// the boundary is strict — exactly 1.2x stays raw.
pub const SKIP_RATIO: f64 = 1.2;

const DISTILLER_SYSTEM_PROMPT: &str = "You are a response distiller. Rewrite the given text to fit the requested length while preserving all file paths, identifiers, error messages, code blocks, URLs, commands, numbers, and step lists exactly. Strip filler, hedging, and repetition. Do not add commentary about the distillation.";

/// Metadata about a completed compression, for the tool layer to render.
#[derive(Debug, Clone)]
pub struct DistillInfo {
    pub source_tokens: u64,
    pub distilled_tokens: u64,
    pub distiller_model: String,
    pub distiller_latency_ms: u64,
    /// Percentage of tokens removed, `0..=100`.
    pub saved_pct: u64,
}

/// The result of [`maybe_distill`]: the response to show, plus compression
/// metadata when compression actually ran.
#[derive(Debug, Clone)]
pub struct DistillOutcome {
    pub response: QueryResponse,
    pub info: Option<DistillInfo>,
}

/// Whether a response of `observed_tokens` should be distilled to `budget`.
pub fn should_distill(observed_tokens: u64, budget: u32) -> bool {
    observed_tokens as f64 > SKIP_RATIO * budget as f64
}

/// Compress `response` to roughly `budget` tokens when it exceeds the skip
/// band. Any distiller failure — no candidate model, query error, or output
/// larger than the input — returns the raw response unchanged.
pub async fn maybe_distill(
    smart: &SmartBackend,
    response: QueryResponse,
    budget: u32,
    worker_model: &str,
) -> DistillOutcome {
    let source_tokens = response.completion_tokens_or_estimate();
    if !should_distill(source_tokens, budget) {
        return DistillOutcome {
            response,
            info: None,
        };
    }

    match distill(smart, &response, budget, worker_model).await {
        Ok((distilled, distiller_model)) => {
            let distilled_tokens = distilled.completion_tokens_or_estimate();
            if distilled_tokens >= source_tokens {
                tracing::debug!(
                    source_tokens,
                    distilled_tokens,
                    "distillation did not shrink the response, keeping raw"
                );
                return DistillOutcome {
                    response,
                    info: None,
                };
            }
            let saved_pct = 100 - (distilled_tokens * 100 / source_tokens.max(1));
            let info = DistillInfo {
                source_tokens,
                distilled_tokens,
                distiller_model,
                distiller_latency_ms: distilled.latency_ms,
                saved_pct,
            };
            DistillOutcome {
                response: QueryResponse {
                    content: distilled.content,
                    ..response
                },
                info: Some(info),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "distillation failed, returning raw response");
            DistillOutcome {
                response,
                info: None,
            }
        }
    }
}

async fn distill(
    smart: &SmartBackend,
    response: &QueryResponse,
    budget: u32,
    worker_model: &str,
) -> Result<(QueryResponse, String)> {
    let available = smart.list_models().await?;
    let distiller = selection::pick_distiller(&available, worker_model).ok_or_else(|| {
        crate::error::HydraError::Other("no distiller model available".into())
    })?;

    let prompt = format!(
        "Distill the following response to at most {budget} tokens:\n\n{}",
        response.content
    );
    let options = QueryOptions::default()
        .with_system_prompt(DISTILLER_SYSTEM_PROMPT)
        .with_temperature(0.0)
        .with_max_tokens(budget);

    let distilled = smart.query(&distiller, &prompt, &options).await?;
    Ok((distilled, distiller))
}

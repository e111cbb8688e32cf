//! Reasoning-model detection and special-casing.
//!
//! Models that burn tokens on chain-of-thought before emitting an answer
//! need a larger completion budget and a longer deadline, and may return
//! their entire output as reasoning with an empty visible answer.

use std::time::Duration;

use crate::backend::{QueryOptions, QueryResponse};

/// Floor of the boosted completion budget for reasoning models.
pub const REASONING_MIN_TOKENS: u32 = 4096;
/// Ceiling of the boosted completion budget for reasoning models.
pub const REASONING_MAX_TOKENS: u32 = 16384;

/// Prefix stamped onto promoted reasoning text so the caller can tell it
/// apart from a real answer.
pub const REASONING_PREFIX: &str = "[Model reasoning — no final answer was produced]\n\n";

/// Whether a model ID names a known reasoning model.
///
/// Matches the o-series (`o1`, `o3`, `o4` and dated/sized variants),
/// DeepSeek-R1, QwQ, Gemini thinking variants, and Gemini 3 Pro. Provider
/// prefixes (`openai/o3-mini`) are ignored.
pub fn is_reasoning_model(model: &str) -> bool {
    let bare = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();

    for prefix in ["o1", "o3", "o4"] {
        if let Some(rest) = bare.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with('-') {
                return true;
            }
        }
    }

    bare.contains("deepseek-r1")
        || bare.contains("qwq")
        || bare.contains("thinking")
        || bare.contains("gemini-3-pro")
}

/// Boosted completion budget: `clamp(4 * requested, 4096, 16384)`.
pub fn boosted_max_tokens(requested: u32) -> u32 {
    requested
        .saturating_mul(4)
        .clamp(REASONING_MIN_TOKENS, REASONING_MAX_TOKENS)
}

/// The completion budget a backend should put on the wire for this model.
pub fn effective_max_tokens(model: &str, options: &QueryOptions) -> u32 {
    let requested = options.max_tokens_or_default();
    if is_reasoning_model(model) {
        boosted_max_tokens(requested)
    } else {
        requested
    }
}

/// The per-request deadline for this model: doubled for reasoning models.
pub fn deadline_for(model: &str, base: Duration) -> Duration {
    if is_reasoning_model(model) {
        base * 2
    } else {
        base
    }
}

/// If the visible content is empty but reasoning text exists, surface the
/// reasoning under [`REASONING_PREFIX`] so the tool output is not blank.
pub fn promote_reasoning(response: &mut QueryResponse) {
    if !response.content.trim().is_empty() {
        return;
    }
    if let Some(reasoning) = response.reasoning_content.as_deref() {
        if !reasoning.trim().is_empty() {
            response.content = format!("{REASONING_PREFIX}{reasoning}");
            response.warning = Some(
                "the model produced only reasoning output; showing the reasoning text".into(),
            );
        }
    }
}

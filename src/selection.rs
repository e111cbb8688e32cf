//! Model selection for the helper roles.
//!
//! The distiller, the judge, the synthesizer and the large-context reader
//! are picked from the live catalog by preference lists — cheap/fast
//! classes first — never hardcoded to a single provider.

use crate::backend::ModelInfo;

/// Preference order for large-prompt work (file analysis, session recap).
/// Flash-class Gemini first for context size, then progressively smaller
/// windows.
const LARGE_CONTEXT_PREFERENCES: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-2.5-pro",
    "gemini-1.5-pro",
    "claude-sonnet",
    "gpt-4o",
];

/// Preference order for the distiller and the agreement judge:
/// lite/flash/haiku-class models.
const LIGHTWEIGHT_PREFERENCES: &[&str] = &[
    "flash-lite",
    "gemini-2.0-flash",
    "gemini-2.5-flash",
    "haiku",
    "gpt-4o-mini",
    "o4-mini",
];

/// Bare model name, with any `provider/` prefix stripped.
fn bare(id: &str) -> &str {
    match id.find('/') {
        Some(pos) if pos > 0 => &id[pos + 1..],
        _ => id,
    }
}

/// Whether two model references name the same model, tolerating a provider
/// prefix on either side.
pub fn same_model(a: &str, b: &str) -> bool {
    a == b || bare(a) == bare(b)
}

fn excluded(id: &str, exclude: &[&str]) -> bool {
    exclude.iter().any(|e| same_model(id, e))
}

/// First catalog entry matching the earliest possible preference pattern,
/// skipping excluded models. Patterns match as substrings of the bare ID.
fn pick_preferred(
    available: &[ModelInfo],
    preferences: &[&str],
    exclude: &[&str],
) -> Option<String> {
    for pattern in preferences {
        if let Some(model) = available
            .iter()
            .find(|m| bare(&m.id).contains(pattern) && !excluded(&m.id, exclude))
        {
            return Some(model.id.clone());
        }
    }
    None
}

/// Model for large-prompt work, or the first available model as a last
/// resort.
pub fn pick_large_context(available: &[ModelInfo]) -> Option<String> {
    pick_preferred(available, LARGE_CONTEXT_PREFERENCES, &[])
        .or_else(|| available.first().map(|m| m.id.clone()))
}

/// Distiller pick: lightweight class, never the worker whose output is
/// being compressed.
pub fn pick_distiller(available: &[ModelInfo], worker: &str) -> Option<String> {
    pick_preferred(available, LIGHTWEIGHT_PREFERENCES, &[worker]).or_else(|| {
        available
            .iter()
            .find(|m| !same_model(&m.id, worker))
            .map(|m| m.id.clone())
    })
}

/// Judge pick: lightweight class, excluding every polled model so the
/// judge is not grading its own answer.
pub fn pick_judge(available: &[ModelInfo], polled: &[String]) -> Option<String> {
    let exclude: Vec<&str> = polled.iter().map(String::as_str).collect();
    pick_preferred(available, LIGHTWEIGHT_PREFERENCES, &exclude).or_else(|| {
        available
            .iter()
            .find(|m| !excluded(&m.id, &exclude))
            .map(|m| m.id.clone())
    })
}

/// Synthesizer pick: the first available model not among the sources.
pub fn pick_synthesizer(available: &[ModelInfo], sources: &[String]) -> Option<String> {
    let exclude: Vec<&str> = sources.iter().map(String::as_str).collect();
    available
        .iter()
        .find(|m| !excluded(&m.id, &exclude))
        .map(|m| m.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(ids: &[&str]) -> Vec<ModelInfo> {
        ids.iter()
            .map(|id| ModelInfo {
                id: id.to_string(),
                display_name: id.to_string(),
                provider_key: id.split('/').next().unwrap_or("x").to_string(),
            })
            .collect()
    }

    #[test]
    fn same_model_tolerates_prefixes() {
        assert!(same_model("gpt-4o", "openai/gpt-4o"));
        assert!(same_model("openai/gpt-4o", "gpt-4o"));
        assert!(same_model("gpt-4o", "gpt-4o"));
        assert!(!same_model("gpt-4o", "gpt-4o-mini"));
    }

    #[test]
    fn large_context_prefers_flash() {
        let available = catalog(&[
            "openai/gpt-4o",
            "gemini/gemini-2.0-flash",
            "anthropic/claude-sonnet-4-5",
        ]);
        assert_eq!(
            pick_large_context(&available).unwrap(),
            "gemini/gemini-2.0-flash"
        );
    }

    #[test]
    fn large_context_falls_back_to_first() {
        let available = catalog(&["ollama/llama3.2", "ollama/mistral"]);
        assert_eq!(pick_large_context(&available).unwrap(), "ollama/llama3.2");
    }

    #[test]
    fn large_context_empty_catalog() {
        assert!(pick_large_context(&[]).is_none());
    }

    #[test]
    fn distiller_excludes_worker() {
        let available = catalog(&["gemini/gemini-2.0-flash", "openai/gpt-4o-mini"]);
        // The preferred flash model is the worker, so the next class wins
        assert_eq!(
            pick_distiller(&available, "gemini/gemini-2.0-flash").unwrap(),
            "openai/gpt-4o-mini"
        );
    }

    #[test]
    fn distiller_falls_back_to_any_other_model() {
        let available = catalog(&["ollama/llama3.2", "ollama/mistral"]);
        assert_eq!(
            pick_distiller(&available, "ollama/llama3.2").unwrap(),
            "ollama/mistral"
        );
    }

    #[test]
    fn judge_excludes_all_polled() {
        let available = catalog(&[
            "openai/gpt-4o-mini",
            "anthropic/claude-haiku-4-5",
            "ollama/llama3.2",
        ]);
        let polled = vec!["gpt-4o-mini".to_string(), "claude-haiku-4-5".to_string()];
        assert_eq!(pick_judge(&available, &polled).unwrap(), "ollama/llama3.2");
    }

    #[test]
    fn synthesizer_is_first_not_in_sources() {
        let available = catalog(&["openai/gpt-4o", "anthropic/claude-sonnet-4-5", "ollama/qwen"]);
        let sources = vec!["gpt-4o".to_string(), "claude-sonnet-4-5".to_string()];
        assert_eq!(
            pick_synthesizer(&available, &sources).unwrap(),
            "ollama/qwen"
        );
    }

    #[test]
    fn synthesizer_none_when_all_are_sources() {
        let available = catalog(&["openai/gpt-4o"]);
        let sources = vec!["gpt-4o".to_string()];
        assert!(pick_synthesizer(&available, &sources).is_none());
    }
}

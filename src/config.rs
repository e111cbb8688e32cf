//! Process configuration.
//!
//! Loaded once at startup from the environment plus a persistent
//! `~/.hydramcp/.env` file (key=value lines). Values already present in the
//! process environment win over file values. Nothing here mutates after
//! load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::breaker;
use crate::cache;

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub ollama_base_url: String,

    pub claude_credentials_path: PathBuf,
    pub codex_auth_path: PathBuf,
    pub gemini_oauth_path: PathBuf,

    pub timeout: Duration,
    pub max_failures: u32,
    pub cooldown: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub model_list_ttl: Duration,
    pub cache_enabled: bool,
    pub breaker_enabled: bool,

    pub fallback_chains: HashMap<String, Vec<String>>,
    pub sessions_dir: PathBuf,
}

impl Config {
    /// Load from the process environment, with `~/.hydramcp/.env` filling in
    /// any keys the environment does not set.
    pub fn load() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let mut file_vars = HashMap::new();
        let env_path = home.join(".hydramcp").join(".env");
        if let Ok(contents) = std::fs::read_to_string(&env_path) {
            file_vars = parse_env_file(&contents);
            tracing::debug!(path = %env_path.display(), keys = file_vars.len(), "loaded config file");
        }

        Self::from_lookup(&home, |key| {
            std::env::var(key).ok().or_else(|| file_vars.get(key).cloned())
        })
    }

    /// Build a config from an arbitrary key lookup. Split out of [`load`]
    /// so tests can drive it without touching the process environment.
    pub fn from_lookup(home: &Path, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ms =
            |key: &str, default: u64| -> Duration {
                Duration::from_millis(
                    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default),
                )
            };
        let flag_off = |key: &str| -> bool {
            !lookup(key).is_some_and(|v| {
                matches!(v.trim(), "1" | "true" | "yes")
            })
        };

        let fallback_chains = lookup("HYDRAMCP_FALLBACK_CHAINS")
            .and_then(|raw| parse_fallback_chains(&raw))
            .unwrap_or_default();

        Self {
            openai_api_key: lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()),
            openai_base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".into()),
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").filter(|v| !v.is_empty()),
            anthropic_base_url: lookup("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| "https://api.anthropic.com".into()),
            gemini_api_key: lookup("GEMINI_API_KEY").filter(|v| !v.is_empty()),
            gemini_base_url: lookup("GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            ollama_base_url: lookup("OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434".into()),

            claude_credentials_path: lookup("CLAUDE_CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".claude").join(".credentials.json")),
            codex_auth_path: lookup("CODEX_AUTH_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".codex").join("auth.json")),
            gemini_oauth_path: lookup("GEMINI_OAUTH_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".gemini").join("oauth_creds.json")),

            timeout: ms("HYDRAMCP_TIMEOUT_MS", 120_000),
            max_failures: lookup("HYDRAMCP_MAX_FAILURES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(breaker::DEFAULT_MAX_FAILURES),
            cooldown: ms(
                "HYDRAMCP_COOLDOWN_MS",
                breaker::DEFAULT_COOLDOWN.as_millis() as u64,
            ),
            cache_ttl: ms(
                "HYDRAMCP_CACHE_TTL_MS",
                cache::DEFAULT_RESPONSE_TTL.as_millis() as u64,
            ),
            cache_max_entries: lookup("HYDRAMCP_CACHE_MAX_ENTRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(cache::DEFAULT_MAX_ENTRIES),
            model_list_ttl: ms(
                "HYDRAMCP_MODEL_LIST_TTL_MS",
                cache::DEFAULT_MODEL_LIST_TTL.as_millis() as u64,
            ),
            cache_enabled: flag_off("HYDRAMCP_NO_CACHE"),
            breaker_enabled: flag_off("HYDRAMCP_NO_BREAKER"),

            fallback_chains,
            sessions_dir: lookup("HYDRAMCP_SESSIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".claude").join("projects")),
        }
    }
}

/// Parse `KEY=value` lines. `#` comments and blank lines are skipped,
/// surrounding quotes on values are stripped.
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

/// Parse the fallback-chain JSON document:
/// `{"primary": ["alt1", "alt2"], ...}`. A malformed document is dropped
/// with a warning rather than failing startup.
fn parse_fallback_chains(raw: &str) -> Option<HashMap<String, Vec<String>>> {
    match serde_json::from_str::<HashMap<String, Vec<String>>>(raw) {
        Ok(chains) => Some(chains),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed HYDRAMCP_FALLBACK_CHAINS");
            None
        }
    }
}

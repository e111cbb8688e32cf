//! Backend that spends a user's monthly subscription instead of API credit.
//!
//! Three families, each with a long-lived OAuth refresh token cached at a
//! well-known path by the vendor's own CLI:
//!
//! - `claude-max` — `~/.claude/.credentials.json`, messages wire shape
//! - `chatgpt` — `~/.codex/auth.json`, chat-completions wire shape
//! - `gemini-cli` — `~/.gemini/oauth_creds.json`, generate-content wire shape
//!
//! Per request: read the cached token set, refresh it against the family's
//! token endpoint when the access token is within 60 s of expiry (rewriting
//! the file atomically), then dispatch with the family's wire format. The
//! refresh-and-persist path is serialized per family so concurrent queries
//! cannot write conflicting tokens to disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{anthropic, chat, gemini, send_json, with_backoff, Backend, BackoffConfig, ModelInfo, QueryOptions, QueryResponse};
use crate::error::{HydraError, Result};
use crate::reasoning;

/// How close to expiry a token may be before it is refreshed.
const REFRESH_WINDOW: Duration = Duration::from_secs(60);

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CLAUDE_TOKEN_ENDPOINT: &str = "https://console.anthropic.com/v1/oauth/token";
const CLAUDE_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const CHATGPT_TOKEN_ENDPOINT: &str = "https://auth.openai.com/oauth/token";
const CHATGPT_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";

/// One subscription family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    ClaudeMax,
    ChatGpt,
    GeminiCli,
}

impl Family {
    pub fn key(self) -> &'static str {
        match self {
            Family::ClaudeMax => "claude-max",
            Family::ChatGpt => "chatgpt",
            Family::GeminiCli => "gemini-cli",
        }
    }

    /// Statically declared catalog: subscription plans expose a fixed model
    /// roster, there is no listing endpoint to ask.
    fn catalog(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Family::ClaudeMax => &[
                ("claude-opus-4-6", "Claude Opus 4.6 (subscription)"),
                ("claude-sonnet-4-6", "Claude Sonnet 4.6 (subscription)"),
                ("claude-haiku-4-5", "Claude Haiku 4.5 (subscription)"),
            ],
            Family::ChatGpt => &[
                ("gpt-4o", "GPT-4o (subscription)"),
                ("gpt-4o-mini", "GPT-4o mini (subscription)"),
                ("o3", "o3 (subscription)"),
                ("o4-mini", "o4-mini (subscription)"),
            ],
            Family::GeminiCli => &[
                ("gemini-2.5-pro", "Gemini 2.5 Pro (subscription)"),
                ("gemini-2.5-flash", "Gemini 2.5 Flash (subscription)"),
            ],
        }
    }

    fn token_endpoint(self) -> &'static str {
        match self {
            Family::ClaudeMax => CLAUDE_TOKEN_ENDPOINT,
            Family::ChatGpt => CHATGPT_TOKEN_ENDPOINT,
            Family::GeminiCli => GOOGLE_TOKEN_ENDPOINT,
        }
    }

    fn refresh_body(self, refresh_token: &str) -> Value {
        match self {
            Family::ClaudeMax => json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": CLAUDE_CLIENT_ID,
            }),
            Family::ChatGpt => json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": CHATGPT_CLIENT_ID,
                "scope": "openid profile email",
            }),
            Family::GeminiCli => json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": GOOGLE_CLIENT_ID,
            }),
        }
    }

    /// Parse the vendor-specific credential file into a normalized token set.
    fn parse_tokens(self, doc: &Value) -> Result<TokenSet> {
        let missing = || HydraError::Auth(format!("malformed credential file for '{}'", self.key()));
        match self {
            Family::ClaudeMax => {
                let oauth = doc.get("claudeAiOauth").ok_or_else(missing)?;
                Ok(TokenSet {
                    access: oauth
                        .get("accessToken")
                        .and_then(Value::as_str)
                        .ok_or_else(missing)?
                        .to_string(),
                    refresh: oauth
                        .get("refreshToken")
                        .and_then(Value::as_str)
                        .ok_or_else(missing)?
                        .to_string(),
                    expires_at_ms: oauth.get("expiresAt").and_then(Value::as_u64),
                })
            }
            Family::ChatGpt => {
                let tokens = doc.get("tokens").ok_or_else(missing)?;
                Ok(TokenSet {
                    access: tokens
                        .get("access_token")
                        .and_then(Value::as_str)
                        .ok_or_else(missing)?
                        .to_string(),
                    refresh: tokens
                        .get("refresh_token")
                        .and_then(Value::as_str)
                        .ok_or_else(missing)?
                        .to_string(),
                    expires_at_ms: tokens.get("expires_at").and_then(Value::as_u64),
                })
            }
            Family::GeminiCli => Ok(TokenSet {
                access: doc
                    .get("access_token")
                    .and_then(Value::as_str)
                    .ok_or_else(missing)?
                    .to_string(),
                refresh: doc
                    .get("refresh_token")
                    .and_then(Value::as_str)
                    .ok_or_else(missing)?
                    .to_string(),
                expires_at_ms: doc.get("expiry_date").and_then(Value::as_u64),
            }),
        }
    }

    /// Write refreshed tokens back into the vendor's schema, leaving any
    /// other fields in the file untouched.
    fn apply_refresh(self, doc: &mut Value, refreshed: &TokenSet) {
        match self {
            Family::ClaudeMax => {
                let oauth = &mut doc["claudeAiOauth"];
                oauth["accessToken"] = json!(refreshed.access);
                oauth["refreshToken"] = json!(refreshed.refresh);
                if let Some(exp) = refreshed.expires_at_ms {
                    oauth["expiresAt"] = json!(exp);
                }
            }
            Family::ChatGpt => {
                let tokens = &mut doc["tokens"];
                tokens["access_token"] = json!(refreshed.access);
                tokens["refresh_token"] = json!(refreshed.refresh);
                if let Some(exp) = refreshed.expires_at_ms {
                    tokens["expires_at"] = json!(exp);
                }
                doc["last_refresh"] = json!(chrono::Utc::now().to_rfc3339());
            }
            Family::GeminiCli => {
                doc["access_token"] = json!(refreshed.access);
                doc["refresh_token"] = json!(refreshed.refresh);
                if let Some(exp) = refreshed.expires_at_ms {
                    doc["expiry_date"] = json!(exp);
                }
            }
        }
    }
}

/// Normalized view of one family's cached credentials.
#[derive(Debug, Clone)]
struct TokenSet {
    access: String,
    refresh: String,
    expires_at_ms: Option<u64>,
}

impl TokenSet {
    fn needs_refresh(&self, now_ms: u64) -> bool {
        match self.expires_at_ms {
            Some(expires_at) => now_ms + REFRESH_WINDOW.as_millis() as u64 >= expires_at,
            // No recorded expiry: assume valid and let a 401 surface as Auth
            None => false,
        }
    }
}

struct FamilyState {
    family: Family,
    creds_path: PathBuf,
    // Serializes refresh-and-persist so concurrent queries cannot race the
    // file on disk
    refresh_lock: tokio::sync::Mutex<()>,
}

/// Backend over the configured subscription families.
pub struct SubscriptionBackend {
    client: Client,
    families: Vec<FamilyState>,
    model_map: HashMap<String, usize>,
    timeout: Duration,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for SubscriptionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBackend")
            .field(
                "families",
                &self
                    .families
                    .iter()
                    .map(|s| s.family.key())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SubscriptionBackend {
    /// Build a backend over the given `(family, credential path)` pairs.
    /// Families whose file does not exist are still registered — their
    /// models simply fail with an auth error until the user logs in with
    /// the vendor CLI.
    pub fn new(client: Client, families: Vec<(Family, PathBuf)>, timeout: Duration) -> Self {
        let families: Vec<FamilyState> = families
            .into_iter()
            .map(|(family, creds_path)| FamilyState {
                family,
                creds_path,
                refresh_lock: tokio::sync::Mutex::new(()),
            })
            .collect();

        let mut model_map = HashMap::new();
        for (idx, state) in families.iter().enumerate() {
            for (id, _) in state.family.catalog() {
                model_map.entry(id.to_string()).or_insert(idx);
            }
        }

        Self {
            client,
            families,
            model_map,
            timeout,
            backoff: BackoffConfig::standard(),
        }
    }

    fn family_for(&self, model: &str) -> Result<&FamilyState> {
        self.model_map
            .get(model)
            .map(|&idx| &self.families[idx])
            .ok_or_else(|| {
                HydraError::Routing(format!(
                    "no subscription family serves model '{model}'"
                ))
            })
    }

    /// Current access token for a family, refreshing and persisting first
    /// when inside the expiry window. Holds the family lock for the whole
    /// read-refresh-write sequence.
    async fn access_token(&self, state: &FamilyState) -> Result<String> {
        let _guard = state.refresh_lock.lock().await;

        let raw = tokio::fs::read_to_string(&state.creds_path)
            .await
            .map_err(|e| {
                HydraError::Auth(format!(
                    "cannot read credentials for '{}' at {}: {e}",
                    state.family.key(),
                    state.creds_path.display()
                ))
            })?;
        let mut doc: Value = serde_json::from_str(&raw)?;
        let tokens = state.family.parse_tokens(&doc)?;

        if !tokens.needs_refresh(now_ms()) {
            return Ok(tokens.access);
        }

        tracing::info!(family = state.family.key(), "refreshing subscription access token");
        let refreshed = self.refresh(state.family, &tokens).await?;
        state.family.apply_refresh(&mut doc, &refreshed);
        persist_atomically(&state.creds_path, &doc).await?;
        Ok(refreshed.access)
    }

    async fn refresh(&self, family: Family, tokens: &TokenSet) -> Result<TokenSet> {
        let body = family.refresh_body(&tokens.refresh);
        let resp = send_json(
            self.client.post(family.token_endpoint()).json(&body),
            self.timeout,
        )
        .await
        .map_err(|e| match e {
            HydraError::Backend { status, body, .. } if status < 500 => HydraError::Auth(format!(
                "token refresh for '{}' rejected (HTTP {status}): {body}",
                family.key()
            )),
            other => other,
        })?;

        let access = resp
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                HydraError::Auth(format!("token refresh for '{}' returned no access token", family.key()))
            })?
            .to_string();
        // Vendors that rotate refresh tokens return a new one; keep ours otherwise
        let refresh = resp
            .get("refresh_token")
            .and_then(Value::as_str)
            .unwrap_or(&tokens.refresh)
            .to_string();
        let expires_at_ms = resp
            .get("expires_in")
            .and_then(Value::as_u64)
            .map(|secs| now_ms() + secs * 1000);

        Ok(TokenSet {
            access,
            refresh,
            expires_at_ms,
        })
    }

    async fn dispatch(
        &self,
        family: Family,
        access: &str,
        model: &str,
        prompt: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse> {
        let deadline = reasoning::deadline_for(model, self.timeout);
        let started = tokio::time::Instant::now();

        let resp = match family {
            Family::ClaudeMax => {
                let body = anthropic::build_body(model, prompt, options);
                let resp = with_backoff(&self.backoff, || {
                    let req = self
                        .client
                        .post("https://api.anthropic.com/v1/messages")
                        .header("Authorization", format!("Bearer {access}"))
                        .header("anthropic-version", ANTHROPIC_VERSION)
                        .header("anthropic-beta", "oauth-2025-04-20")
                        .json(&body);
                    send_json(req, deadline)
                })
                .await?;
                anthropic::parse_response(model, &resp, 0)?
            }
            Family::ChatGpt => {
                let body = chat::build_body(model, prompt, options);
                let resp = with_backoff(&self.backoff, || {
                    let req = self
                        .client
                        .post("https://api.openai.com/v1/chat/completions")
                        .header("Authorization", format!("Bearer {access}"))
                        .json(&body);
                    send_json(req, deadline)
                })
                .await?;
                chat::parse_response(model, &resp, 0)?
            }
            Family::GeminiCli => {
                let body = gemini::build_body(model, prompt, options);
                let url = format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
                );
                let resp = with_backoff(&self.backoff, || {
                    let req = self
                        .client
                        .post(&url)
                        .header("Authorization", format!("Bearer {access}"))
                        .json(&body);
                    send_json(req, deadline)
                })
                .await?;
                gemini::parse_response(model, &resp, 0)?
            }
        };

        Ok(QueryResponse {
            latency_ms: started.elapsed().as_millis() as u64,
            ..resp
        })
    }
}

#[async_trait]
impl Backend for SubscriptionBackend {
    async fn health_check(&self) -> bool {
        for state in &self.families {
            if let Ok(raw) = tokio::fs::read_to_string(&state.creds_path).await {
                if let Ok(doc) = serde_json::from_str::<Value>(&raw) {
                    if state.family.parse_tokens(&doc).is_ok() {
                        return true;
                    }
                }
            }
        }
        false
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = Vec::new();
        for state in &self.families {
            if !state.creds_path.exists() {
                continue;
            }
            for (id, display_name) in state.family.catalog() {
                models.push(ModelInfo {
                    id: id.to_string(),
                    display_name: display_name.to_string(),
                    provider_key: self.name().to_string(),
                });
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
        let state = self.family_for(model)?;
        let access = self.access_token(state).await?;
        self.dispatch(state.family, &access, model, prompt, options)
            .await
    }

    fn name(&self) -> &'static str {
        "subscription"
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write the credential file via a temp file in the same directory and an
/// atomic rename, so a crash mid-write cannot truncate the user's tokens.
async fn persist_atomically(path: &Path, doc: &Value) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let rendered = serde_json::to_string_pretty(doc)?;
    tokio::fs::write(&tmp, rendered)
        .await
        .map_err(|e| HydraError::Other(format!("cannot write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| HydraError::Other(format!("cannot rename {} over {}: {e}", tmp.display(), path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude_doc() -> Value {
        json!({
            "claudeAiOauth": {
                "accessToken": "access-a",
                "refreshToken": "refresh-a",
                "expiresAt": 1_800_000_000_000u64,
                "scopes": ["user:inference"]
            }
        })
    }

    #[test]
    fn parses_claude_schema() {
        let tokens = Family::ClaudeMax.parse_tokens(&claude_doc()).unwrap();
        assert_eq!(tokens.access, "access-a");
        assert_eq!(tokens.refresh, "refresh-a");
        assert_eq!(tokens.expires_at_ms, Some(1_800_000_000_000));
    }

    #[test]
    fn parses_codex_schema() {
        let doc = json!({
            "tokens": {"access_token": "access-b", "refresh_token": "refresh-b"},
            "last_refresh": "2026-07-01T00:00:00Z"
        });
        let tokens = Family::ChatGpt.parse_tokens(&doc).unwrap();
        assert_eq!(tokens.access, "access-b");
        assert!(tokens.expires_at_ms.is_none());
    }

    #[test]
    fn parses_gemini_schema() {
        let doc = json!({
            "access_token": "access-c",
            "refresh_token": "refresh-c",
            "expiry_date": 1_790_000_000_000u64
        });
        let tokens = Family::GeminiCli.parse_tokens(&doc).unwrap();
        assert_eq!(tokens.access, "access-c");
        assert_eq!(tokens.expires_at_ms, Some(1_790_000_000_000));
    }

    #[test]
    fn malformed_file_is_auth_error() {
        let err = Family::ClaudeMax.parse_tokens(&json!({})).unwrap_err();
        assert!(matches!(err, HydraError::Auth(_)));
    }

    #[test]
    fn refresh_window_boundary() {
        let tokens = TokenSet {
            access: "a".into(),
            refresh: "r".into(),
            expires_at_ms: Some(1_000_000),
        };
        // Expiring in 61s: fine
        assert!(!tokens.needs_refresh(1_000_000 - 61_000));
        // Expiring in exactly 60s: refresh
        assert!(tokens.needs_refresh(1_000_000 - 60_000));
        // Already expired: refresh
        assert!(tokens.needs_refresh(1_000_001));
    }

    #[test]
    fn no_expiry_means_no_refresh() {
        let tokens = TokenSet {
            access: "a".into(),
            refresh: "r".into(),
            expires_at_ms: None,
        };
        assert!(!tokens.needs_refresh(u64::MAX / 2));
    }

    #[test]
    fn apply_refresh_preserves_vendor_fields() {
        let mut doc = claude_doc();
        let refreshed = TokenSet {
            access: "access-new".into(),
            refresh: "refresh-new".into(),
            expires_at_ms: Some(2_000_000_000_000),
        };
        Family::ClaudeMax.apply_refresh(&mut doc, &refreshed);
        assert_eq!(doc["claudeAiOauth"]["accessToken"], "access-new");
        assert_eq!(doc["claudeAiOauth"]["refreshToken"], "refresh-new");
        assert_eq!(doc["claudeAiOauth"]["expiresAt"], 2_000_000_000_000u64);
        // Untouched vendor field survives the rewrite
        assert_eq!(doc["claudeAiOauth"]["scopes"][0], "user:inference");
    }

    #[test]
    fn model_map_routes_to_owning_family() {
        let backend = SubscriptionBackend::new(
            Client::new(),
            vec![
                (Family::ClaudeMax, PathBuf::from("/nonexistent/claude.json")),
                (Family::ChatGpt, PathBuf::from("/nonexistent/codex.json")),
            ],
            Duration::from_secs(30),
        );
        assert_eq!(
            backend.family_for("claude-sonnet-4-6").unwrap().family,
            Family::ClaudeMax
        );
        assert_eq!(backend.family_for("o3").unwrap().family, Family::ChatGpt);
        assert!(matches!(
            backend.family_for("gemini-2.5-pro"),
            Err(HydraError::Routing(_))
        ));
    }

    #[tokio::test]
    async fn catalog_skips_absent_families() {
        let dir = tempfile::tempdir().unwrap();
        let claude_path = dir.path().join("credentials.json");
        tokio::fs::write(&claude_path, claude_doc().to_string())
            .await
            .unwrap();

        let backend = SubscriptionBackend::new(
            Client::new(),
            vec![
                (Family::ClaudeMax, claude_path),
                (Family::GeminiCli, dir.path().join("missing.json")),
            ],
            Duration::from_secs(30),
        );
        let models = backend.list_models().await.unwrap();
        assert!(models.iter().all(|m| m.id.starts_with("claude-")));
        assert_eq!(models.len(), Family::ClaudeMax.catalog().len());
    }

    #[tokio::test]
    async fn persist_is_atomic_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        tokio::fs::write(&path, "{\"old\": true}").await.unwrap();

        persist_atomically(&path, &json!({"new": true})).await.unwrap();

        let written: Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(written["new"], true);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn health_fails_closed_without_files() {
        let backend = SubscriptionBackend::new(
            Client::new(),
            vec![(Family::ClaudeMax, PathBuf::from("/nonexistent/creds.json"))],
            Duration::from_secs(30),
        );
        assert!(!backend.health_check().await);
    }
}

//! HydraMCP server entry point.
//!
//! Serves the tool surface over stdio. Logging goes to stderr (stdout is
//! the JSON-RPC channel); set `RUST_LOG=hydramcp=debug` for verbose logs.

use std::sync::Arc;
use std::time::Duration;

use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::EnvFilter;

use hydramcp::backend::subscription::Family;
use hydramcp::backend::{
    ChatCompletionsBackend, GenerateContentBackend, MessagesBackend, OllamaBackend,
    SubscriptionBackend,
};
use hydramcp::breaker::CircuitBreaker;
use hydramcp::cache::{ModelListCache, ResponseCache};
use hydramcp::sessions::SessionReader;
use hydramcp::smart::SmartFlags;
use hydramcp::{Config, HydraServer, MultiBackend, SmartBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hydramcp=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = Config::load();
    let smart = Arc::new(build_orchestrator(&config)?);
    let server = HydraServer::new(smart, SessionReader::new(config.sessions_dir.clone()));

    tracing::info!("hydramcp serving on stdio");
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    tracing::info!("hydramcp shutting down");
    Ok(())
}

/// Assemble the backend registry and wrap it in the orchestrator.
///
/// Registration order is the bare-ID tie-break order and is deliberate:
/// native API backends first, then subscription families, then the local
/// server.
fn build_orchestrator(config: &Config) -> anyhow::Result<SmartBackend> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()?;

    let mut multi = MultiBackend::new();

    if let Some(key) = &config.openai_api_key {
        multi.register(
            "openai",
            Arc::new(
                ChatCompletionsBackend::new(
                    client.clone(),
                    config.openai_base_url.clone(),
                    config.timeout,
                )
                .with_api_key(key.clone()),
            ),
        );
    }
    if let Some(key) = &config.anthropic_api_key {
        multi.register(
            "anthropic",
            Arc::new(
                MessagesBackend::new(
                    client.clone(),
                    config.anthropic_base_url.clone(),
                    config.timeout,
                )
                .with_api_key(key.clone()),
            ),
        );
    }
    if let Some(key) = &config.gemini_api_key {
        multi.register(
            "gemini",
            Arc::new(GenerateContentBackend::new(
                client.clone(),
                config.gemini_base_url.clone(),
                key.clone(),
                config.timeout,
            )),
        );
    }

    let families: Vec<_> = [
        (Family::ClaudeMax, config.claude_credentials_path.clone()),
        (Family::ChatGpt, config.codex_auth_path.clone()),
        (Family::GeminiCli, config.gemini_oauth_path.clone()),
    ]
    .into_iter()
    .filter(|(_, path)| path.exists())
    .collect();
    if !families.is_empty() {
        multi.register(
            "subscription",
            Arc::new(SubscriptionBackend::new(
                client.clone(),
                families,
                config.timeout,
            )),
        );
    }

    multi.register(
        "ollama",
        Arc::new(OllamaBackend::new(
            client,
            config.ollama_base_url.clone(),
            config.timeout,
        )),
    );

    let providers = multi.provider_keys().join(", ");
    tracing::info!(providers = %providers, "registered backends");

    let multi = multi.with_fallbacks(config.fallback_chains.clone());
    Ok(SmartBackend::new(Arc::new(multi))
        .with_breaker(CircuitBreaker::new(config.max_failures, config.cooldown))
        .with_cache(ResponseCache::new(config.cache_ttl, config.cache_max_entries))
        .with_model_list_cache(ModelListCache::new(config.model_list_ttl))
        .with_flags(SmartFlags {
            cache_enabled: config.cache_enabled,
            breaker_enabled: config.breaker_enabled,
        }))
}

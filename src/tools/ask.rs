//! `ask_model`: one query against one model, with optional distillation.

use schemars::JsonSchema;
use serde::Deserialize;

use super::{build_options, format_latency, OutputFormat};
use crate::backend::Backend;
use crate::distill::{maybe_distill, DistillInfo};
use crate::error::Result;
use crate::smart::SmartBackend;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AskModelRequest {
    /// Model ID, optionally provider-prefixed (e.g. "openai/gpt-4o" or "qwen")
    pub model: String,
    /// The prompt to send
    pub prompt: String,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Sampling temperature in [0, 2]
    pub temperature: Option<f64>,
    /// Completion token cap (default 1024)
    pub max_tokens: Option<u32>,
    /// Distill the response down to roughly this many tokens
    pub max_response_tokens: Option<u32>,
    /// Output verbosity: "brief" or "detailed" (default)
    pub format: Option<String>,
    /// Append the raw pre-distillation response in a foldable block
    pub include_raw: Option<bool>,
}

pub async fn run(smart: &SmartBackend, req: AskModelRequest) -> Result<String> {
    let format = OutputFormat::parse(req.format.as_deref())?;
    if req.max_response_tokens == Some(0) {
        return Err(crate::error::HydraError::Validation(
            "max_response_tokens must be positive".into(),
        ));
    }
    let options = build_options(req.system_prompt, req.temperature, req.max_tokens)?;

    let response = smart.query(&req.model, &req.prompt, &options).await?;
    let raw_content = response.content.clone();

    let (response, distill_info) = match req.max_response_tokens {
        Some(budget) => {
            let outcome = maybe_distill(smart, response, budget, &req.model).await;
            (outcome.response, outcome.info)
        }
        None => (response, None),
    };

    let mut out = match format {
        OutputFormat::Brief => format!(
            "{}\n\n_{} — {}_",
            response.content.trim(),
            response.model,
            format_latency(response.latency_ms)
        ),
        OutputFormat::Detailed => {
            let mut md = format!("## Response from {}\n\n", response.model);
            if let Some(from) = &response.fallback_from {
                md.push_str(&format!("_Fallback for {from}_\n\n"));
            }
            md.push_str(response.content.trim());
            md.push_str("\n\n---\n");
            md.push_str(&format!(
                "Latency: {}",
                format_latency(response.latency_ms)
            ));
            if let Some(usage) = response.usage {
                md.push_str(&format!(
                    " | Tokens: {} ({} in / {} out)",
                    usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
                ));
            }
            if let Some(warning) = &response.warning {
                md.push_str(&format!("\n\n> Warning: {warning}"));
            }
            md
        }
    };

    if let Some(info) = &distill_info {
        out.push_str(&format!("\n\n{}", render_distill_info(info)));
    }

    if req.include_raw.unwrap_or(false) && distill_info.is_some() {
        out.push_str(&format!(
            "\n\n<details>\n<summary>Raw response</summary>\n\n{}\n\n</details>",
            raw_content.trim()
        ));
    }

    Ok(out)
}

fn render_distill_info(info: &DistillInfo) -> String {
    format!(
        "> Distilled by {} in {}ms: {} → {} tokens ({}% saved)",
        info.distiller_model,
        info.distiller_latency_ms,
        info.source_tokens,
        info.distilled_tokens,
        info.saved_pct
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockOutcome};
    use crate::backend::TokenUsage;
    use crate::error::HydraError;
    use std::sync::Arc;

    fn request(model: &str, prompt: &str) -> AskModelRequest {
        AskModelRequest {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            max_response_tokens: None,
            format: None,
            include_raw: None,
        }
    }

    fn hi_outcome() -> MockOutcome {
        MockOutcome::ReplyWith {
            content: "hi".into(),
            reasoning: None,
            usage: Some(TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            }),
            latency_ms: 400,
        }
    }

    #[tokio::test]
    async fn detailed_output_mentions_latency_and_cache() {
        let mock = Arc::new(MockBackend::new(vec![hi_outcome()]));
        let smart = SmartBackend::new(mock.clone());

        let first = run(&smart, request("m1", "p")).await.unwrap();
        assert!(first.contains("## Response from m1"));
        assert!(first.contains("Latency: 400ms"));
        assert!(first.contains("Tokens: 2 (1 in / 1 out)"));

        let second = run(&smart, request("m1", "p")).await.unwrap();
        assert!(second.contains("0ms (cached)"));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn brief_format_skips_header() {
        let mock = Arc::new(MockBackend::fixed("short answer"));
        let smart = SmartBackend::new(mock);

        let mut req = request("m1", "p");
        req.format = Some("brief".into());
        let out = run(&smart, req).await.unwrap();
        assert!(!out.contains("## Response"));
        assert!(out.contains("short answer"));
    }

    #[tokio::test]
    async fn invalid_temperature_is_validation_error() {
        let smart = SmartBackend::new(Arc::new(MockBackend::fixed("x")));
        let mut req = request("m1", "p");
        req.temperature = Some(3.0);
        assert!(matches!(
            run(&smart, req).await.unwrap_err(),
            HydraError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn distillation_metadata_and_raw_block() {
        let long_answer = "word ".repeat(4000);
        let mock = Arc::new(
            MockBackend::new(vec![
                MockOutcome::ReplyWith {
                    content: long_answer.clone(),
                    reasoning: None,
                    usage: Some(TokenUsage {
                        prompt_tokens: 5,
                        completion_tokens: 5000,
                        total_tokens: 5005,
                    }),
                    latency_ms: 900,
                },
                MockOutcome::ReplyWith {
                    content: "distilled essence".into(),
                    reasoning: None,
                    usage: Some(TokenUsage {
                        prompt_tokens: 5000,
                        completion_tokens: 90,
                        total_tokens: 5090,
                    }),
                    latency_ms: 60,
                },
            ])
            .with_models(&["worker", "gpt-4o-mini"]),
        );
        let smart = SmartBackend::new(mock);

        let mut req = request("worker", "explain everything");
        req.max_response_tokens = Some(100);
        req.include_raw = Some(true);
        let out = run(&smart, req).await.unwrap();

        assert!(out.contains("distilled essence"));
        assert!(out.contains("Distilled by gpt-4o-mini"));
        assert!(out.contains("5000 → 90 tokens"));
        assert!(out.contains("<details>"));
        assert!(out.contains("word word"));
    }

    #[tokio::test]
    async fn backend_error_propagates_for_envelope() {
        let smart = SmartBackend::new(Arc::new(MockBackend::failing(500, "boom")));
        let err = run(&smart, request("m1", "p")).await.unwrap_err();
        assert!(matches!(err, HydraError::Backend { status: 500, .. }));
    }
}

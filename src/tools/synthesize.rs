//! `synthesize`: fan out to several models, then have one synthesizer merge
//! the answers into a single unified response.

use schemars::JsonSchema;
use serde::Deserialize;

use super::{build_options, fan_out, render_comparison, validate_model_count};
use crate::backend::{Backend, QueryOptions, QueryResponse};
use crate::error::{HydraError, Result};
use crate::selection;
use crate::smart::SmartBackend;

const SYNTHESIZER_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SynthesizeRequest {
    /// 2 to 5 model IDs to gather answers from
    pub models: Vec<String>,
    /// The question to answer
    pub prompt: String,
    /// Model that writes the unified answer (auto-selected when omitted)
    pub synthesizer_model: Option<String>,
    /// Optional system prompt applied to every source model
    pub system_prompt: Option<String>,
    /// Sampling temperature in [0, 2]
    pub temperature: Option<f64>,
    /// Completion token cap per source model
    pub max_tokens: Option<u32>,
}

pub async fn run(smart: &SmartBackend, req: SynthesizeRequest) -> Result<String> {
    validate_model_count(&req.models, 2, 5)?;
    let options = build_options(req.system_prompt, req.temperature, req.max_tokens)?;

    let (successes, failures) = fan_out(smart, &req.models, &req.prompt, &options).await;

    if successes.len() < 2 {
        let mut out = String::from(
            "## Synthesis Failed\n\nAt least two source responses are required.\n\n",
        );
        if let Some((model, response)) = successes.first() {
            out.push_str(&format!("### {model}\n\n{}\n\n", response.content.trim()));
        }
        if !failures.is_empty() {
            out.push_str("### Errors\n\n");
            for (model, error) in &failures {
                out.push_str(&format!("- **{model}**: {error}\n"));
            }
        }
        return Ok(out.trim_end().to_string());
    }

    let synthesizer = match resolve_synthesizer(smart, req.synthesizer_model, &req.models).await {
        Some(model) => model,
        None => {
            tracing::warn!("no synthesizer candidate outside the source list, rendering comparison");
            return Ok(render_comparison(&successes, &failures));
        }
    };

    match synthesize(smart, &synthesizer, &req.prompt, &successes).await {
        Ok(unified) => Ok(render(&synthesizer, &unified, &successes, &failures)),
        Err(e) => {
            tracing::warn!(synthesizer = %synthesizer, error = %e, "synthesizer failed, rendering comparison");
            Ok(render_comparison(&successes, &failures))
        }
    }
}

async fn resolve_synthesizer(
    smart: &SmartBackend,
    requested: Option<String>,
    sources: &[String],
) -> Option<String> {
    if let Some(model) = requested.filter(|m| !m.is_empty()) {
        return Some(model);
    }
    let available = smart.list_models().await.ok()?;
    selection::pick_synthesizer(&available, &sources.to_vec())
}

async fn synthesize(
    smart: &SmartBackend,
    synthesizer: &str,
    question: &str,
    successes: &[(String, QueryResponse)],
) -> Result<QueryResponse> {
    let mut prompt = format!(
        "Several models answered the question below. Write ONE unified answer that \
         is shorter than the combined responses, keeps every correct and useful \
         point, resolves disagreements, and never references the individual \
         models or that multiple answers existed.\n\nQuestion: {question}\n\n"
    );
    for (model, response) in successes {
        prompt.push_str(&format!("Response from {model}:\n{}\n\n", response.content));
    }

    let options = QueryOptions::default()
        .with_temperature(0.3)
        .with_max_tokens(SYNTHESIZER_MAX_TOKENS);
    smart.query(synthesizer, &prompt, &options).await
}

fn render(
    synthesizer: &str,
    unified: &QueryResponse,
    successes: &[(String, QueryResponse)],
    failures: &[(String, HydraError)],
) -> String {
    let sources: Vec<&str> = successes.iter().map(|(m, _)| m.as_str()).collect();
    let mut out = format!(
        "## Synthesized Answer\n\nSynthesizer: {synthesizer} | Sources: {}\n\n",
        sources.join(", ")
    );
    out.push_str(unified.content.trim());
    out.push('\n');

    if !failures.is_empty() {
        out.push_str("\n### Errors\n\n");
        for (model, error) in failures {
            out.push_str(&format!("- **{model}**: {error}\n"));
        }
    }
    out.trim_end().to_string()
}

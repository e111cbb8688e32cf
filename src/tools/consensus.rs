//! `consensus`: poll several models, detect semantic agreement, report
//! whether the chosen quorum strategy was reached.

use schemars::JsonSchema;
use serde::Deserialize;

use super::{build_options, fan_out, format_latency, format_tokens, validate_model_count};
use crate::backend::Backend;
use crate::error::{HydraError, Result};
use crate::judge::{keyword_partition, partition_responses, AgreementPartition};
use crate::selection;
use crate::smart::SmartBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Majority,
    Supermajority,
    Unanimous,
}

impl Strategy {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None => Ok(Self::default()),
            Some("majority") => Ok(Self::Majority),
            Some("supermajority") => Ok(Self::Supermajority),
            Some("unanimous") => Ok(Self::Unanimous),
            Some(other) => Err(HydraError::Validation(format!(
                "strategy must be majority, supermajority, or unanimous, got '{other}'"
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Majority => "majority",
            Self::Supermajority => "supermajority",
            Self::Unanimous => "unanimous",
        }
    }

    /// Required quorum out of `n` successful responses.
    pub fn required(self, n: usize) -> usize {
        match self {
            Self::Majority => (n as f64 * 0.5).ceil() as usize,
            Self::Supermajority => (n as f64 * 0.66).ceil() as usize,
            Self::Unanimous => n,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConsensusRequest {
    /// 3 to 7 model IDs to poll
    pub models: Vec<String>,
    /// The question to reach consensus on
    pub prompt: String,
    /// Quorum strategy: "majority" (default), "supermajority", or "unanimous"
    pub strategy: Option<String>,
    /// Model used to judge agreement (auto-selected when omitted)
    pub judge_model: Option<String>,
    /// Optional system prompt applied to every polled model
    pub system_prompt: Option<String>,
    /// Sampling temperature in [0, 2]
    pub temperature: Option<f64>,
    /// Completion token cap per model
    pub max_tokens: Option<u32>,
}

pub async fn run(smart: &SmartBackend, req: ConsensusRequest) -> Result<String> {
    validate_model_count(&req.models, 3, 7)?;
    let strategy = Strategy::parse(req.strategy.as_deref())?;
    let options = build_options(req.system_prompt, req.temperature, req.max_tokens)?;

    let (successes, failures) = fan_out(smart, &req.models, &req.prompt, &options).await;

    if successes.is_empty() {
        let mut out = String::from("## Consensus: NOT REACHED\n\nEvery model failed.\n\n### Errors\n\n");
        for (model, error) in &failures {
            out.push_str(&format!("- **{model}**: {error}\n"));
        }
        return Ok(out.trim_end().to_string());
    }

    let n = successes.len();
    let required = strategy.required(n);
    let texts: Vec<String> = successes.iter().map(|(_, r)| r.content.clone()).collect();

    let partition = match resolve_judge(smart, req.judge_model, &req.models).await {
        Some(judge_model) => {
            partition_responses(smart, &judge_model, &req.prompt, &texts).await
        }
        None => keyword_partition(&texts),
    };

    let agreeing: Vec<usize> = partition.largest_group().to_vec();
    let reached = agreeing.len() >= required;
    let confidence = (agreeing.len() as f64 / n as f64 * 100.0).round() as usize;

    Ok(render(
        strategy, required, n, &agreeing, reached, confidence, &partition, &successes, &failures,
    ))
}

/// The judge to use: explicit request, else a lightweight model outside the
/// poll, else none (keyword heuristic).
async fn resolve_judge(
    smart: &SmartBackend,
    requested: Option<String>,
    polled: &[String],
) -> Option<String> {
    if let Some(judge) = requested.filter(|j| !j.is_empty()) {
        return Some(judge);
    }
    let available = smart.list_models().await.ok()?;
    selection::pick_judge(&available, &polled.to_vec())
}

#[allow(clippy::too_many_arguments)]
fn render(
    strategy: Strategy,
    required: usize,
    n: usize,
    agreeing: &[usize],
    reached: bool,
    confidence: usize,
    partition: &AgreementPartition,
    successes: &[(String, crate::backend::QueryResponse)],
    failures: &[(String, HydraError)],
) -> String {
    let mut out = format!(
        "## Consensus: {}\n\n",
        if reached { "REACHED" } else { "NOT REACHED" }
    );
    out.push_str(&format!(
        "Strategy: {} ({required}/{n} required)\n",
        strategy.label()
    ));
    out.push_str(&format!(
        "Agreement: {}/{n} ({confidence}%)\n",
        agreeing.len()
    ));
    if partition.via_judge {
        if let Some(reasoning) = &partition.reasoning {
            out.push_str(&format!("Judge reasoning: {reasoning}\n"));
        }
    } else {
        out.push_str("Judge unavailable — agreement estimated by keyword overlap.\n");
    }
    out.push('\n');

    if let Some(&first_idx) = agreeing.first() {
        let (model, response) = &successes[first_idx];
        out.push_str(&format!("### Consensus Answer (from {model})\n\n"));
        out.push_str(response.content.trim());
        out.push_str("\n\n");
    }

    out.push_str("### Individual Responses\n\n");
    out.push_str("| Model | Latency | Tokens | Position |\n|---|---|---|---|\n");
    for (idx, (model, response)) in successes.iter().enumerate() {
        let position = if agreeing.contains(&idx) {
            "agree"
        } else {
            "dissent"
        };
        out.push_str(&format!(
            "| {model} | {} | {} | {position} |\n",
            format_latency(response.latency_ms),
            format_tokens(response)
        ));
    }
    out.push('\n');

    let dissenting: Vec<usize> = (0..n).filter(|i| !agreeing.contains(i)).collect();
    if !dissenting.is_empty() {
        out.push_str("### Dissenting\n\n");
        for idx in dissenting {
            let (model, response) = &successes[idx];
            let preview: String = response.content.chars().take(200).collect();
            out.push_str(&format!("- **{model}**: {}\n", preview.trim()));
        }
        out.push('\n');
    }

    if !failures.is_empty() {
        out.push_str(&format!("Failures: {}\n", failures.len()));
        for (model, error) in failures {
            out.push_str(&format!("- **{model}**: {error}\n"));
        }
    }

    out.trim_end().to_string()
}

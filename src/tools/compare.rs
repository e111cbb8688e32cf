//! `compare_models`: the same prompt fanned out to several models, rendered
//! side by side. Partial failure is normal output, not a tool error.

use schemars::JsonSchema;
use serde::Deserialize;

use super::{build_options, fan_out, render_comparison, validate_model_count};
use crate::error::Result;
use crate::smart::SmartBackend;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CompareModelsRequest {
    /// 2 to 5 model IDs to poll with the same prompt
    pub models: Vec<String>,
    /// The prompt to send to every model
    pub prompt: String,
    /// Optional system prompt applied to every model
    pub system_prompt: Option<String>,
    /// Sampling temperature in [0, 2]
    pub temperature: Option<f64>,
    /// Completion token cap per model
    pub max_tokens: Option<u32>,
}

pub async fn run(smart: &SmartBackend, req: CompareModelsRequest) -> Result<String> {
    validate_model_count(&req.models, 2, 5)?;
    let options = build_options(req.system_prompt, req.temperature, req.max_tokens)?;

    let (successes, failures) = fan_out(smart, &req.models, &req.prompt, &options).await;
    Ok(render_comparison(&successes, &failures))
}

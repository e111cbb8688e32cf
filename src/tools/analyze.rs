//! `analyze_file` and `smart_read`: server-side file reads piped through a
//! large-context model. The calling agent never sees the raw bytes — only
//! the model's analysis or extraction, so a huge file costs the agent a
//! fraction of its own context window.

use std::path::Path;

use schemars::JsonSchema;
use serde::Deserialize;

use super::{build_options, format_latency, OutputFormat};
use crate::backend::Backend;
use crate::distill::maybe_distill;
use crate::error::{HydraError, Result};
use crate::selection;
use crate::smart::SmartBackend;

/// Hard cap on file size, in characters.
const MAX_FILE_CHARS: usize = 800_000;
/// Bytes inspected by the binary-content heuristic.
const BINARY_SNIFF_LEN: usize = 8192;
const DEFAULT_ANALYZE_TOKENS: u32 = 2048;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalyzeFileRequest {
    /// Path of the file to analyze
    pub file_path: String,
    /// What to analyze or look for
    pub prompt: String,
    /// Model override (defaults to a large-context model)
    pub model: Option<String>,
    /// Completion token cap
    pub max_tokens: Option<u32>,
    /// Distill the response down to roughly this many tokens
    pub max_response_tokens: Option<u32>,
    /// Output verbosity: "brief" or "detailed" (default)
    pub format: Option<String>,
    /// Append the raw pre-distillation response in a foldable block
    pub include_raw: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SmartReadRequest {
    /// Path of the file to read
    pub file_path: String,
    /// What to extract verbatim
    pub query: String,
    /// Model override (defaults to a large-context model)
    pub model: Option<String>,
    /// Completion token cap
    pub max_tokens: Option<u32>,
    /// Distill the response down to roughly this many tokens
    pub max_response_tokens: Option<u32>,
    /// Output verbosity: "brief" or "detailed" (default)
    pub format: Option<String>,
    /// Append the raw pre-distillation response in a foldable block
    pub include_raw: Option<bool>,
}

struct FileContents {
    text: String,
    bytes: usize,
    chars: usize,
    lines: usize,
}

enum Mode {
    Analyze,
    Extract,
}

pub async fn run_analyze(smart: &SmartBackend, req: AnalyzeFileRequest) -> Result<String> {
    run(
        smart,
        Mode::Analyze,
        &req.file_path,
        &req.prompt,
        req.model,
        req.max_tokens,
        req.max_response_tokens,
        req.format,
        req.include_raw.unwrap_or(false),
    )
    .await
}

pub async fn run_smart_read(smart: &SmartBackend, req: SmartReadRequest) -> Result<String> {
    run(
        smart,
        Mode::Extract,
        &req.file_path,
        &req.query,
        req.model,
        req.max_tokens,
        req.max_response_tokens,
        req.format,
        req.include_raw.unwrap_or(false),
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn run(
    smart: &SmartBackend,
    mode: Mode,
    file_path: &str,
    instruction: &str,
    model: Option<String>,
    max_tokens: Option<u32>,
    max_response_tokens: Option<u32>,
    format: Option<String>,
    include_raw: bool,
) -> Result<String> {
    let output_format = OutputFormat::parse(format.as_deref())?;
    let file = read_file_checked(Path::new(file_path)).await?;

    let model = match model.filter(|m| !m.is_empty()) {
        Some(model) => model,
        None => {
            let available = smart.list_models().await?;
            selection::pick_large_context(&available).ok_or_else(|| {
                HydraError::Routing("no models available for file analysis".into())
            })?
        }
    };

    let prompt = build_prompt(&mode, file_path, &file, instruction);
    let options = build_options(
        None,
        None,
        Some(max_tokens.unwrap_or(DEFAULT_ANALYZE_TOKENS)),
    )?;

    let response = smart.query(&model, &prompt, &options).await?;
    let raw_content = response.content.clone();

    let (response, distill_info) = match max_response_tokens {
        Some(budget) => {
            let outcome = maybe_distill(smart, response, budget, &model).await;
            (outcome.response, outcome.info)
        }
        None => (response, None),
    };

    // What the agent would have spent reading the file itself, minus what
    // this response costs it
    let response_tokens = response.completion_tokens_or_estimate();
    let context_saved = (file.chars as u64).div_ceil(4).saturating_sub(response_tokens);

    let title = match mode {
        Mode::Analyze => format!("## File Analysis: {file_path}"),
        Mode::Extract => format!("## Smart Read: {file_path}"),
    };

    let mut out = match output_format {
        OutputFormat::Brief => response.content.trim().to_string(),
        OutputFormat::Detailed => format!(
            "{title}\n\nFile: {} bytes, {} lines | Model: {} | Latency: {}\n\n{}",
            file.bytes,
            file.lines,
            response.model,
            format_latency(response.latency_ms),
            response.content.trim()
        ),
    };

    out.push_str(&format!("\n\nContext saved: ~{context_saved} tokens"));

    if let Some(info) = &distill_info {
        out.push_str(&format!(
            "\n\n> Distilled by {} in {}ms: {} → {} tokens ({}% saved)",
            info.distiller_model,
            info.distiller_latency_ms,
            info.source_tokens,
            info.distilled_tokens,
            info.saved_pct
        ));
    }
    if include_raw && distill_info.is_some() {
        out.push_str(&format!(
            "\n\n<details>\n<summary>Raw response</summary>\n\n{}\n\n</details>",
            raw_content.trim()
        ));
    }

    Ok(out)
}

/// Read and validate a file: must exist, must not look binary (any null
/// byte in the first 8 KiB), must fit the character cap.
async fn read_file_checked(path: &Path) -> Result<FileContents> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        HydraError::Validation(format!("cannot read '{}': {e}", path.display()))
    })?;

    if bytes[..bytes.len().min(BINARY_SNIFF_LEN)].contains(&0) {
        return Err(HydraError::Validation(format!(
            "'{}' looks like a binary file",
            path.display()
        )));
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    let chars = text.chars().count();
    if chars > MAX_FILE_CHARS {
        return Err(HydraError::Validation(format!(
            "'{}' is too large ({chars} characters, limit {MAX_FILE_CHARS})",
            path.display()
        )));
    }

    Ok(FileContents {
        bytes: bytes.len(),
        chars,
        lines: text.lines().count(),
        text,
    })
}

fn build_prompt(mode: &Mode, file_path: &str, file: &FileContents, instruction: &str) -> String {
    let task = match mode {
        Mode::Analyze => format!(
            "Analyze the file below and answer this request in prose: {instruction}"
        ),
        Mode::Extract => format!(
            "Extract, verbatim, the parts of the file below matching this request: \
             {instruction}. Annotate each extracted span with its line range \
             (e.g. `lines 10-24`). Do not paraphrase the extracted text."
        ),
    };
    format!(
        "{task}\n\nFile: {file_path}\nSize: {} bytes, {} lines\n\n```\n{}\n```",
        file.bytes, file.lines, file.text
    )
}

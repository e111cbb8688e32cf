//! `session_recap`: two-pass summarization of recent work sessions.
//!
//! Pass 1 triages the transcripts into counted categories as JSON. Pass 2
//! writes the recap against a token budget derived from transcript size,
//! event density, and session count, with per-section weight guidance from
//! the triage. Either pass may fail without sinking the tool: a failed
//! recap falls back to the raw triage, and a failed triage just means
//! default weights.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;

use super::build_options;
use crate::backend::{estimate_tokens, Backend, QueryOptions};
use crate::error::{HydraError, Result};
use crate::extract::extract_json_object;
use crate::selection;
use crate::sessions::{SessionReader, SessionTranscript};
use crate::smart::SmartBackend;

const DEFAULT_SESSIONS: usize = 3;
const MAX_SESSIONS: usize = 10;
const BUDGET_MIN: u64 = 1000;
const BUDGET_MAX: u64 = 30_000;
/// Floor share each triage section keeps in the weight guidance.
const SECTION_FLOOR: f64 = 0.10;
const TRIAGE_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionRecapRequest {
    /// How many recent sessions to recap, 1 to 10 (default 3)
    pub sessions: Option<u32>,
    /// Project to recap (auto-detected from recent history when omitted)
    pub project: Option<String>,
    /// Optional focus, e.g. "the auth refactor"
    pub focus: Option<String>,
    /// Model override (defaults to a large-context model)
    pub model: Option<String>,
    /// Cap on the recap's token budget
    pub max_summary_tokens: Option<u32>,
}

/// Pass-1 triage shape. Every field tolerates absence so a sloppy model
/// still produces a usable triage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Triage {
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub decisions_made: Vec<String>,
    #[serde(default)]
    pub errors_resolved: Vec<String>,
    #[serde(default)]
    pub features_built: Vec<String>,
    #[serde(default)]
    pub unfinished_work: Vec<String>,
    #[serde(default)]
    pub total_meaningful_events: u64,
}

impl Triage {
    fn sections(&self) -> [(&'static str, usize); 5] {
        [
            ("files modified", self.files_modified.len()),
            ("decisions made", self.decisions_made.len()),
            ("errors resolved", self.errors_resolved.len()),
            ("features built", self.features_built.len()),
            ("unfinished work", self.unfinished_work.len()),
        ]
    }

    fn events(&self) -> u64 {
        let listed: usize = self.sections().iter().map(|(_, n)| n).sum();
        self.total_meaningful_events.max(listed as u64)
    }
}

pub async fn run(
    smart: &SmartBackend,
    reader: &SessionReader,
    req: SessionRecapRequest,
) -> Result<String> {
    let n = req.sessions.unwrap_or(DEFAULT_SESSIONS as u32) as usize;
    if n == 0 || n > MAX_SESSIONS {
        return Err(HydraError::Validation(format!(
            "sessions must be between 1 and {MAX_SESSIONS}, got {n}"
        )));
    }

    let project = reader.resolve_project(req.project.as_deref())?;
    let transcripts = reader.load(&project, n).await?;
    let combined = combine(&transcripts);
    let input_tokens = estimate_tokens(&combined);

    let model = match req.model.filter(|m| !m.is_empty()) {
        Some(model) => model,
        None => {
            let available = smart.list_models().await?;
            selection::pick_large_context(&available).ok_or_else(|| {
                HydraError::Routing("no models available for session recap".into())
            })?
        }
    };

    // Pass 1: triage. Failure is tolerated — the recap runs with an empty
    // triage and default weights.
    let triage = triage_pass(smart, &model, &combined).await;
    let triage_failed = triage.is_none();
    let triage = triage.unwrap_or_default();

    let budget = token_budget(
        input_tokens,
        triage.events(),
        transcripts.len(),
        req.max_summary_tokens,
    );

    // Pass 2: the recap itself.
    match recap_pass(smart, &model, &combined, &triage, budget, req.focus.as_deref()).await {
        Ok(recap) => Ok(render_recap(
            &project,
            &transcripts,
            &model,
            budget,
            &recap,
        )),
        Err(recap_err) if !triage_failed => {
            tracing::warn!(error = %recap_err, "recap pass failed, emitting triage only");
            Ok(render_triage_fallback(&project, &transcripts, &triage))
        }
        Err(recap_err) => {
            tracing::warn!(error = %recap_err, "both recap passes failed");
            Ok(format!(
                "## Session Recap Failed\n\nProject: {project}\n\nBoth summarization \
                 passes failed (last error: {recap_err}).\n\n**Recovery:** Retry, pick a \
                 different model with the `model` input, or reduce `sessions`."
            ))
        }
    }
}

/// `budget = clamp(round(0.04 · input · density · bonus), 1000, 30000)`
/// where `density = clamp(events/20, 0.5, 2.0)` and
/// `bonus = 1 + (sessions − 1) · 0.3`. An explicit cap clamps the result.
fn token_budget(
    input_tokens: u64,
    events: u64,
    session_count: usize,
    cap: Option<u32>,
) -> u32 {
    let density = (events as f64 / 20.0).clamp(0.5, 2.0);
    let bonus = 1.0 + (session_count.saturating_sub(1)) as f64 * 0.3;
    let raw = (0.04 * input_tokens as f64 * density * bonus).round() as u64;
    let budget = raw.clamp(BUDGET_MIN, BUDGET_MAX) as u32;
    match cap {
        Some(cap) if cap > 0 => budget.min(cap),
        _ => budget,
    }
}

/// Per-section weight shares proportional to triage counts, floored at 10%
/// and renormalized.
fn section_weights(triage: &Triage) -> Vec<(&'static str, f64)> {
    let sections = triage.sections();
    let total: usize = sections.iter().map(|(_, n)| n).sum();

    let raw: Vec<(&'static str, f64)> = sections
        .iter()
        .map(|&(name, count)| {
            let share = if total == 0 {
                1.0 / sections.len() as f64
            } else {
                count as f64 / total as f64
            };
            (name, share.max(SECTION_FLOOR))
        })
        .collect();

    let sum: f64 = raw.iter().map(|(_, w)| w).sum();
    raw.into_iter().map(|(name, w)| (name, w / sum)).collect()
}

async fn triage_pass(smart: &SmartBackend, model: &str, combined: &str) -> Option<Triage> {
    let prompt = format!(
        "Triage the work-session transcripts below. Reply with JSON only:\n\
         {{\"files_modified\": [..], \"decisions_made\": [..], \"errors_resolved\": [..], \
         \"features_built\": [..], \"unfinished_work\": [..], \
         \"total_meaningful_events\": <int>}}\n\n{combined}"
    );
    let options = QueryOptions::default()
        .with_temperature(0.0)
        .with_max_tokens(TRIAGE_MAX_TOKENS);

    let reply = smart.query(model, &prompt, &options).await.ok()?;
    let raw = extract_json_object(&reply.content)?;
    serde_json::from_str(raw).ok()
}

async fn recap_pass(
    smart: &SmartBackend,
    model: &str,
    combined: &str,
    triage: &Triage,
    budget: u32,
    focus: Option<&str>,
) -> Result<crate::backend::QueryResponse> {
    let weights = section_weights(triage);
    let weight_guidance: Vec<String> = weights
        .iter()
        .map(|(name, share)| format!("{name} ~{}%", (share * 100.0).round() as u32))
        .collect();

    let mut prompt = format!(
        "Write a markdown recap of the work sessions below in at most {budget} tokens. \
         Allocate attention roughly as: {}. Use concrete file names, commands, and \
         error messages from the transcripts; skip pleasantries.\n",
        weight_guidance.join(", ")
    );
    if let Some(focus) = focus.filter(|f| !f.is_empty()) {
        prompt.push_str(&format!("Focus especially on: {focus}.\n"));
    }
    prompt.push_str(&format!("\n{combined}"));

    let options = build_options(None, Some(0.2), Some(budget))?;
    smart.query(model, &prompt, &options).await
}

fn combine(transcripts: &[SessionTranscript]) -> String {
    transcripts
        .iter()
        .enumerate()
        .map(|(i, t)| {
            format!(
                "=== Session {} ({}) ===\n{}",
                i + 1,
                t.modified.format("%Y-%m-%d %H:%M UTC"),
                t.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn time_span(transcripts: &[SessionTranscript]) -> (DateTime<Utc>, DateTime<Utc>) {
    let newest = transcripts
        .iter()
        .map(|t| t.modified)
        .max()
        .unwrap_or_default();
    let oldest = transcripts
        .iter()
        .map(|t| t.modified)
        .min()
        .unwrap_or_default();
    (oldest, newest)
}

fn render_recap(
    project: &str,
    transcripts: &[SessionTranscript],
    model: &str,
    budget: u32,
    recap: &crate::backend::QueryResponse,
) -> String {
    let (oldest, newest) = time_span(transcripts);
    format!(
        "## Session Recap: {project}\n\nSessions analyzed: {} ({} → {}) | Model: {model} | \
         Budget: {budget} tokens\n\n{}",
        transcripts.len(),
        oldest.format("%Y-%m-%d"),
        newest.format("%Y-%m-%d"),
        recap.content.trim()
    )
}

fn render_triage_fallback(
    project: &str,
    transcripts: &[SessionTranscript],
    triage: &Triage,
) -> String {
    let mut out = format!(
        "## Session Recap: {project} (partial — triage only)\n\nThe recap pass failed; \
         these are the raw triage results from {} sessions.\n\n",
        transcripts.len()
    );
    for (title, items) in [
        ("Files modified", &triage.files_modified),
        ("Decisions made", &triage.decisions_made),
        ("Errors resolved", &triage.errors_resolved),
        ("Features built", &triage.features_built),
        ("Unfinished work", &triage.unfinished_work),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("### {title}\n\n"));
        for item in items {
            out.push_str(&format!("- {item}\n"));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

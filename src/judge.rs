//! Semantic agreement detection between model responses.
//!
//! The primary path asks a judge model to partition responses into
//! agreement groups as JSON. When the judge call or its output fails, a
//! deterministic keyword-Jaccard heuristic takes over so consensus never
//! depends on a working judge.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::backend::{Backend, QueryOptions};
use crate::extract::extract_json_object;
use crate::smart::SmartBackend;

const JUDGE_MAX_TOKENS: u32 = 512;

/// Jaccard similarity above which two responses count as agreeing in the
/// fallback heuristic.
const JACCARD_THRESHOLD: f64 = 0.3;

/// Words this short carry no signal for the keyword comparison.
const MIN_KEYWORD_LEN: usize = 5;

/// A partition of response indices into agreement groups.
#[derive(Debug, Clone)]
pub struct AgreementPartition {
    /// Disjoint index groups; every response index appears exactly once.
    pub groups: Vec<Vec<usize>>,
    /// The judge's explanation, when the judge produced one.
    pub reasoning: Option<String>,
    /// False when the keyword heuristic produced this partition.
    pub via_judge: bool,
}

impl AgreementPartition {
    /// The largest group (ties break to the earliest), as the consensus set.
    pub fn largest_group(&self) -> &[usize] {
        let mut best: &[usize] = &[];
        for group in &self.groups {
            if group.len() > best.len() {
                best = group;
            }
        }
        best
    }
}

#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    groups: Vec<Vec<usize>>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Partition `responses` into agreement groups, via the judge model when
/// possible, else via [`keyword_partition`].
pub async fn partition_responses(
    smart: &SmartBackend,
    judge_model: &str,
    question: &str,
    responses: &[String],
) -> AgreementPartition {
    if responses.len() < 2 {
        return AgreementPartition {
            groups: vec![(0..responses.len()).collect()],
            reasoning: None,
            via_judge: false,
        };
    }

    match judge_call(smart, judge_model, question, responses).await {
        Some(partition) => partition,
        None => {
            tracing::warn!(judge = judge_model, "judge unavailable, using keyword heuristic");
            keyword_partition(responses)
        }
    }
}

async fn judge_call(
    smart: &SmartBackend,
    judge_model: &str,
    question: &str,
    responses: &[String],
) -> Option<AgreementPartition> {
    let mut prompt = format!(
        "Several models answered the same question. Partition them into groups \
         that give semantically equivalent answers.\n\nQuestion: {question}\n\n"
    );
    for (i, response) in responses.iter().enumerate() {
        prompt.push_str(&format!("Response {i}:\n{response}\n\n"));
    }
    prompt.push_str(
        "Reply with JSON only, in the form \
         {\"groups\": [[0, 2], [1]], \"reasoning\": \"...\"} where each index \
         appears in exactly one group.",
    );

    let options = QueryOptions::default()
        .with_temperature(0.0)
        .with_max_tokens(JUDGE_MAX_TOKENS);

    let reply = smart.query(judge_model, &prompt, &options).await.ok()?;
    let raw = extract_json_object(&reply.content)?;
    let verdict: JudgeVerdict = serde_json::from_str(raw).ok()?;
    let groups = validate_groups(verdict.groups, responses.len())?;

    Some(AgreementPartition {
        groups,
        reasoning: verdict.reasoning,
        via_judge: true,
    })
}

/// Validate a judge partition: indices in range, no duplicates, no empty
/// groups. Indices the judge forgot become singleton groups.
fn validate_groups(groups: Vec<Vec<usize>>, n: usize) -> Option<Vec<Vec<usize>>> {
    let mut seen = BTreeSet::new();
    let mut validated: Vec<Vec<usize>> = Vec::new();

    for group in groups {
        if group.is_empty() {
            continue;
        }
        for &idx in &group {
            if idx >= n || !seen.insert(idx) {
                return None;
            }
        }
        validated.push(group);
    }
    if validated.is_empty() {
        return None;
    }

    for idx in 0..n {
        if !seen.contains(&idx) {
            validated.push(vec![idx]);
        }
    }
    Some(validated)
}

/// Deterministic fallback: compare each response against the first as
/// pivot using keyword-set Jaccard similarity.
pub fn keyword_partition(responses: &[String]) -> AgreementPartition {
    let keyword_sets: Vec<BTreeSet<String>> = responses.iter().map(|r| keywords(r)).collect();

    let mut agreeing = vec![0];
    let mut dissenting = Vec::new();
    for idx in 1..responses.len() {
        if jaccard(&keyword_sets[0], &keyword_sets[idx]) > JACCARD_THRESHOLD {
            agreeing.push(idx);
        } else {
            dissenting.push(idx);
        }
    }

    let mut groups = vec![agreeing];
    for idx in dissenting {
        groups.push(vec![idx]);
    }

    AgreementPartition {
        groups,
        reasoning: None,
        via_judge: false,
    }
}

/// Lowercased alphanumeric words longer than 4 letters.
fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= MIN_KEYWORD_LEN)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use std::sync::Arc;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn judge_partition_is_used_when_valid() {
        let mock = Arc::new(MockBackend::fixed(
            r#"The partition is {"groups": [[0, 1], [2]], "reasoning": "0 and 1 both say blue"} as requested."#,
        ));
        let smart = SmartBackend::new(mock.clone());
        let responses = strings(&["blue", "also blue", "green"]);

        let partition = partition_responses(&smart, "judge-model", "color?", &responses).await;
        assert!(partition.via_judge);
        assert_eq!(partition.groups, vec![vec![0, 1], vec![2]]);
        assert_eq!(partition.largest_group(), &[0, 1]);
        assert!(partition.reasoning.unwrap().contains("blue"));

        // Judge driven with the numbered responses in its prompt
        let (_, prompt) = &mock.recorded_calls()[0];
        assert!(prompt.contains("Response 0:"));
        assert!(prompt.contains("Response 2:"));
    }

    #[tokio::test]
    async fn judge_failure_falls_back_to_keywords() {
        let mock = Arc::new(MockBackend::failing(500, "judge down"));
        let smart = SmartBackend::new(mock);
        let responses = strings(&[
            "photosynthesis converts sunlight into chemical energy",
            "through photosynthesis, sunlight becomes chemical energy",
            "mitochondria are unrelated organelles entirely",
        ]);

        let partition = partition_responses(&smart, "judge-model", "q", &responses).await;
        assert!(!partition.via_judge);
        assert_eq!(partition.largest_group(), &[0, 1]);
    }

    #[tokio::test]
    async fn unparseable_judge_output_falls_back() {
        let mock = Arc::new(MockBackend::fixed("I think they mostly agree."));
        let smart = SmartBackend::new(mock);
        let responses = strings(&["alpha bravo charlie delta", "echo foxtrot golf hotel"]);

        let partition = partition_responses(&smart, "judge-model", "q", &responses).await;
        assert!(!partition.via_judge);
    }

    #[tokio::test]
    async fn out_of_range_index_invalidates_judge() {
        let mock = Arc::new(MockBackend::fixed(r#"{"groups": [[0, 7]]}"#));
        let smart = SmartBackend::new(mock);
        let responses = strings(&["a b c d e", "f g h i j"]);

        let partition = partition_responses(&smart, "judge-model", "q", &responses).await;
        assert!(!partition.via_judge);
    }

    #[test]
    fn validate_fills_missing_indices_as_singletons() {
        let groups = validate_groups(vec![vec![0, 2]], 4).unwrap();
        assert_eq!(groups, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn validate_rejects_duplicates() {
        assert!(validate_groups(vec![vec![0, 1], vec![1]], 3).is_none());
    }

    #[test]
    fn keywords_strip_short_words() {
        let set = keywords("The sky is blue because Rayleigh scattering");
        assert!(set.contains("because"));
        assert!(set.contains("rayleigh"));
        assert!(set.contains("scattering"));
        assert!(!set.contains("sky"));
        assert!(!set.contains("blue"));
        assert!(!set.contains("the"));
    }

    #[test]
    fn keyword_partition_similar_pair() {
        let responses = strings(&[
            "rayleigh scattering explains because shorter wavelengths scatter",
            "shorter wavelengths scatter because rayleigh scattering dominates",
            "totally different subject matter discussing compilers instead",
        ]);
        let partition = keyword_partition(&responses);
        assert_eq!(partition.groups[0], vec![0, 1]);
        assert_eq!(partition.groups[1], vec![2]);
    }

    #[test]
    fn jaccard_empty_sets() {
        let a = BTreeSet::new();
        let b = BTreeSet::new();
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[tokio::test]
    async fn single_response_is_one_group() {
        let mock = Arc::new(MockBackend::fixed("unused"));
        let smart = SmartBackend::new(mock.clone());
        let responses = strings(&["only answer"]);

        let partition = partition_responses(&smart, "judge", "q", &responses).await;
        assert_eq!(partition.groups, vec![vec![0]]);
        assert_eq!(mock.calls(), 0);
    }
}

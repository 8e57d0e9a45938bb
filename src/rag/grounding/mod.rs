
use fancy_regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::debug;

use super::RetrievedCandidate;
use crate::config::GenerationConfig;

static CITATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bSource\s+(\d+)").expect("valid regex"));

static NUMERIC_CLAIM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:\.\d+)?(?:\s*(?:percent|%|rupees|rs|kg|quintal|acre|hectare))")
        .expect("valid regex")
});

static CHEMICAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b[A-Z][a-z]*(?:azole|mycin|bendazim|conazole)\b|\b[A-Z][a-z]*\s+\d+(?:\.\d+)?%?\s*(?:EC|WP|SL|G)\b|\b(?i:thiram|captan|mancozeb)\b",
    )
    .expect("valid regex")
});

/// Checks a generated answer's citations against the sources it was given
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundingValidator {
    threshold: f32,
    length_ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingReport {
    /// Share of supplied sources cited at least once, in `[0.0, 1.0]`
    pub grounding_score: f32,
    pub is_well_grounded: bool,
    pub hallucination_risk: bool,
    /// Distinct in-range citation numbers, ascending
    pub citations: Vec<usize>,
    pub unsupported_claims: Vec<String>,
}

impl From<&GenerationConfig> for GroundingValidator {
    #[inline]
    fn from(config: &GenerationConfig) -> Self {
        Self::new(config.grounding_threshold, config.hallucination_length_ratio)
    }
}

impl GroundingValidator {
    #[inline]
    pub fn new(threshold: f32, length_ratio: f32) -> Self {
        Self {
            threshold,
            length_ratio,
        }
    }

    /// Score `text` against `candidates`, where `[Source k]` means `candidates[k - 1]`.
    ///
    /// `hallucination_risk` is a heuristic: an answer that cites nothing despite having
    /// sources, or that runs far longer than its whole context without citing anything,
    /// is likely to contain invented content. A clean report is not proof of grounding.
    ///
    /// `unsupported_claims` lists quantities with agricultural units and chemical product
    /// names that appear nowhere in the sources. It is advisory and does not affect the
    /// other fields.
    #[inline]
    pub fn validate(&self, text: &str, candidates: &[RetrievedCandidate]) -> GroundingReport {
        let cited = cited_numbers(text);
        let citations: Vec<usize> = cited
            .iter()
            .copied()
            .filter(|k| (1..=candidates.len()).contains(k))
            .collect();

        let grounding_score = citations.len() as f32 / candidates.len().max(1) as f32;
        let uncited = citations.is_empty();

        let is_well_grounded =
            grounding_score >= self.threshold && (candidates.is_empty() || !uncited);

        let context_length: usize = candidates
            .iter()
            .map(|c| c.document.content.chars().count())
            .sum();
        let overlong = text.chars().count() as f32 > context_length as f32 * self.length_ratio;
        let hallucination_risk = uncited && (!candidates.is_empty() || overlong);

        let unsupported_claims = unsupported_claims(text, candidates);

        debug!(
            "Grounding: {} of {} sources cited ({} out of range), score {:.2}, {} unsupported claims",
            citations.len(),
            candidates.len(),
            cited.len() - citations.len(),
            grounding_score,
            unsupported_claims.len()
        );

        GroundingReport {
            grounding_score,
            is_well_grounded,
            hallucination_risk,
            citations,
            unsupported_claims,
        }
    }
}

fn cited_numbers(text: &str) -> BTreeSet<usize> {
    CITATION_REGEX
        .captures_iter(text)
        .filter_map(Result::ok)
        .filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect()
}

fn unsupported_claims(text: &str, candidates: &[RetrievedCandidate]) -> Vec<String> {
    let corpus = candidates
        .iter()
        .map(|c| c.document.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let lowered = text.to_lowercase();
    let numeric = NUMERIC_CLAIM_REGEX
        .find_iter(&lowered)
        .filter_map(Result::ok)
        .map(|m| m.as_str().to_string());
    let chemicals = CHEMICAL_REGEX
        .find_iter(text)
        .filter_map(Result::ok)
        .map(|m| m.as_str().to_string());

    let mut claims: Vec<String> = Vec::new();
    for claim in numeric.chain(chemicals) {
        if !corpus.contains(&claim.to_lowercase()) && !claims.contains(&claim) {
            claims.push(claim);
        }
    }
    claims
}

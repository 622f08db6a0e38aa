//! Citation extraction and coverage checks.
//!
//! The analyzer requires every claim in a model answer to cite an evidence
//! label (`[S1]`, `[S2]`, …). This module extracts the labels actually used,
//! measures coverage against the provided hit count, and decides whether a
//! stricter retry is warranted. Stateless throughout.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::CitationConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct CitationValidation {
    /// Labels found in the answer, deduplicated, in first-use order.
    pub found_sources: Vec<String>,
    /// Labels `S1..Sn` the answer never cited.
    pub missing_sources: Vec<String>,
    /// Fraction of provided sources cited; 1.0 when nothing was provided.
    pub coverage_ratio: f64,
    pub provided_count: usize,
}

/// Why (and whether) the analyzer should retry the completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Sources were provided but the answer cited none of them.
    NoCitations,
    /// Enough sources were provided that the low citation ratio looks like
    /// the model ignored the evidence.
    LowCoverage,
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(S\d+)\]").expect("valid regex"))
}

/// Extract citations from `answer` and score them against `provided_count`
/// sources labeled `S1..S<provided_count>`.
pub fn validate(answer: &str, provided_count: usize) -> CitationValidation {
    let mut found_sources = Vec::new();
    for capture in citation_pattern().captures_iter(answer) {
        let label = capture[1].to_string();
        if !found_sources.contains(&label) {
            found_sources.push(label);
        }
    }

    let missing_sources: Vec<String> = (1..=provided_count)
        .map(|i| format!("S{}", i))
        .filter(|label| !found_sources.contains(label))
        .collect();

    let coverage_ratio = if provided_count == 0 {
        1.0
    } else {
        // Only labels within the provided range count toward coverage;
        // an invented [S99] is found but not covering.
        let in_range = found_sources
            .iter()
            .filter(|label| {
                label[1..]
                    .parse::<usize>()
                    .map(|n| n >= 1 && n <= provided_count)
                    .unwrap_or(false)
            })
            .count();
        in_range as f64 / provided_count as f64
    };

    CitationValidation {
        found_sources,
        missing_sources,
        coverage_ratio,
        provided_count,
    }
}

/// Decide whether the answer deserves one stricter retry.
///
/// With zero provided sources there is nothing to cite, so never retry.
/// The low-coverage check only applies once enough sources exist for the
/// ratio to be meaningful.
pub fn evaluate_retry(
    validation: &CitationValidation,
    config: &CitationConfig,
) -> Option<RetryReason> {
    if validation.provided_count == 0 {
        return None;
    }
    if validation.found_sources.is_empty() {
        return Some(RetryReason::NoCitations);
    }
    if validation.provided_count >= config.min_sources_for_coverage
        && validation.coverage_ratio < config.min_coverage_ratio
    {
        return Some(RetryReason::LowCoverage);
    }
    None
}

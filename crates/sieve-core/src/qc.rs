//! Aggregate quality metrics and the scale-up gate.
//!
//! A summary is always recomputed from the full record set. Rates do not add
//! across partial cohorts, so summaries are never patched incrementally.

use crate::model::{ratio, CritiqueFunnel, TrainingRecord};
use crate::prompts::clean::{is_incomplete, ResponseCleaner};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QcThresholds {
    pub max_runaway_rate: f64,
    pub max_delimiter_leakage: u64,
    pub max_token_limit_hit_rate: f64,
    /// Defaults to the response `max_new_tokens` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_token_cap: Option<u32>,
    /// A raw generation of at least this fraction of the cap counts as a hit.
    pub token_limit_proximity: f64,
    pub min_instruction_acceptance: f64,
    pub min_pair_acceptance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_incomplete_rate: Option<f64>,
    pub duplication_warn_rate: f64,
}

impl Default for QcThresholds {
    fn default() -> Self {
        Self {
            max_runaway_rate: 0.05,
            max_delimiter_leakage: 0,
            max_token_limit_hit_rate: 0.10,
            median_token_cap: None,
            token_limit_proximity: 0.95,
            min_instruction_acceptance: 0.50,
            min_pair_acceptance: 0.50,
            max_incomplete_rate: None,
            duplication_warn_rate: 0.20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QcSummary {
    pub record_count: u64,
    pub runaway_count: u64,
    pub runaway_rate: f64,
    pub delimiter_leakage: u64,
    pub token_limit_hits: u64,
    pub token_limit_hit_rate: f64,
    pub median_tokens: u32,
    pub p90_tokens: u32,
    pub p99_tokens: u32,
    pub incomplete_count: u64,
    pub incomplete_rate: f64,
    pub instruction_acceptance_rate: f64,
    pub pair_acceptance_rate: f64,
    pub instruction_low_confidence: u64,
    pub pair_low_confidence: u64,
    pub generation_cap: u32,
    pub median_token_cap: u32,
    pub funnel: CritiqueFunnel,
    pub thresholds: QcThresholds,
    pub thresholds_passed: bool,
    pub failed_reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QualityController {
    thresholds: QcThresholds,
    generation_cap: u32,
    cleaner: ResponseCleaner,
}

impl QualityController {
    /// `generation_cap` is the response `max_new_tokens`.
    pub fn new(thresholds: QcThresholds, generation_cap: u32, cleaner: ResponseCleaner) -> Self {
        Self {
            thresholds,
            generation_cap,
            cleaner,
        }
    }

    pub fn thresholds(&self) -> &QcThresholds {
        &self.thresholds
    }

    /// Pure function of `records` and `funnel`.
    pub fn compute(&self, records: &[TrainingRecord], funnel: &CritiqueFunnel) -> QcSummary {
        let t = &self.thresholds;
        let n = records.len() as u64;
        let patterns = self.cleaner.patterns();
        let marker = self.cleaner.end_marker();

        let runaway_count = records
            .iter()
            .filter(|r| patterns.is_runaway(&r.response))
            .count() as u64;

        let delimiter_leakage = if marker.is_empty() {
            0
        } else {
            records
                .iter()
                .map(|r| r.response.matches(marker).count() as u64)
                .sum()
        };

        let near_cap = t.token_limit_proximity * self.generation_cap as f64;
        let token_limit_hits = records
            .iter()
            .filter(|r| r.provenance.raw_completion_tokens as f64 >= near_cap)
            .count() as u64;

        let incomplete_count = records
            .iter()
            .filter(|r| is_incomplete(&r.response))
            .count() as u64;

        let mut tokens: Vec<u32> = records
            .iter()
            .map(|r| r.provenance.raw_completion_tokens)
            .collect();
        tokens.sort_unstable();

        let mut summary = QcSummary {
            record_count: n,
            runaway_count,
            runaway_rate: ratio(runaway_count, n),
            delimiter_leakage,
            token_limit_hits,
            token_limit_hit_rate: ratio(token_limit_hits, n),
            median_tokens: percentile(&tokens, 0.50),
            p90_tokens: percentile(&tokens, 0.90),
            p99_tokens: percentile(&tokens, 0.99),
            incomplete_count,
            incomplete_rate: ratio(incomplete_count, n),
            instruction_acceptance_rate: funnel.instruction_acceptance_rate(),
            pair_acceptance_rate: funnel.pair_acceptance_rate(),
            instruction_low_confidence: funnel.instructions_low_confidence,
            pair_low_confidence: funnel.pairs_low_confidence,
            generation_cap: self.generation_cap,
            median_token_cap: t.median_token_cap.unwrap_or(self.generation_cap),
            funnel: funnel.clone(),
            thresholds: t.clone(),
            thresholds_passed: false,
            failed_reasons: Vec::new(),
        };
        summary.failed_reasons = gate(&summary, t, marker);
        summary.thresholds_passed = summary.failed_reasons.is_empty();
        summary
    }
}

fn gate(s: &QcSummary, t: &QcThresholds, marker: &str) -> Vec<String> {
    let mut reasons = Vec::new();

    if s.runaway_rate >= t.max_runaway_rate {
        reasons.push(rate_over("runaway_rate", s.runaway_rate, t.max_runaway_rate));
    }
    if s.delimiter_leakage > t.max_delimiter_leakage {
        reasons.push(format!(
            "delimiter_leakage {} occurrences of {:?} in final responses (allowed {})",
            s.delimiter_leakage, marker, t.max_delimiter_leakage
        ));
    }
    if s.token_limit_hit_rate >= t.max_token_limit_hit_rate {
        reasons.push(rate_over(
            "token_limit_hit_rate",
            s.token_limit_hit_rate,
            t.max_token_limit_hit_rate,
        ));
    }
    if s.median_tokens >= s.median_token_cap {
        reasons.push(format!(
            "median_tokens {} is not below cap {}",
            s.median_tokens, s.median_token_cap
        ));
    }
    if s.instruction_acceptance_rate < t.min_instruction_acceptance {
        reasons.push(rate_under(
            "instruction_acceptance_rate",
            s.instruction_acceptance_rate,
            t.min_instruction_acceptance,
        ));
    }
    if s.pair_acceptance_rate < t.min_pair_acceptance {
        reasons.push(rate_under(
            "pair_acceptance_rate",
            s.pair_acceptance_rate,
            t.min_pair_acceptance,
        ));
    }
    if let Some(max) = t.max_incomplete_rate {
        if s.incomplete_rate >= max {
            reasons.push(rate_over("incomplete_rate", s.incomplete_rate, max));
        }
    }
    reasons
}

fn rate_over(name: &str, actual: f64, max: f64) -> String {
    let verb = if actual > max { "exceeds" } else { "reaches" };
    format!("{} {}% {} {}% threshold", name, pct(actual), verb, pct(max))
}

fn rate_under(name: &str, actual: f64, min: f64) -> String {
    format!("{} {}% below {}% minimum", name, pct(actual), pct(min))
}

/// Percent with at most two decimals and no trailing zeros: 0.07 -> "7".
pub fn pct(rate: f64) -> String {
    let s = format!("{:.2}", rate * 100.0);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Floor index-percentile on sorted data; 0 for an empty set.
fn percentile(sorted: &[u32], q: f64) -> u32 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len() as f64;
    let idx = ((q * (n - 1.0)).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

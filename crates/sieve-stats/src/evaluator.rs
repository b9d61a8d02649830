use crate::bootstrap::paired_difference_ci;
use crate::correction::benjamini_hochberg;
use crate::effect::{cohens_h, magnitude};
use crate::errors::EvalError;
use crate::interval::{wilson, z_for, Interval};
use crate::mcnemar::{mcnemar, ContingencyTable, McNemarResult};
use crate::pairing::{PairedItem, Pairing};
use serde::{Deserialize, Serialize};
use sieve_core::config::EvalSettings;
use std::collections::{BTreeMap, HashSet};

pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub n_items: u64,
    pub successes_a: u64,
    pub successes_b: u64,
    pub rate_a: f64,
    pub rate_b: f64,
    pub confidence: f64,
    pub ci_a: Interval,
    pub ci_b: Interval,
    pub table: ContingencyTable,
    pub mcnemar: McNemarResult,
    /// Positive when B beats A.
    pub cohens_h: f64,
    pub effect_magnitude: String,
    pub rate_difference: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_ci: Option<Interval>,
    pub inconclusive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryReport {
    pub category: String,
    pub p_value: f64,
    pub adjusted_p_value: f64,
    pub significant_after_bh: bool,
    pub result: EvaluationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub schema_version: u32,
    pub generated_at: String,
    pub fdr: f64,
    pub unmatched_a: usize,
    pub unmatched_b: usize,
    pub overall: EvaluationResult,
    pub categories: Vec<CategoryReport>,
}

pub struct Evaluator {
    settings: EvalSettings,
}

impl Evaluator {
    pub fn new(settings: EvalSettings) -> Result<Self, EvalError> {
        z_for(settings.confidence)?;
        Ok(Self { settings })
    }

    /// `successes_a[i]` and `successes_b[i]` must be outcomes on `item_ids[i]`
    /// under deterministic decoding.
    pub fn evaluate(
        &self,
        item_ids: &[String],
        successes_a: &[bool],
        successes_b: &[bool],
    ) -> Result<EvaluationResult, EvalError> {
        if item_ids.len() != successes_a.len() || item_ids.len() != successes_b.len() {
            return Err(EvalError::LengthMismatch {
                ids: item_ids.len(),
                a: successes_a.len(),
                b: successes_b.len(),
            });
        }
        let mut seen = HashSet::with_capacity(item_ids.len());
        for id in item_ids {
            if !seen.insert(id.as_str()) {
                return Err(EvalError::DuplicateId {
                    id: id.clone(),
                    side: "item_ids",
                });
            }
        }
        let pairs: Vec<(bool, bool)> = successes_a
            .iter()
            .copied()
            .zip(successes_b.iter().copied())
            .collect();
        self.evaluate_paired(&pairs)
    }

    pub fn evaluate_items(&self, items: &[PairedItem]) -> Result<EvaluationResult, EvalError> {
        let pairs: Vec<(bool, bool)> = items.iter().map(|i| (i.a, i.b)).collect();
        self.evaluate_paired(&pairs)
    }

    /// Overall result plus one result per category, with Benjamini-Hochberg
    /// applied across the category p-values. Inconclusive categories enter the
    /// family at p = 1.
    pub fn evaluate_by_category(&self, pairing: &Pairing) -> Result<EvaluationReport, EvalError> {
        let overall = self.evaluate_items(&pairing.items)?;

        let mut groups: BTreeMap<&str, Vec<PairedItem>> = BTreeMap::new();
        for item in &pairing.items {
            let key = item.category.as_deref().unwrap_or(UNCATEGORIZED);
            groups.entry(key).or_default().push(item.clone());
        }

        let mut results = Vec::with_capacity(groups.len());
        for (name, items) in &groups {
            results.push((name.to_string(), self.evaluate_items(items)?));
        }
        let raw: Vec<f64> = results.iter().map(|(_, r)| r.mcnemar.p_value).collect();
        let adjusted = benjamini_hochberg(&raw);

        let categories: Vec<CategoryReport> = results
            .into_iter()
            .zip(adjusted)
            .map(|((category, result), adjusted_p_value)| CategoryReport {
                significant_after_bh: !result.inconclusive && adjusted_p_value <= self.settings.fdr,
                p_value: result.mcnemar.p_value,
                adjusted_p_value,
                category,
                result,
            })
            .collect();

        tracing::info!(
            event = "sieve.eval.done",
            items = overall.n_items,
            categories = categories.len(),
            significant = categories.iter().filter(|c| c.significant_after_bh).count(),
            p_value = overall.mcnemar.p_value,
            "paired evaluation complete"
        );

        Ok(EvaluationReport {
            schema_version: 1,
            generated_at: chrono::Utc::now().to_rfc3339(),
            fdr: self.settings.fdr,
            unmatched_a: pairing.unmatched_a,
            unmatched_b: pairing.unmatched_b,
            overall,
            categories,
        })
    }

    /// No pairs means no discordant pairs: an inconclusive result at p = 1,
    /// zero rates and the uninformative [0, 1] interval.
    fn evaluate_paired(&self, pairs: &[(bool, bool)]) -> Result<EvaluationResult, EvalError> {
        let confidence = self.settings.confidence;
        let table = ContingencyTable::from_pairs(pairs.iter().copied());
        let n = table.n();
        let rate_a = rate(table.successes_a(), n);
        let rate_b = rate(table.successes_b(), n);
        let test = mcnemar(&table);
        let h = cohens_h(rate_a, rate_b);

        let bootstrap_ci = self
            .settings
            .bootstrap
            .as_ref()
            .filter(|_| !pairs.is_empty())
            .map(|b| paired_difference_ci(pairs, b.resamples, confidence, b.seed));

        if test.inconclusive {
            tracing::debug!(event = "sieve.eval.inconclusive", items = n, "no discordant pairs");
        }

        Ok(EvaluationResult {
            n_items: n,
            successes_a: table.successes_a(),
            successes_b: table.successes_b(),
            rate_a,
            rate_b,
            confidence,
            ci_a: wilson(table.successes_a(), n, confidence)?,
            ci_b: wilson(table.successes_b(), n, confidence)?,
            table,
            inconclusive: test.inconclusive,
            mcnemar: test,
            cohens_h: h,
            effect_magnitude: magnitude(h).to_string(),
            rate_difference: rate_b - rate_a,
            bootstrap_ci,
        })
    }
}

fn rate(successes: u64, n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        successes as f64 / n as f64
    }
}

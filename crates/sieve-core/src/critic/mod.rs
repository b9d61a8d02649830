//! Single-token A/B critic over next-token log-probabilities.

use crate::errors::GuardError;
use crate::guard::GuardedModel;
use crate::model::{CritiqueVerdict, NextTokenLogprobs};
use crate::prompts::{build_critic_prompt, instruction_item, pair_item, Rubric};
use crate::storage::verdict_cache::VerdictCache;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CriticSettings {
    /// Minimum |logp_good - logp_bad| in nats for a confident verdict.
    pub margin_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<String>,
}

impl Default for CriticSettings {
    fn default() -> Self {
        Self {
            margin_threshold: 1.0,
            cache_path: None,
        }
    }
}

#[derive(Clone)]
pub struct LogprobCritic {
    rubric: Rubric,
    margin_threshold: f64,
    cache: Option<VerdictCache>,
}

impl LogprobCritic {
    pub fn new(rubric: Rubric, margin_threshold: f64) -> Self {
        Self {
            rubric,
            margin_threshold,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: VerdictCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    pub async fn judge_instruction(
        &self,
        model: &GuardedModel,
        instruction: &str,
    ) -> Result<CritiqueVerdict, GuardError> {
        let prompt = build_critic_prompt(&instruction_item(instruction), &self.rubric);
        self.score(model, &prompt).await
    }

    pub async fn judge_pair(
        &self,
        model: &GuardedModel,
        instruction: &str,
        response: &str,
    ) -> Result<CritiqueVerdict, GuardError> {
        let prompt = build_critic_prompt(&pair_item(instruction, response), &self.rubric);
        self.score(model, &prompt).await
    }

    /// One forward pass, no sampling: the same prompt always yields the same verdict.
    pub async fn score(&self, model: &GuardedModel, prompt: &str) -> Result<CritiqueVerdict, GuardError> {
        let cache_key = self.cache.as_ref().map(|_| {
            VerdictCache::key(
                model.model_id(),
                &self.rubric.id,
                &self.rubric.version,
                self.margin_threshold,
                prompt,
            )
        });

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(v) = cache.get(key)? {
                return Ok(v);
            }
        }

        let dist = model.next_token_logprobs(prompt).await?;
        let verdict = self.verdict_from(&dist)?;

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            cache.put(key, model.model_id(), &self.rubric, &verdict)?;
        }
        Ok(verdict)
    }

    fn verdict_from(&self, dist: &NextTokenLogprobs) -> anyhow::Result<CritiqueVerdict> {
        // Tokens outside the returned top-k are floored at the smallest returned
        // logprob, an upper bound on their true value.
        let floor = dist
            .min()
            .ok_or_else(|| anyhow::anyhow!("empty next-token distribution from model"))?;
        let logp_good = class_logprob(dist, &self.rubric.positive_label, floor);
        let logp_bad = class_logprob(dist, &self.rubric.negative_label, floor);
        Ok(CritiqueVerdict::from_logprobs(
            logp_good,
            logp_bad,
            self.margin_threshold,
        ))
    }
}

/// Best of the leading-space and bare tokenizations of a label.
fn class_logprob(dist: &NextTokenLogprobs, label: &str, floor: f64) -> f64 {
    [format!(" {}", label), label.to_string()]
        .iter()
        .filter_map(|t| dist.get(t))
        .fold(floor, f64::max)
}

use crate::errors::RecordError;
use crate::prompts::clean::CleanPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Good,
    Bad,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Good => "good",
            Label::Bad => "bad",
        }
    }
}

/// How a single verdict feeds the funnel counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CritiqueOutcome {
    Accepted,
    RejectedBad,
    LowConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CritiqueVerdict {
    pub label: Label,
    pub logp_good: f64,
    pub logp_bad: f64,
    pub margin: f64,
    pub confident: bool,
}

impl CritiqueVerdict {
    /// Ties go to `bad`.
    pub fn from_logprobs(logp_good: f64, logp_bad: f64, margin_threshold: f64) -> Self {
        let margin = (logp_good - logp_bad).abs();
        let label = if logp_good > logp_bad {
            Label::Good
        } else {
            Label::Bad
        };
        Self {
            label,
            logp_good,
            logp_bad,
            margin,
            confident: margin >= margin_threshold,
        }
    }

    pub fn accepted(&self) -> bool {
        self.label == Label::Good && self.confident
    }

    pub fn outcome(&self) -> CritiqueOutcome {
        if !self.confident {
            CritiqueOutcome::LowConfidence
        } else if self.label == Label::Good {
            CritiqueOutcome::Accepted
        } else {
            CritiqueOutcome::RejectedBad
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateInstruction {
    pub text: String,
    pub seed: Option<u64>,
    pub source_prompt_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 0.8,
            top_p: 0.95,
            repetition_penalty: 1.1,
            seed: None,
        }
    }
}

impl SamplingParams {
    pub fn greedy(max_new_tokens: u32) -> Self {
        Self {
            max_new_tokens,
            temperature: 0.0,
            top_p: 1.0,
            repetition_penalty: 1.0,
            seed: None,
        }
    }

    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Generation {
    pub text: String,
    pub completion_tokens: u32,
    pub finish_reason: FinishReason,
}

/// Top-k next-token distribution keyed by token text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NextTokenLogprobs(pub BTreeMap<String, f64>);

impl NextTokenLogprobs {
    pub fn get(&self, token: &str) -> Option<f64> {
        self.0.get(token).copied()
    }

    pub fn min(&self) -> Option<f64> {
        self.0.values().copied().reduce(f64::min)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for NextTokenLogprobs {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricRef {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub shard_index: u32,
    pub source_prompt_id: String,
    pub instruction_seed: Option<u64>,
    pub response_seed: Option<u64>,
    pub model_id: String,
    pub sieve_version: String,
    pub config_fingerprint: String,
    pub instruction_rubric: RubricRef,
    pub pair_rubric: RubricRef,
    pub instruction_params: SamplingParams,
    pub response_params: SamplingParams,
    pub clean_path: CleanPath,
    pub raw_response: String,
    pub raw_completion_tokens: u32,
    pub finish_reason: FinishReason,
    pub dedup_key: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingRecord {
    pub instruction: String,
    pub response: String,
    pub instruction_critique: CritiqueVerdict,
    pub pair_critique: CritiqueVerdict,
    pub provenance: Provenance,
}

impl TrainingRecord {
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.instruction.trim().is_empty() {
            return Err(RecordError::EmptyField("instruction"));
        }
        if self.response.trim().is_empty() {
            return Err(RecordError::EmptyField("response"));
        }
        if !self.instruction_critique.accepted() {
            return Err(RecordError::NotAccepted("instruction"));
        }
        if !self.pair_critique.accepted() {
            return Err(RecordError::NotAccepted("pair"));
        }
        if self.provenance.dedup_key != crate::fingerprint::dedup_key(&self.instruction) {
            return Err(RecordError::DedupKeyMismatch);
        }
        Ok(())
    }
}

/// Per-shard counters. Counts add across shards; rates are derived, never summed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CritiqueFunnel {
    pub generation_calls: u64,
    pub candidates_generated: u64,
    pub instructions_critiqued: u64,
    pub instructions_accepted: u64,
    pub instructions_rejected_bad: u64,
    pub instructions_low_confidence: u64,
    pub empty_responses: u64,
    pub pairs_critiqued: u64,
    pub pairs_accepted: u64,
    pub pairs_rejected_bad: u64,
    pub pairs_low_confidence: u64,
}

impl CritiqueFunnel {
    pub fn record_instruction(&mut self, verdict: &CritiqueVerdict) {
        self.instructions_critiqued += 1;
        match verdict.outcome() {
            CritiqueOutcome::Accepted => self.instructions_accepted += 1,
            CritiqueOutcome::RejectedBad => self.instructions_rejected_bad += 1,
            CritiqueOutcome::LowConfidence => self.instructions_low_confidence += 1,
        }
    }

    pub fn record_pair(&mut self, verdict: &CritiqueVerdict) {
        self.pairs_critiqued += 1;
        match verdict.outcome() {
            CritiqueOutcome::Accepted => self.pairs_accepted += 1,
            CritiqueOutcome::RejectedBad => self.pairs_rejected_bad += 1,
            CritiqueOutcome::LowConfidence => self.pairs_low_confidence += 1,
        }
    }

    pub fn absorb(&mut self, other: &CritiqueFunnel) {
        self.generation_calls += other.generation_calls;
        self.candidates_generated += other.candidates_generated;
        self.instructions_critiqued += other.instructions_critiqued;
        self.instructions_accepted += other.instructions_accepted;
        self.instructions_rejected_bad += other.instructions_rejected_bad;
        self.instructions_low_confidence += other.instructions_low_confidence;
        self.empty_responses += other.empty_responses;
        self.pairs_critiqued += other.pairs_critiqued;
        self.pairs_accepted += other.pairs_accepted;
        self.pairs_rejected_bad += other.pairs_rejected_bad;
        self.pairs_low_confidence += other.pairs_low_confidence;
    }

    pub fn instruction_acceptance_rate(&self) -> f64 {
        ratio(self.instructions_accepted, self.instructions_critiqued)
    }

    pub fn pair_acceptance_rate(&self) -> f64 {
        ratio(self.pairs_accepted, self.pairs_critiqued)
    }
}

pub(crate) fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub mod pipeline;
pub mod session;

use crate::model::SamplingParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    /// Candidate instructions generated per target record, within [1.5, 2.0].
    pub oversample: f64,
    /// Total instruction-generation calls allowed per shard.
    pub max_generation_calls: u32,
    /// Calls in a row without a fresh instruction before the shard stalls.
    pub max_consecutive_failures: u32,
    pub instruction_sampling: SamplingParams,
    pub response_sampling: SamplingParams,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            oversample: 1.75,
            max_generation_calls: 500,
            max_consecutive_failures: 20,
            instruction_sampling: SamplingParams {
                max_new_tokens: 192,
                temperature: 1.0,
                top_p: 0.95,
                repetition_penalty: 1.15,
                seed: None,
            },
            response_sampling: SamplingParams {
                max_new_tokens: 512,
                temperature: 0.7,
                top_p: 0.9,
                repetition_penalty: 1.1,
                seed: None,
            },
        }
    }
}

pub fn candidate_goal(target_count: usize, oversample: f64) -> usize {
    (target_count as f64 * oversample).ceil() as usize
}

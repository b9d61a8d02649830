use super::{candidate_goal, GenerationSettings};
use crate::config::SieveConfig;
use crate::critic::LogprobCritic;
use crate::errors::{GenerationStallError, PipelineError};
use crate::fingerprint::{config_fingerprint, dedup_key};
use crate::guard::GuardedModel;
use crate::merge::ShardMerger;
use crate::model::{
    CandidateInstruction, CritiqueFunnel, CritiqueVerdict, Generation, Provenance, RubricRef,
    SamplingParams, TrainingRecord,
};
use crate::prompts::clean::{CleanedResponse, ResponseCleaner};
use crate::prompts::{build_instruction_prompt, build_response_prompt, parse_instructions, FewShotPool, Rubric};
use crate::qc::{QcSummary, QualityController};
use crate::storage::verdict_cache::VerdictCache;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShardSpec {
    pub index: u32,
    pub target_count: usize,
    pub seed: u64,
}

/// Output of a shard that completed all five phases.
#[derive(Debug, Clone)]
pub struct ShardOutput {
    pub shard_index: u32,
    pub config_fingerprint: String,
    pub records: Vec<TrainingRecord>,
    pub funnel: CritiqueFunnel,
    pub qc: QcSummary,
}

struct AcceptedInstruction {
    candidate: CandidateInstruction,
    verdict: CritiqueVerdict,
}

struct DraftPair {
    accepted: AcceptedInstruction,
    raw: Generation,
    cleaned: CleanedResponse,
    params: SamplingParams,
}

pub struct Pipeline {
    pool: FewShotPool,
    instruction_critic: LogprobCritic,
    pair_critic: LogprobCritic,
    cleaner: ResponseCleaner,
    qc: QualityController,
    settings: GenerationSettings,
    config_fingerprint: String,
}

impl Pipeline {
    pub fn from_config(cfg: &SieveConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let pool = FewShotPool::from_settings(&cfg.prompts)?;
        let cleaner = ResponseCleaner::from_settings(&cfg.cleaning)?;
        let qc = QualityController::new(
            cfg.qc.clone(),
            cfg.generation.response_sampling.max_new_tokens,
            cleaner.clone(),
        );

        let mut instruction_critic = LogprobCritic::new(
            cfg.prompts.instruction_rubric.clone(),
            cfg.critic.margin_threshold,
        );
        let mut pair_critic =
            LogprobCritic::new(cfg.prompts.pair_rubric.clone(), cfg.critic.margin_threshold);
        if let Some(path) = &cfg.critic.cache_path {
            let cache = VerdictCache::open(std::path::Path::new(path))?;
            instruction_critic = instruction_critic.with_cache(cache.clone());
            pair_critic = pair_critic.with_cache(cache);
        }

        Ok(Self {
            pool,
            instruction_critic,
            pair_critic,
            cleaner,
            qc,
            settings: cfg.generation.clone(),
            config_fingerprint: config_fingerprint(cfg),
        })
    }

    pub fn quality_controller(&self) -> &QualityController {
        &self.qc
    }

    pub fn merger(&self) -> ShardMerger {
        ShardMerger::new(self.qc.clone())
    }

    pub fn config_fingerprint(&self) -> &str {
        &self.config_fingerprint
    }

    /// generate -> critique -> respond -> critique -> assemble.
    ///
    /// The shard either completes every phase or returns an error; nothing
    /// partial is handed back.
    pub async fn run_shard(
        &self,
        model: &GuardedModel,
        spec: &ShardSpec,
    ) -> Result<ShardOutput, PipelineError> {
        let mut rng = ChaCha8Rng::seed_from_u64(spec.seed);
        let mut funnel = CritiqueFunnel::default();

        tracing::info!(
            event = "sieve.shard.start",
            shard = spec.index,
            target = spec.target_count,
            seed = spec.seed,
            "starting shard"
        );

        // 1. candidate instructions
        let candidates = self
            .generate_candidates(model, spec, &mut rng, &mut funnel)
            .await?;

        // 2. instruction critique
        let mut accepted = Vec::new();
        for candidate in candidates {
            let verdict = self
                .instruction_critic
                .judge_instruction(model, &candidate.text)
                .await?;
            funnel.record_instruction(&verdict);
            if verdict.accepted() {
                accepted.push(AcceptedInstruction { candidate, verdict });
            }
        }
        tracing::info!(
            event = "sieve.shard.instructions_judged",
            shard = spec.index,
            accepted = funnel.instructions_accepted,
            rejected = funnel.instructions_rejected_bad,
            low_confidence = funnel.instructions_low_confidence,
        );

        // 3. one response per accepted instruction
        let mut drafts = Vec::new();
        for a in accepted {
            let params = self.settings.response_sampling.with_seed(rng.gen());
            let raw = model
                .generate(&build_response_prompt(&a.candidate.text), &params)
                .await?;
            let cleaned = self.cleaner.clean(&raw.text, raw.finish_reason);
            if cleaned.text.is_empty() {
                funnel.empty_responses += 1;
                continue;
            }
            drafts.push(DraftPair {
                accepted: a,
                raw,
                cleaned,
                params,
            });
        }

        // 4. pair critique
        let mut kept = Vec::new();
        for d in drafts {
            let verdict = self
                .pair_critic
                .judge_pair(model, &d.accepted.candidate.text, &d.cleaned.text)
                .await?;
            funnel.record_pair(&verdict);
            if verdict.accepted() {
                kept.push((d, verdict));
            }
        }

        // 5. assemble
        let created_at = chrono::Utc::now().to_rfc3339();
        let mut records: Vec<TrainingRecord> = kept
            .into_iter()
            .map(|(d, pair_verdict)| self.assemble(model, spec, d, pair_verdict, &created_at))
            .collect();
        if records.len() > spec.target_count {
            records.truncate(spec.target_count);
        }

        let qc = self.qc.compute(&records, &funnel);
        tracing::info!(
            event = "sieve.shard.done",
            shard = spec.index,
            records = records.len(),
            thresholds_passed = qc.thresholds_passed,
            "shard complete"
        );

        Ok(ShardOutput {
            shard_index: spec.index,
            config_fingerprint: self.config_fingerprint.clone(),
            records,
            funnel,
            qc,
        })
    }

    /// Bounded retry loop: stops at the candidate goal or the call budget, and
    /// stalls after too many consecutive calls without a fresh instruction.
    async fn generate_candidates(
        &self,
        model: &GuardedModel,
        spec: &ShardSpec,
        rng: &mut ChaCha8Rng,
        funnel: &mut CritiqueFunnel,
    ) -> Result<Vec<CandidateInstruction>, PipelineError> {
        let goal = candidate_goal(spec.target_count, self.settings.oversample);
        // Echoed few-shot examples count as duplicates.
        let mut seen: HashSet<String> = self.pool.examples().iter().cloned().collect();
        let mut candidates = Vec::with_capacity(goal);
        let mut calls = 0u32;
        let mut consecutive_failures = 0u32;

        while candidates.len() < goal {
            if calls >= self.settings.max_generation_calls {
                tracing::warn!(
                    event = "sieve.shard.call_budget_exhausted",
                    shard = spec.index,
                    calls,
                    candidates = candidates.len(),
                    goal,
                    "continuing with fewer candidates than planned"
                );
                break;
            }

            let prompt = build_instruction_prompt(&self.pool, rng);
            let seed: u64 = rng.gen();
            let params = self.settings.instruction_sampling.with_seed(seed);
            calls += 1;
            funnel.generation_calls += 1;

            let gen = model.generate(&prompt.text, &params).await?;
            let mut fresh = 0usize;
            for text in parse_instructions(&prompt.continuation_list(&gen.text)) {
                if candidates.len() >= goal {
                    break;
                }
                if seen.insert(text.clone()) {
                    candidates.push(CandidateInstruction {
                        text,
                        seed: Some(seed),
                        source_prompt_id: prompt.prompt_id.clone(),
                    });
                    fresh += 1;
                }
            }
            funnel.candidates_generated += fresh as u64;

            if fresh == 0 {
                consecutive_failures += 1;
                tracing::debug!(
                    event = "sieve.shard.empty_call",
                    shard = spec.index,
                    consecutive_failures
                );
                if consecutive_failures >= self.settings.max_consecutive_failures {
                    return Err(GenerationStallError {
                        shard_index: spec.index,
                        consecutive_failures,
                        budget: self.settings.max_consecutive_failures,
                        candidates: candidates.len(),
                        generation_calls: calls,
                    }
                    .into());
                }
            } else {
                consecutive_failures = 0;
            }
        }

        tracing::info!(
            event = "sieve.shard.candidates",
            shard = spec.index,
            candidates = candidates.len(),
            calls,
            goal,
        );
        Ok(candidates)
    }

    fn assemble(
        &self,
        model: &GuardedModel,
        spec: &ShardSpec,
        d: DraftPair,
        pair_verdict: CritiqueVerdict,
        created_at: &str,
    ) -> TrainingRecord {
        let instruction = d.accepted.candidate.text;
        TrainingRecord {
            response: d.cleaned.text,
            instruction_critique: d.accepted.verdict,
            pair_critique: pair_verdict,
            provenance: Provenance {
                shard_index: spec.index,
                source_prompt_id: d.accepted.candidate.source_prompt_id,
                instruction_seed: d.accepted.candidate.seed,
                response_seed: d.params.seed,
                model_id: model.model_id().to_string(),
                sieve_version: env!("CARGO_PKG_VERSION").to_string(),
                config_fingerprint: self.config_fingerprint.clone(),
                instruction_rubric: rubric_ref(self.instruction_critic.rubric()),
                pair_rubric: rubric_ref(self.pair_critic.rubric()),
                instruction_params: self.settings.instruction_sampling.clone(),
                response_params: d.params,
                clean_path: d.cleaned.path,
                raw_response: d.raw.text,
                raw_completion_tokens: d.raw.completion_tokens,
                finish_reason: d.raw.finish_reason,
                dedup_key: dedup_key(&instruction),
                created_at: created_at.to_string(),
            },
            instruction,
        }
    }
}

fn rubric_ref(r: &Rubric) -> RubricRef {
    RubricRef {
        id: r.id.clone(),
        version: r.version.clone(),
    }
}

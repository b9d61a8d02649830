#![allow(dead_code)]

use sieve_core::fingerprint::dedup_key;
use sieve_core::model::{
    CritiqueFunnel, CritiqueVerdict, FinishReason, Generation, NextTokenLogprobs, Provenance,
    RubricRef, SamplingParams, TrainingRecord,
};
use sieve_core::prompts::clean::CleanPath;
use sieve_core::providers::llm::fake::{stop, ScriptedModel};
use sieve_core::prompts::RESPONSE_SUFFIX;

pub fn good() -> NextTokenLogprobs {
    [(" good", -0.05), (" bad", -3.2), (" The", -4.0)]
        .into_iter()
        .collect()
}

pub fn bad() -> NextTokenLogprobs {
    [(" good", -3.1), (" bad", -0.06), (" The", -4.0)]
        .into_iter()
        .collect()
}

/// Completes the three handled sentinels, fails the instruction-following ones.
pub fn base_model(id: &str) -> ScriptedModel {
    ScriptedModel::new(id)
        .on_prompt("The capital of France is", " Paris, which is also its largest city.")
        .on_prompt("One, two, three, four,", " five, six, seven.")
        .on_prompt("The opposite of hot is", " cold, and the opposite of up is down.")
}

/// Judges by the item under the rubric: `REJECT` in an instruction or `WRONG`
/// in a response is labeled bad.
pub fn critic_fn(prompt: &str) -> NextTokenLogprobs {
    let item = prompt.rsplit("\n\n").next().unwrap_or(prompt);
    if item.contains("REJECT") || item.contains("WRONG") {
        bad()
    } else {
        good()
    }
}

/// Every instruction-list call yields `items` unique continuations derived from
/// the call seed; every response call yields `response`.
pub fn factory_model(items: Vec<&'static str>, response: &'static str) -> ScriptedModel {
    base_model("factory-base")
        .with_generator(move |prompt, params| {
            if prompt.ends_with(RESPONSE_SUFFIX) {
                return stop(response);
            }
            let seed = params.seed.unwrap_or(0);
            let mut out = String::new();
            for (i, template) in items.iter().enumerate() {
                if i == 0 {
                    out.push(' ');
                } else {
                    out.push_str(&format!("{}. ", 90 + i));
                }
                out.push_str(&template.replace("{seed}", &seed.to_string()));
                out.push('\n');
            }
            stop(&out)
        })
        .with_logprob_fn(critic_fn)
}

pub fn accepted_verdict() -> CritiqueVerdict {
    CritiqueVerdict::from_logprobs(-0.05, -3.0, 1.0)
}

pub fn record(shard: u32, instruction: &str, response: &str, tokens: u32) -> TrainingRecord {
    TrainingRecord {
        instruction: instruction.to_string(),
        response: response.to_string(),
        instruction_critique: accepted_verdict(),
        pair_critique: accepted_verdict(),
        provenance: Provenance {
            shard_index: shard,
            source_prompt_id: "0123456789abcdef".into(),
            instruction_seed: Some(1),
            response_seed: Some(2),
            model_id: "fixture".into(),
            sieve_version: "test".into(),
            config_fingerprint: "sha256:fixture".into(),
            instruction_rubric: RubricRef {
                id: "instruction_quality".into(),
                version: "1".into(),
            },
            pair_rubric: RubricRef {
                id: "pair_quality".into(),
                version: "1".into(),
            },
            instruction_params: SamplingParams::default(),
            response_params: SamplingParams::default(),
            clean_path: CleanPath::EndOfText,
            raw_response: response.to_string(),
            raw_completion_tokens: tokens,
            finish_reason: FinishReason::Stop,
            dedup_key: dedup_key(instruction),
            created_at: "2026-01-01T00:00:00Z".into(),
        },
    }
}

/// A funnel where every candidate and pair was accepted.
pub fn clean_funnel(n: u64) -> CritiqueFunnel {
    CritiqueFunnel {
        generation_calls: n,
        candidates_generated: n,
        instructions_critiqued: n,
        instructions_accepted: n,
        pairs_critiqued: n,
        pairs_accepted: n,
        ..Default::default()
    }
}

pub fn generation(text: &str, tokens: u32, finish: FinishReason) -> Generation {
    Generation {
        text: text.into(),
        completion_tokens: tokens,
        finish_reason: finish,
    }
}

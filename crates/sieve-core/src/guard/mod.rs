//! Completion-mode enforcement.
//!
//! `GuardedModel` is the only holder of a `CompletionModel`. Every other component
//! receives `&GuardedModel` and can do exactly two things with it: generate a
//! continuation and read next-token log-probabilities.

pub mod sentinels;

use crate::errors::{ContaminationError, GuardError, MarkerSite};
use crate::model::{Generation, NextTokenLogprobs, SamplingParams};
use crate::providers::llm::CompletionModel;
use regex::Regex;
use sentinels::{Sentinel, SentinelExpectation, SentinelOutcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardSettings {
    pub token_sentinel: String,
    pub sentinels: Vec<Sentinel>,
    pub min_completion_pass_rate: f64,
    pub sentinel_max_new_tokens: u32,
    pub template_markers: Vec<String>,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            token_sentinel: "Sentinel check: the quick brown fox jumps over the lazy dog.".into(),
            sentinels: sentinels::default_battery(),
            min_completion_pass_rate: 0.5,
            sentinel_max_new_tokens: 24,
            template_markers: sentinels::default_template_markers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenCheck {
    pub sentinel: String,
    pub with_special: usize,
    pub without_special: usize,
    pub identical: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardReport {
    pub model_id: String,
    pub token_check: TokenCheck,
    pub sentinels: Vec<SentinelOutcome>,
    pub completion_pass_rate: f64,
}

pub struct GuardedModel {
    model: Box<dyn CompletionModel>,
    markers: Vec<String>,
    report: GuardReport,
}

impl GuardedModel {
    pub async fn generate(&self, text: &str, params: &SamplingParams) -> Result<Generation, GuardError> {
        self.scan(text, MarkerSite::Prompt)?;
        let gen = self.model.generate(text, params).await?;
        self.scan(&gen.text, MarkerSite::Output)?;
        Ok(gen)
    }

    pub async fn next_token_logprobs(&self, text: &str) -> Result<NextTokenLogprobs, GuardError> {
        self.scan(text, MarkerSite::Prompt)?;
        Ok(self.model.next_token_logprobs(text).await?)
    }

    pub fn model_id(&self) -> &str {
        &self.report.model_id
    }

    pub fn report(&self) -> &GuardReport {
        &self.report
    }

    fn scan(&self, text: &str, site: MarkerSite) -> Result<(), ContaminationError> {
        match self.markers.iter().find(|m| text.contains(m.as_str())) {
            Some(marker) => {
                tracing::error!(
                    event = "sieve.guard.marker",
                    marker = %marker,
                    site = %site,
                    "chat-template marker observed"
                );
                Err(ContaminationError::TemplateMarker {
                    marker: marker.clone(),
                    site,
                })
            }
            None => Ok(()),
        }
    }
}

/// Puts the model into pure completion mode and proves it before handing it out.
pub async fn prepare(
    mut model: Box<dyn CompletionModel>,
    settings: &GuardSettings,
) -> Result<GuardedModel, GuardError> {
    model.disable_templating()?;
    let model_id = model.model_id();
    if model.templating_active() {
        return Err(ContaminationError::TemplatingActive { model_id }.into());
    }

    let with_special = model.tokenize(&settings.token_sentinel, true).await?;
    let without_special = model.tokenize(&settings.token_sentinel, false).await?;
    let token_check = TokenCheck {
        sentinel: settings.token_sentinel.clone(),
        with_special: with_special.len(),
        without_special: without_special.len(),
        identical: with_special == without_special,
    };
    if !token_check.identical {
        return Err(ContaminationError::SpecialTokenInsertion {
            with_special: token_check.with_special,
            without_special: token_check.without_special,
        }
        .into());
    }

    let mut guarded = GuardedModel {
        model,
        markers: settings.template_markers.clone(),
        report: GuardReport {
            model_id,
            token_check,
            sentinels: Vec::new(),
            completion_pass_rate: 1.0,
        },
    };

    let outcomes = run_sentinels(&guarded, settings).await?;

    if let Some(leak) = outcomes
        .iter()
        .find(|o| o.expect == SentinelExpectation::Fails && o.succeeded)
    {
        return Err(ContaminationError::InstructionSentinelPassed {
            name: leak.name.clone(),
            output: leak.output.clone(),
        }
        .into());
    }

    let handles: Vec<&SentinelOutcome> = outcomes
        .iter()
        .filter(|o| o.expect == SentinelExpectation::Handles)
        .collect();
    let failed = handles.iter().filter(|o| !o.succeeded).count();
    let pass_rate = if handles.is_empty() {
        1.0
    } else {
        (handles.len() - failed) as f64 / handles.len() as f64
    };
    if pass_rate < settings.min_completion_pass_rate {
        return Err(ContaminationError::CompletionSentinelsFailed {
            failed,
            total: handles.len(),
        }
        .into());
    }

    guarded.report.sentinels = outcomes;
    guarded.report.completion_pass_rate = pass_rate;

    tracing::info!(
        event = "sieve.guard.ready",
        model_id = %guarded.report.model_id,
        sentinels = guarded.report.sentinels.len(),
        completion_pass_rate = pass_rate,
        "model verified in completion mode"
    );
    Ok(guarded)
}

async fn run_sentinels(
    guarded: &GuardedModel,
    settings: &GuardSettings,
) -> Result<Vec<SentinelOutcome>, GuardError> {
    let params = SamplingParams::greedy(settings.sentinel_max_new_tokens);
    let mut outcomes = Vec::with_capacity(settings.sentinels.len());

    for s in &settings.sentinels {
        let re = Regex::new(&s.success_pattern).map_err(|e| {
            anyhow::anyhow!("config error: invalid sentinel pattern for '{}': {}", s.name, e)
        })?;
        let gen = guarded.generate(&s.prompt, &params).await?;
        let outcome = SentinelOutcome {
            name: s.name.clone(),
            expect: s.expect,
            succeeded: re.is_match(&gen.text),
            output: gen.text,
        };
        if outcome.unexpected() {
            tracing::warn!(
                event = "sieve.guard.sentinel",
                sentinel = %outcome.name,
                expect = ?outcome.expect,
                output = %outcome.output,
                "sentinel outcome not as expected"
            );
        } else {
            tracing::debug!(event = "sieve.guard.sentinel", sentinel = %outcome.name, "ok");
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::llm::fake::{stop, ScriptedModel};

    fn base_model() -> ScriptedModel {
        ScriptedModel::new("base-7b")
            .on_prompt("The capital of France is", " Paris, which is also its largest city.")
            .on_prompt("One, two, three, four,", " five, six, seven.")
            .on_prompt("The opposite of hot is", " cold, and the opposite of up is down.")
            .with_generator(|prompt, _| stop(&format!("\n\n{}", prompt)))
    }

    #[tokio::test]
    async fn test_prepare_accepts_clean_base_model() {
        let guarded = prepare(Box::new(base_model()), &GuardSettings::default())
            .await
            .unwrap();
        let report = guarded.report();
        assert!(report.token_check.identical);
        assert_eq!(report.sentinels.len(), 6);
        assert_eq!(report.completion_pass_rate, 1.0);
        assert_eq!(guarded.model_id(), "base-7b");
    }

    #[tokio::test]
    async fn test_prepare_rejects_special_token_insertion() {
        let err = prepare(
            Box::new(base_model().with_bos_insertion()),
            &GuardSettings::default(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(
            err,
            GuardError::Contamination(ContaminationError::SpecialTokenInsertion { .. })
        ));
    }

    #[tokio::test]
    async fn test_prepare_rejects_sticky_templating() {
        let err = prepare(
            Box::new(base_model().with_sticky_templating()),
            &GuardSettings::default(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(
            err,
            GuardError::Contamination(ContaminationError::TemplatingActive { .. })
        ));
    }

    #[tokio::test]
    async fn test_prepare_rejects_instruction_following() {
        let tuned = ScriptedModel::new("chat-7b")
            .on_prompt("Pig Latin", " Ellohay orldway")
            .on_prompt("The capital of France is", " Paris.")
            .with_generator(|_, _| stop(" ok"));
        let err = prepare(Box::new(tuned), &GuardSettings::default())
            .await
            .err()
            .unwrap();
        match err {
            GuardError::Contamination(ContaminationError::InstructionSentinelPassed { name, .. }) => {
                assert_eq!(name, "pig_latin")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prepare_rejects_broken_completion() {
        let broken = ScriptedModel::new("noise").with_generator(|_, _| stop(" zzz"));
        let err = prepare(Box::new(broken), &GuardSettings::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            GuardError::Contamination(ContaminationError::CompletionSentinelsFailed {
                failed: 3,
                total: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_marker_in_output_is_contamination() {
        let guarded = prepare(
            Box::new(base_model().on_prompt("Tell me", " sure<|im_end|>")),
            &GuardSettings::default(),
        )
        .await
        .unwrap();

        let err = guarded
            .generate("Tell me a story", &SamplingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GuardError::Contamination(ContaminationError::TemplateMarker {
                site: MarkerSite::Output,
                ..
            })
        ));

        let err = guarded.next_token_logprobs("[INST] hi").await.unwrap_err();
        assert!(matches!(
            err,
            GuardError::Contamination(ContaminationError::TemplateMarker {
                site: MarkerSite::Prompt,
                ..
            })
        ));
    }
}

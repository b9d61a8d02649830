use super::CompletionModel;
use crate::model::{FinishReason, Generation, NextTokenLogprobs, SamplingParams};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

type GenerateFn = Box<dyn Fn(&str, &SamplingParams) -> Generation + Send + Sync>;
type LogprobFn = Box<dyn Fn(&str) -> NextTokenLogprobs + Send + Sync>;

/// Deterministic in-process model for dry runs and tests.
///
/// Prompt rules are checked in insertion order; the first rule whose needle is
/// contained in the prompt answers. Unmatched prompts fall through to the
/// generator / logprob functions.
pub struct ScriptedModel {
    id: String,
    generate_rules: Vec<(String, Generation)>,
    generator: Option<GenerateFn>,
    logprob_rules: Vec<(String, NextTokenLogprobs)>,
    logprob_fn: Option<LogprobFn>,
    inserts_bos: bool,
    templating: bool,
    templating_sticky: bool,
    generate_calls: AtomicU64,
    logprob_calls: AtomicU64,
}

impl ScriptedModel {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            generate_rules: Vec::new(),
            generator: None,
            logprob_rules: Vec::new(),
            logprob_fn: None,
            inserts_bos: false,
            templating: true,
            templating_sticky: false,
            generate_calls: AtomicU64::new(0),
            logprob_calls: AtomicU64::new(0),
        }
    }

    pub fn on_prompt(self, needle: &str, text: &str) -> Self {
        let gen = stop(text);
        self.on_prompt_generation(needle, gen)
    }

    pub fn on_prompt_generation(mut self, needle: &str, gen: Generation) -> Self {
        self.generate_rules.push((needle.to_string(), gen));
        self
    }

    pub fn with_generator<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &SamplingParams) -> Generation + Send + Sync + 'static,
    {
        self.generator = Some(Box::new(f));
        self
    }

    pub fn on_logprobs(mut self, needle: &str, dist: NextTokenLogprobs) -> Self {
        self.logprob_rules.push((needle.to_string(), dist));
        self
    }

    pub fn with_logprob_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> NextTokenLogprobs + Send + Sync + 'static,
    {
        self.logprob_fn = Some(Box::new(f));
        self
    }

    /// Tokenizer prepends a BOS id when default special tokens are requested.
    pub fn with_bos_insertion(mut self) -> Self {
        self.inserts_bos = true;
        self
    }

    /// `disable_templating` succeeds but has no effect.
    pub fn with_sticky_templating(mut self) -> Self {
        self.templating_sticky = true;
        self
    }

    pub fn generate_calls(&self) -> u64 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn logprob_calls(&self) -> u64 {
        self.logprob_calls.load(Ordering::SeqCst)
    }
}

/// A natural-stop generation with a whitespace token count.
pub fn stop(text: &str) -> Generation {
    Generation {
        text: text.to_string(),
        completion_tokens: text.split_whitespace().count() as u32,
        finish_reason: FinishReason::Stop,
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> anyhow::Result<Generation> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, gen)) = self.generate_rules.iter().find(|(n, _)| prompt.contains(n)) {
            return Ok(gen.clone());
        }
        match &self.generator {
            Some(f) => Ok(f(prompt, params)),
            None => Ok(stop("")),
        }
    }

    async fn next_token_logprobs(&self, prompt: &str) -> anyhow::Result<NextTokenLogprobs> {
        self.logprob_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, dist)) = self.logprob_rules.iter().find(|(n, _)| prompt.contains(n)) {
            return Ok(dist.clone());
        }
        match &self.logprob_fn {
            Some(f) => Ok(f(prompt)),
            None => anyhow::bail!("scripted model has no logprobs for prompt"),
        }
    }

    async fn tokenize(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let mut ids: Vec<u32> = Vec::with_capacity(text.len() + 1);
        if add_special_tokens && self.inserts_bos {
            ids.push(1);
        }
        ids.extend(text.bytes().map(|b| b as u32 + 3));
        Ok(ids)
    }

    fn disable_templating(&mut self) -> anyhow::Result<()> {
        if !self.templating_sticky {
            self.templating = false;
        }
        Ok(())
    }

    fn templating_active(&self) -> bool {
        self.templating
    }

    fn model_id(&self) -> String {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_take_precedence_over_generator() -> anyhow::Result<()> {
        let m = ScriptedModel::new("fake")
            .on_prompt("capital of France", " Paris.")
            .with_generator(|_, _| stop("fallback"));

        let params = SamplingParams::greedy(8);
        assert_eq!(m.generate("The capital of France is", &params).await?.text, " Paris.");
        assert_eq!(m.generate("anything else", &params).await?.text, "fallback");
        assert_eq!(m.generate_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_bos_insertion_only_with_special_tokens() -> anyhow::Result<()> {
        let m = ScriptedModel::new("fake").with_bos_insertion();
        let with = m.tokenize("hi", true).await?;
        let without = m.tokenize("hi", false).await?;
        assert_eq!(with.len(), without.len() + 1);
        Ok(())
    }
}

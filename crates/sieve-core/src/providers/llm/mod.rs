use crate::model::{Generation, NextTokenLogprobs, SamplingParams};
use async_trait::async_trait;

/// Raw model access. Only `GuardedModel` may hold one of these.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> anyhow::Result<Generation>;

    async fn next_token_logprobs(&self, prompt: &str) -> anyhow::Result<NextTokenLogprobs>;

    async fn tokenize(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>>;

    /// Turn off chat templates, role markers and any other implicit formatting.
    fn disable_templating(&mut self) -> anyhow::Result<()>;

    fn templating_active(&self) -> bool;

    fn model_id(&self) -> String;
}

pub mod fake;
pub mod http;

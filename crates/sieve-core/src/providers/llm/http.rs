use super::CompletionModel;
use crate::model::{FinishReason, Generation, NextTokenLogprobs, SamplingParams};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

/// Client for an OpenAI-compatible completion server (vLLM, llama.cpp server, TGI).
///
/// Plain completions go through `/v1/completions`, which never applies a chat
/// template. The chat route only exists so a misconfigured deployment is caught by
/// the guard instead of silently wrapping prompts in role markers.
///
/// `add_special_tokens` starts at the server default (on) and is cleared by
/// `disable_templating`, after which every request carries it explicitly.
pub struct CompletionServerClient {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub top_logprobs: u32,
    pub use_chat_endpoint: bool,
    pub add_special_tokens: bool,
    pub client: reqwest::Client,
}

impl CompletionServerClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            top_logprobs: 20,
            use_chat_endpoint: false,
            add_special_tokens: true,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("completion server error {} at {}: {}", status, path, error_text);
        }

        Ok(resp.json().await?)
    }

    fn completion_body(&self, prompt: &str, params: &SamplingParams) -> serde_json::Value {
        let mut body = if self.use_chat_endpoint {
            json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
            })
        } else {
            json!({
                "model": self.model,
                "prompt": prompt,
            })
        };
        body["max_tokens"] = json!(params.max_new_tokens);
        body["temperature"] = json!(params.temperature);
        body["top_p"] = json!(params.top_p);
        body["repetition_penalty"] = json!(params.repetition_penalty);
        body["add_special_tokens"] = json!(self.add_special_tokens);
        if let Some(seed) = params.seed {
            body["seed"] = json!(seed);
        }
        body
    }

    fn logprob_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": 1,
            "temperature": 0.0,
            "logprobs": self.top_logprobs,
            "add_special_tokens": self.add_special_tokens,
        })
    }
}

#[async_trait]
impl CompletionModel for CompletionServerClient {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> anyhow::Result<Generation> {
        let body = self.completion_body(prompt, params);
        let path = if self.use_chat_endpoint {
            "/v1/chat/completions"
        } else {
            "/v1/completions"
        };
        let json = self.post(path, body).await?;

        parse_generation(&json)
    }

    async fn next_token_logprobs(&self, prompt: &str) -> anyhow::Result<NextTokenLogprobs> {
        let json = self.post("/v1/completions", self.logprob_body(prompt)).await?;

        parse_top_logprobs(&json)
    }

    async fn tokenize(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let body = json!({
            "model": self.model,
            "prompt": text,
            "add_special_tokens": add_special_tokens,
        });
        let json = self.post("/tokenize", body).await?;

        json.get("tokens")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("tokenize response missing tokens"))?
            .iter()
            .map(|t| {
                t.as_u64()
                    .map(|n| n as u32)
                    .ok_or_else(|| anyhow::anyhow!("non-integer token id in tokenize response"))
            })
            .collect()
    }

    fn disable_templating(&mut self) -> anyhow::Result<()> {
        self.use_chat_endpoint = false;
        self.add_special_tokens = false;
        Ok(())
    }

    fn templating_active(&self) -> bool {
        self.use_chat_endpoint || self.add_special_tokens
    }

    fn model_id(&self) -> String {
        format!("{}@{}", self.model, self.base_url)
    }
}

fn parse_generation(json: &serde_json::Value) -> anyhow::Result<Generation> {
    let text = json
        .pointer("/choices/0/text")
        .or_else(|| json.pointer("/choices/0/message/content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("completion response missing text"))?
        .to_string();

    let finish_reason = match json.pointer("/choices/0/finish_reason").and_then(|v| v.as_str()) {
        Some("length") => FinishReason::Length,
        _ => FinishReason::Stop,
    };

    let completion_tokens = json
        .pointer("/usage/completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    Ok(Generation {
        text,
        completion_tokens,
        finish_reason,
    })
}

fn parse_top_logprobs(json: &serde_json::Value) -> anyhow::Result<NextTokenLogprobs> {
    let top = json
        .pointer("/choices/0/logprobs/top_logprobs/0")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow::anyhow!("completion response missing top_logprobs"))?;

    let mut dist = NextTokenLogprobs::default();
    for (token, lp) in top {
        let lp = lp
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("non-numeric logprob for token {:?}", token))?;
        dist.0.insert(token.clone(), lp);
    }
    Ok(dist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let body = json!({
            "choices": [{ "text": " Paris.", "finish_reason": "length" }],
            "usage": { "completion_tokens": 3 }
        });
        let gen = parse_generation(&body).unwrap();
        assert_eq!(gen.text, " Paris.");
        assert_eq!(gen.finish_reason, FinishReason::Length);
        assert_eq!(gen.completion_tokens, 3);
    }

    #[test]
    fn test_parse_top_logprobs() {
        let body = json!({
            "choices": [{ "logprobs": { "top_logprobs": [{ " good": -0.1, " bad": -2.5 }] } }]
        });
        let dist = parse_top_logprobs(&body).unwrap();
        assert_eq!(dist.get(" good"), Some(-0.1));
        assert_eq!(dist.min(), Some(-2.5));

        assert!(parse_top_logprobs(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_disable_templating_leaves_chat_route() {
        let mut c = CompletionServerClient::new("http://localhost:8000/".into(), "base".into(), None);
        c.use_chat_endpoint = true;
        assert!(c.templating_active());
        c.disable_templating().unwrap();
        assert!(!c.templating_active());
        assert_eq!(c.model_id(), "base@http://localhost:8000");
    }

    #[test]
    fn test_requests_carry_special_token_flag() {
        let mut c = CompletionServerClient::new("http://localhost:8000".into(), "base".into(), None);
        assert!(c.templating_active());
        let params = SamplingParams {
            seed: Some(9),
            ..SamplingParams::default()
        };
        assert_eq!(c.completion_body("1.", &params)["add_special_tokens"], json!(true));

        c.disable_templating().unwrap();
        let body = c.completion_body("1.", &params);
        assert_eq!(body["add_special_tokens"], json!(false));
        assert_eq!(body["prompt"], json!("1."));
        assert_eq!(body["seed"], json!(9));
        assert!(body.get("messages").is_none());

        let body = c.logprob_body("Label:");
        assert_eq!(body["add_special_tokens"], json!(false));
        assert_eq!(body["max_tokens"], json!(1));
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SentinelExpectation {
    /// A base model should not manage this; success means formatting leaked in.
    Fails,
    /// Plain continuation a working base model handles.
    Handles,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sentinel {
    pub name: String,
    pub prompt: String,
    pub expect: SentinelExpectation,
    /// Regex that, when it matches the output, counts as the model succeeding.
    pub success_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentinelOutcome {
    pub name: String,
    pub expect: SentinelExpectation,
    pub succeeded: bool,
    pub output: String,
}

impl SentinelOutcome {
    pub fn unexpected(&self) -> bool {
        match self.expect {
            SentinelExpectation::Fails => self.succeeded,
            SentinelExpectation::Handles => !self.succeeded,
        }
    }
}

fn sentinel(name: &str, prompt: &str, expect: SentinelExpectation, pattern: &str) -> Sentinel {
    Sentinel {
        name: name.into(),
        prompt: prompt.into(),
        expect,
        success_pattern: pattern.into(),
    }
}

pub fn default_battery() -> Vec<Sentinel> {
    use SentinelExpectation::*;
    vec![
        sentinel(
            "pig_latin",
            "Translate the following sentence into Pig Latin: hello world",
            Fails,
            r"(?i)ellohay\W+orldway",
        ),
        sentinel(
            "exact_word_reply",
            "Reply with only the word BANANA in capital letters and nothing else.",
            Fails,
            r"^\s*BANANA\W*$",
        ),
        sentinel(
            "reverse_word",
            "Spell the word 'stressed' backwards. Output only the reversed word.",
            Fails,
            r"^\s*(?i:desserts)\W*$",
        ),
        sentinel("capital", "The capital of France is", Handles, r"(?i)paris"),
        sentinel("counting", "One, two, three, four,", Handles, r"(?i)five|\b5\b"),
        sentinel("antonym", "The opposite of hot is", Handles, r"(?i)cold"),
    ]
}

pub fn default_template_markers() -> Vec<String> {
    [
        "<|im_start|>",
        "<|im_end|>",
        "[INST]",
        "[/INST]",
        "<|start_header_id|>",
        "<|eot_id|>",
        "<start_of_turn>",
        "<end_of_turn>",
        "<|assistant|>",
        "<|user|>",
        "<|system|>",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

//! Model-free prompt construction and parsing.
//!
//! The response template `Instruction: {instruction}\nResponse:` is a corpus
//! format contract: downstream fine-tuning consumes records in exactly this shape.

pub mod clean;

use crate::errors::ConfigError;
use crate::fingerprint::prompt_id;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const RESPONSE_PREFIX: &str = "Instruction: ";
pub const RESPONSE_SUFFIX: &str = "\nResponse:";
pub const LABEL_CUE: &str = "Label:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptSettings {
    pub few_shot_pool: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub few_shot_file: Option<String>,
    pub min_examples: usize,
    pub max_examples: usize,
    pub list_header: String,
    pub instruction_rubric: Rubric,
    pub pair_rubric: Rubric,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            few_shot_pool: default_pool(),
            few_shot_file: None,
            min_examples: 3,
            max_examples: 5,
            list_header: "Below is a list of diverse, self-contained tasks that someone might ask a knowledgeable assistant to do.".into(),
            instruction_rubric: Rubric::instruction_quality(),
            pair_rubric: Rubric::pair_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rubric {
    pub id: String,
    pub version: String,
    pub text: String,
    #[serde(default = "default_positive")]
    pub positive_label: String,
    #[serde(default = "default_negative")]
    pub negative_label: String,
}

fn default_positive() -> String {
    "good".into()
}

fn default_negative() -> String {
    "bad".into()
}

impl Rubric {
    /// Clear, specific, achievable, safe.
    pub fn instruction_quality() -> Self {
        Self {
            id: "instruction_quality".into(),
            version: "v1".into(),
            text: INSTRUCTION_RUBRIC.into(),
            positive_label: default_positive(),
            negative_label: default_negative(),
        }
    }

    /// The response correctly and safely fulfills the instruction.
    pub fn pair_quality() -> Self {
        Self {
            id: "pair_quality".into(),
            version: "v1".into(),
            text: PAIR_RUBRIC.into(),
            positive_label: default_positive(),
            negative_label: default_negative(),
        }
    }
}

const INSTRUCTION_RUBRIC: &str = "Each instruction below is labeled good if it is clear, specific, achievable by a text-only assistant, and safe. Otherwise it is labeled bad.

Instruction: Write a haiku about autumn leaves falling in a city park.
Label: good

Instruction: Do the thing we talked about before.
Label: bad

Instruction: Explain in three sentences how a bicycle gear system works.
Label: good

Instruction: Book me a flight to Tokyo for tomorrow morning.
Label: bad

Instruction: List four common causes of a car battery draining overnight.
Label: good

Instruction: Tell me how to get into my neighbor's house without a key.
Label: bad
";

const PAIR_RUBRIC: &str = "Each instruction and response below is labeled good if the response correctly, completely, and safely fulfills the instruction. Otherwise it is labeled bad.

Instruction: What is the boiling point of water at sea level in Celsius?
Response: Water boils at 100 degrees Celsius at sea level.
Label: good

Instruction: Name three primary colors.
Response: The three primary colors are:
Label: bad

Instruction: Translate 'good morning' into Spanish.
Response: Buenos días.
Label: good

Instruction: Write a short poem about the ocean.
Response: The ocean is a large body of salt water.
Label: bad
";

fn default_pool() -> Vec<String> {
    [
        "Write a short story about a lighthouse keeper who finds a message in a bottle.",
        "Explain the difference between weather and climate to a ten-year-old.",
        "List five tips for improving sleep quality.",
        "Summarize the main causes of the French Revolution in one paragraph.",
        "Write a polite email declining a meeting invitation.",
        "Give three examples of renewable energy sources and one advantage of each.",
        "Convert 72 degrees Fahrenheit to Celsius and show the calculation.",
        "Suggest a name for a bakery that specializes in sourdough bread.",
        "Describe how to make a simple vinaigrette dressing.",
        "Write a Python function that returns the factorial of a number.",
        "Explain what a black hole is in two sentences.",
        "Create a packing list for a three-day hiking trip.",
        "Rewrite the sentence 'The meeting was canceled by the manager' in active voice.",
        "Compare the advantages of trains and airplanes for travel within Europe.",
        "Write a limerick about a forgetful cat.",
        "Outline the steps to change a flat bicycle tire.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The few-shot example pool. Read-only once built.
#[derive(Debug, Clone)]
pub struct FewShotPool {
    examples: Vec<String>,
    min_examples: usize,
    max_examples: usize,
    header: String,
}

impl FewShotPool {
    pub fn new(
        examples: Vec<String>,
        min_examples: usize,
        max_examples: usize,
        header: &str,
    ) -> Result<Self, ConfigError> {
        let mut seen = std::collections::HashSet::new();
        let examples: Vec<String> = examples
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty() && seen.insert(e.clone()))
            .collect();

        if min_examples == 0 || min_examples > max_examples {
            return Err(ConfigError(format!(
                "invalid few-shot range {}..={}",
                min_examples, max_examples
            )));
        }
        if examples.len() < max_examples {
            return Err(ConfigError(format!(
                "few-shot pool has {} distinct examples, need at least {}",
                examples.len(),
                max_examples
            )));
        }

        Ok(Self {
            examples,
            min_examples,
            max_examples,
            header: header.trim().to_string(),
        })
    }

    pub fn from_settings(settings: &PromptSettings) -> Result<Self, ConfigError> {
        let mut examples = settings.few_shot_pool.clone();
        if let Some(path) = &settings.few_shot_file {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                ConfigError(format!("failed to read few-shot file {}: {}", path, e))
            })?;
            examples.extend(raw.lines().map(str::to_string));
        }
        Self::new(
            examples,
            settings.min_examples,
            settings.max_examples,
            &settings.list_header,
        )
    }

    pub fn examples(&self) -> &[String] {
        &self.examples
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionPrompt {
    pub text: String,
    pub prompt_id: String,
    /// Number the model is expected to continue, e.g. `4` for a prompt ending in `4.`.
    pub next_index: usize,
}

impl InstructionPrompt {
    /// Re-attaches the dangling list number so the first continued item parses.
    pub fn continuation_list(&self, raw: &str) -> String {
        let sep = if raw.starts_with(char::is_whitespace) { "" } else { " " };
        format!("{}.{}{}", self.next_index, sep, raw)
    }
}

/// Numbered list of 3-5 sampled examples that stops mid-list.
pub fn build_instruction_prompt<R: Rng>(pool: &FewShotPool, rng: &mut R) -> InstructionPrompt {
    let k = rng.gen_range(pool.min_examples..=pool.max_examples);
    let sampled: Vec<&String> = pool.examples.choose_multiple(rng, k).collect();

    let mut text = String::new();
    if !pool.header.is_empty() {
        text.push_str(&pool.header);
        text.push_str("\n\n");
    }
    for (i, ex) in sampled.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, ex));
    }
    let next_index = sampled.len() + 1;
    text.push_str(&format!("{}.", next_index));

    InstructionPrompt {
        prompt_id: prompt_id(&text),
        text,
        next_index,
    }
}

pub fn build_response_prompt(instruction: &str) -> String {
    format!("{}{}{}", RESPONSE_PREFIX, instruction, RESPONSE_SUFFIX)
}

pub fn instruction_item(instruction: &str) -> String {
    format!("Instruction: {}", instruction.trim())
}

pub fn pair_item(instruction: &str, response: &str) -> String {
    format!("Instruction: {}\nResponse: {}", instruction.trim(), response.trim())
}

/// Rubric, then the item, ending in `Label:` so the next token is the decision.
pub fn build_critic_prompt(item: &str, rubric: &Rubric) -> String {
    format!("{}\n\n{}\n{}", rubric.text.trim_end(), item.trim(), LABEL_CUE)
}

/// Splits a numbered-list continuation into instructions.
///
/// Lines that are not `N.`/`N)` items, or whose item text is empty, are dropped.
/// The marker must be followed by whitespace, so `3.5 kg` is prose, not item 3.
pub fn parse_instructions(raw: &str) -> Vec<String> {
    raw.lines().filter_map(parse_list_item).collect()
}

fn parse_list_item(line: &str) -> Option<String> {
    let line = line.trim_start();
    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let item = rest.trim();
    if item.is_empty() {
        None
    } else {
        Some(item.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn pool() -> FewShotPool {
        FewShotPool::from_settings(&PromptSettings::default()).unwrap()
    }

    #[test]
    fn test_instruction_prompt_ends_mid_list() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let p = build_instruction_prompt(&pool(), &mut rng);
            let items = parse_instructions(&p.text);
            assert!((3..=5).contains(&items.len()), "got {}", items.len());
            assert_eq!(p.next_index, items.len() + 1);
            assert!(p.text.ends_with(&format!("\n{}.", p.next_index)));
        }
    }

    #[test]
    fn test_instruction_prompt_is_seed_deterministic() {
        let a = build_instruction_prompt(&pool(), &mut ChaCha8Rng::seed_from_u64(11));
        let b = build_instruction_prompt(&pool(), &mut ChaCha8Rng::seed_from_u64(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_response_prompt_literal_form() {
        assert_eq!(
            build_response_prompt("Name a prime number."),
            "Instruction: Name a prime number.\nResponse:"
        );
    }

    #[test]
    fn test_critic_prompt_ends_with_label_cue() {
        let r = Rubric::instruction_quality();
        let p = build_critic_prompt(&instruction_item("Name a prime number."), &r);
        assert!(p.starts_with(r.text.trim_end()));
        assert!(p.ends_with("Instruction: Name a prime number.\nLabel:"));
    }

    #[test]
    fn test_parse_instructions_discards_noise() {
        let p = InstructionPrompt {
            text: String::new(),
            prompt_id: String::new(),
            next_index: 4,
        };
        let raw = " Describe a rainbow.\n5. Write a haiku about rain.\n\nSome trailing prose\n6.   \n3.5 kg of flour is needed for that.\n7) List three fruits.\n12.x\n- bullet";
        let items = parse_instructions(&p.continuation_list(raw));
        assert_eq!(
            items,
            vec![
                "Describe a rainbow.".to_string(),
                "Write a haiku about rain.".to_string(),
                "List three fruits.".to_string()
            ]
        );
    }

    #[test]
    fn test_continuation_without_leading_space_keeps_first_item() {
        let p = InstructionPrompt {
            text: String::new(),
            prompt_id: String::new(),
            next_index: 6,
        };
        assert_eq!(p.continuation_list("Bake bread."), "6. Bake bread.");
        assert_eq!(parse_instructions(&p.continuation_list("Bake bread.")), vec!["Bake bread.".to_string()]);
        assert!(parse_instructions("4. Bake a loaf of bread.\n3.5 kg of flour is needed for that.").len() == 1);
    }

    #[test]
    fn test_pool_requires_enough_distinct_examples() {
        let err = FewShotPool::new(vec!["a".into(), "a".into(), "b".into()], 3, 5, "").unwrap_err();
        assert!(err.0.contains("2 distinct examples"));
    }
}

use crate::errors::ConfigError;
use crate::model::FinishReason;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which rule ended the response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CleanPath {
    /// Truncated at the end marker.
    Marker,
    /// Truncated at a new-turn pattern.
    Heuristic,
    /// Nothing to truncate, but generation stopped at the token cap.
    TokenLimit,
    /// Nothing to truncate and the model stopped on its own.
    EndOfText,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleaningSettings {
    pub end_marker: String,
    pub heuristics: bool,
    pub turn_patterns: Vec<TurnPatternSpec>,
}

impl Default for CleaningSettings {
    fn default() -> Self {
        Self {
            end_marker: "###".into(),
            heuristics: true,
            turn_patterns: default_turn_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnPatternSpec {
    pub name: String,
    pub pattern: String,
}

/// Ordered new-turn patterns. Deployment-tuned; keep the list in config.
pub fn default_turn_patterns() -> Vec<TurnPatternSpec> {
    vec![
        TurnPatternSpec {
            name: "blank_line_turn".into(),
            pattern: r"\n[ \t]*\n[ \t]*(?:#+[ \t]*)?(?:Instruction|Input|Question|Q|User|Human)[ \t]*:"
                .into(),
        },
        TurnPatternSpec {
            name: "line_turn".into(),
            pattern: r"(?m)^[ \t]*(?:#+[ \t]*)?(?:Instruction|Response|Question|Q|User|Human|Assistant)[ \t]*:"
                .into(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMatch {
    pub pattern: String,
    pub start: usize,
}

#[derive(Debug, Clone)]
pub struct TurnPatterns {
    patterns: Vec<(String, Regex)>,
}

impl TurnPatterns {
    pub fn compile(specs: &[TurnPatternSpec]) -> Result<Self, ConfigError> {
        let mut patterns = Vec::with_capacity(specs.len());
        for spec in specs {
            let re = Regex::new(&spec.pattern).map_err(|e| {
                ConfigError(format!(
                    "invalid turn pattern '{}' ({}): {}",
                    spec.name, spec.pattern, e
                ))
            })?;
            patterns.push((spec.name.clone(), re));
        }
        Ok(Self { patterns })
    }

    /// Earliest match over all patterns; on equal offsets the earlier pattern wins.
    pub fn earliest_match(&self, text: &str) -> Option<TurnMatch> {
        let mut best: Option<TurnMatch> = None;
        for (name, re) in &self.patterns {
            if let Some(m) = re.find(text) {
                if best.as_ref().map_or(true, |b| m.start() < b.start) {
                    best = Some(TurnMatch {
                        pattern: name.clone(),
                        start: m.start(),
                    });
                }
            }
        }
        best
    }

    /// A response that still looks like it runs into a new turn.
    pub fn is_runaway(&self, text: &str) -> bool {
        self.patterns.iter().any(|(_, re)| re.is_match(text))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedResponse {
    pub text: String,
    pub path: CleanPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
}

impl CleanedResponse {
    pub fn truncated_by_delimiter(&self) -> bool {
        self.path == CleanPath::Marker
    }
}

#[derive(Debug, Clone)]
pub struct ResponseCleaner {
    end_marker: String,
    heuristics: bool,
    patterns: TurnPatterns,
}

impl ResponseCleaner {
    pub fn from_settings(settings: &CleaningSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            end_marker: settings.end_marker.clone(),
            heuristics: settings.heuristics,
            patterns: TurnPatterns::compile(&settings.turn_patterns)?,
        })
    }

    pub fn end_marker(&self) -> &str {
        &self.end_marker
    }

    pub fn patterns(&self) -> &TurnPatterns {
        &self.patterns
    }

    /// Marker first, then new-turn heuristics, then the token-limit flag.
    pub fn clean(&self, raw: &str, finish: FinishReason) -> CleanedResponse {
        if !self.end_marker.is_empty() {
            if let Some(idx) = raw.find(&self.end_marker) {
                return CleanedResponse {
                    text: raw[..idx].trim().to_string(),
                    path: CleanPath::Marker,
                    matched_pattern: None,
                };
            }
        }

        if self.heuristics {
            if let Some(m) = self.patterns.earliest_match(raw) {
                return CleanedResponse {
                    text: raw[..m.start].trim().to_string(),
                    path: CleanPath::Heuristic,
                    matched_pattern: Some(m.pattern),
                };
            }
        }

        let path = match finish {
            FinishReason::Length => CleanPath::TokenLimit,
            FinishReason::Stop => CleanPath::EndOfText,
        };
        CleanedResponse {
            text: raw.trim().to_string(),
            path,
            matched_pattern: None,
        }
    }
}

/// Truncation shapes a single-token critic cannot see: a trailing colon or a
/// bare boolean answer.
pub fn is_incomplete(response: &str) -> bool {
    let t = response.trim();
    if t.is_empty() || t.ends_with(':') {
        return true;
    }
    let bare = t.trim_end_matches(['.', '!']).to_ascii_lowercase();
    matches!(bare.as_str(), "true" | "false" | "yes" | "no")
}

use crate::critic::CriticSettings;
use crate::engine::GenerationSettings;
use crate::errors::ConfigError;
use crate::guard::GuardSettings;
use crate::prompts::clean::{CleaningSettings, TurnPatterns};
use crate::prompts::PromptSettings;
use crate::qc::QcThresholds;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SieveConfig {
    #[serde(rename = "configVersion", alias = "version")]
    pub version: u32,
    pub log_level: String,
    pub guard: GuardSettings,
    pub prompts: PromptSettings,
    pub critic: CriticSettings,
    pub generation: GenerationSettings,
    pub cleaning: CleaningSettings,
    pub qc: QcThresholds,
    pub eval: EvalSettings,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            log_level: "info".into(),
            guard: GuardSettings::default(),
            prompts: PromptSettings::default(),
            critic: CriticSettings::default(),
            generation: GenerationSettings::default(),
            cleaning: CleaningSettings::default(),
            qc: QcThresholds::default(),
            eval: EvalSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvalSettings {
    pub confidence: f64,
    /// Benjamini-Hochberg false discovery rate across categories.
    pub fdr: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapSettings>,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            fdr: 0.10,
            bootstrap: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapSettings {
    pub resamples: usize,
    pub seed: u64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            resamples: 2000,
            seed: 0,
        }
    }
}

impl SieveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SUPPORTED_CONFIG_VERSION {
            return Err(ConfigError(format!(
                "unsupported config version {} (supported: {})",
                self.version, SUPPORTED_CONFIG_VERSION
            )));
        }

        let g = &self.generation;
        if !(1.5..=2.0).contains(&g.oversample) {
            return Err(ConfigError(format!(
                "generation.oversample must be within [1.5, 2.0], got {}",
                g.oversample
            )));
        }
        if g.max_generation_calls == 0 || g.max_consecutive_failures == 0 {
            return Err(ConfigError(
                "generation.max_generation_calls and generation.max_consecutive_failures must be positive".into(),
            ));
        }
        if g.response_sampling.max_new_tokens == 0 || g.instruction_sampling.max_new_tokens == 0 {
            return Err(ConfigError("max_new_tokens must be positive".into()));
        }

        if self.critic.margin_threshold.is_nan() || self.critic.margin_threshold < 0.0 {
            return Err(ConfigError(format!(
                "critic.margin_threshold must be non-negative, got {}",
                self.critic.margin_threshold
            )));
        }

        let p = &self.prompts;
        if p.min_examples == 0 || p.min_examples > p.max_examples {
            return Err(ConfigError(format!(
                "prompts: need 0 < min_examples <= max_examples, got {}..{}",
                p.min_examples, p.max_examples
            )));
        }

        let q = &self.qc;
        unit_interval("qc.max_runaway_rate", q.max_runaway_rate)?;
        unit_interval("qc.max_token_limit_hit_rate", q.max_token_limit_hit_rate)?;
        unit_interval("qc.token_limit_proximity", q.token_limit_proximity)?;
        unit_interval("qc.min_instruction_acceptance", q.min_instruction_acceptance)?;
        unit_interval("qc.min_pair_acceptance", q.min_pair_acceptance)?;
        unit_interval("qc.duplication_warn_rate", q.duplication_warn_rate)?;
        if let Some(r) = q.max_incomplete_rate {
            unit_interval("qc.max_incomplete_rate", r)?;
        }
        unit_interval("guard.min_completion_pass_rate", self.guard.min_completion_pass_rate)?;

        if !(self.eval.confidence > 0.0 && self.eval.confidence < 1.0) {
            return Err(ConfigError(format!(
                "eval.confidence must be within (0, 1), got {}",
                self.eval.confidence
            )));
        }
        unit_interval("eval.fdr", self.eval.fdr)?;
        if matches!(&self.eval.bootstrap, Some(b) if b.resamples == 0) {
            return Err(ConfigError("eval.bootstrap.resamples must be positive".into()));
        }

        if self.cleaning.end_marker.is_empty() {
            return Err(ConfigError("cleaning.end_marker must not be empty".into()));
        }
        TurnPatterns::compile(&self.cleaning.turn_patterns)?;
        for s in &self.guard.sentinels {
            regex::Regex::new(&s.success_pattern).map_err(|e| {
                ConfigError(format!("guard sentinel '{}': invalid pattern: {}", s.name, e))
            })?;
        }
        Ok(())
    }
}

fn unit_interval(key: &str, v: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(ConfigError(format!("{} must be within [0, 1], got {}", key, v)))
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<SieveConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;

    let value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let mut ignored_keys = std::collections::BTreeSet::new();
    // An empty document means all defaults.
    let mut cfg: SieveConfig = if value.is_null() {
        SieveConfig::default()
    } else {
        serde_ignored::deserialize(value, |path| {
            ignored_keys.insert(path.to_string());
        })
        .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?
    };

    let unknown: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.split('.').any(|seg| seg.starts_with('_') || seg.starts_with("x-")))
        .collect();
    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields detected in strict mode: {:?} (file: {})",
                unknown,
                path.display()
            )));
        }
        tracing::warn!(
            event = "sieve.config.unknown_fields",
            fields = ?unknown,
            file = %path.display(),
            "ignored unknown config fields"
        );
    }

    normalize_paths(&mut cfg, path);
    cfg.validate()?;
    Ok(cfg)
}

/// File settings are relative to the config file, not the working directory.
fn normalize_paths(cfg: &mut SieveConfig, config_path: &Path) {
    let base = config_path.parent().unwrap_or(Path::new("."));
    for slot in [&mut cfg.prompts.few_shot_file, &mut cfg.critic.cache_path] {
        if let Some(p) = slot.as_mut() {
            if let Some(resolved) = resolve_relative(base, p) {
                *p = resolved;
            }
        }
    }
}

/// `None` when the value is left as written: blank, absolute, or SQLite's `:memory:`.
fn resolve_relative(base: &Path, value: &str) -> Option<String> {
    let rel = Path::new(value);
    if value.trim().is_empty() || value == ":memory:" || rel.is_absolute() {
        return None;
    }
    let joined = base.join(rel).components().fold(PathBuf::new(), |mut acc, c| {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                acc.pop();
            }
            other => acc.push(other),
        }
        acc
    });
    Some(joined.to_string_lossy().into_owned())
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, include_str!("../../../sieve.yaml"))
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

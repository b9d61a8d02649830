use std::fmt;
use thiserror::Error;

/// Where a chat-template marker was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSite {
    Prompt,
    Output,
}

impl fmt::Display for MarkerSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerSite::Prompt => f.write_str("prompt"),
            MarkerSite::Output => f.write_str("output"),
        }
    }
}

/// Evidence that the model is not running in pure completion mode.
///
/// Any of these invalidates every record produced in the current process.
#[derive(Debug, Error)]
pub enum ContaminationError {
    #[error("templating is still active on model '{model_id}' after disable request")]
    TemplatingActive { model_id: String },

    #[error(
        "special-token insertion detected: sentinel tokenizes to {with_special} tokens with defaults vs {without_special} raw"
    )]
    SpecialTokenInsertion {
        with_special: usize,
        without_special: usize,
    },

    #[error("failure sentinel '{name}' unexpectedly succeeded (output: {output:?}); instruction formatting is leaking")]
    InstructionSentinelPassed { name: String, output: String },

    #[error("{failed} of {total} completion sentinels failed; model does not behave as a base model")]
    CompletionSentinelsFailed { failed: usize, total: usize },

    #[error("chat-template marker {marker:?} found in model {site}")]
    TemplateMarker { marker: String, site: MarkerSite },
}

/// Phase 1 could not produce fresh candidates within the consecutive-failure budget.
#[derive(Debug, Error)]
#[error(
    "shard {shard_index} stalled: {consecutive_failures} consecutive generation calls produced no new instructions (budget {budget}, {candidates} candidates after {generation_calls} calls)"
)]
pub struct GenerationStallError {
    pub shard_index: u32,
    pub consecutive_failures: u32,
    pub budget: u32,
    pub candidates: usize,
    pub generation_calls: u32,
}

/// Errors surfaced by `GuardedModel`.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Contamination(#[from] ContaminationError),
    #[error("model call failed: {0:#}")]
    Model(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("contamination: {0}")]
    Contamination(#[from] ContaminationError),
    #[error(transparent)]
    Stall(#[from] GenerationStallError),
    #[error("model call failed: {0:#}")]
    Model(anyhow::Error),
}

impl PipelineError {
    /// Contamination aborts the run; everything else aborts only the shard.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, PipelineError::Contamination(_))
    }
}

impl From<GuardError> for PipelineError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Contamination(c) => PipelineError::Contamination(c),
            GuardError::Model(m) => PipelineError::Model(m),
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Schema violations found when a record crosses the persistence boundary.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("record field '{0}' is empty")]
    EmptyField(&'static str),
    #[error("{0} critique is not an accepted verdict (label=good and confident required)")]
    NotAccepted(&'static str),
    #[error("provenance dedup_key does not match instruction text")]
    DedupKeyMismatch,
}

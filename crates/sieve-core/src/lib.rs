pub mod config;
pub mod critic;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod guard;
pub mod logging;
pub mod merge;
pub mod model;
pub mod prompts;
pub mod providers;
pub mod qc;
pub mod report;
pub mod storage;

pub use errors::{ContaminationError, GenerationStallError, GuardError, PipelineError};
pub use guard::{prepare, GuardedModel};
pub use merge::ShardMerger;
pub use qc::{QcSummary, QualityController};

//! Paired significance testing between two model variants decoded
//! deterministically on the same items.

pub mod bootstrap;
pub mod correction;
pub mod effect;
pub mod errors;
pub mod evaluator;
pub mod interval;
pub mod io;
pub mod mcnemar;
pub mod pairing;
pub mod report;

pub use errors::EvalError;
pub use evaluator::{CategoryReport, EvaluationReport, EvaluationResult, Evaluator};
pub use pairing::{pair_by_id, ItemOutcome, PairedItem, Pairing};

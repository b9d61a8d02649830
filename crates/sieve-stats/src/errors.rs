use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("length mismatch: {ids} item ids, {a} outcomes for A, {b} outcomes for B")]
    LengthMismatch { ids: usize, a: usize, b: usize },
    #[error("duplicate item id '{id}' in {side}")]
    DuplicateId { id: String, side: &'static str },
    #[error("confidence must be within (0, 1), got {0}")]
    InvalidConfidence(f64),
}

use crate::errors::EvalError;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erf_inv;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

/// Two-sided standard normal quantile for `confidence`.
pub fn z_for(confidence: f64) -> Result<f64, EvalError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(EvalError::InvalidConfidence(confidence));
    }
    Ok(std::f64::consts::SQRT_2 * erf_inv(confidence))
}

/// Wilson score interval for `successes` out of `n`.
pub fn wilson(successes: u64, n: u64, confidence: f64) -> Result<Interval, EvalError> {
    let z = z_for(confidence)?;
    if n == 0 {
        return Ok(Interval {
            lower: 0.0,
            upper: 1.0,
        });
    }
    let n = n as f64;
    let p = successes as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let half = z / denom * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();
    Ok(Interval {
        lower: (center - half).max(0.0),
        upper: (center + half).min(1.0),
    })
}

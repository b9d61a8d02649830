use crate::interval::Interval;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Percentile bootstrap CI on `rate_b - rate_a`, resampling item pairs with
/// replacement so the pairing is preserved. Same seed, same interval.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn paired_difference_ci(
    pairs: &[(bool, bool)],
    resamples: usize,
    confidence: f64,
    seed: u64,
) -> Interval {
    let n = pairs.len();
    if n == 0 || resamples == 0 {
        return Interval {
            lower: 0.0,
            upper: 0.0,
        };
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut diffs = Vec::with_capacity(resamples);
    for _ in 0..resamples {
        let mut delta: i64 = 0;
        for _ in 0..n {
            let (a, b) = pairs[rng.next_u64() as usize % n];
            delta += b as i64 - a as i64;
        }
        diffs.push(delta as f64 / n as f64);
    }
    diffs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let alpha = 1.0 - confidence;
    let lower_idx = (resamples as f64 * (alpha / 2.0)).floor() as usize;
    let upper_idx = (resamples as f64 * (1.0 - alpha / 2.0)).ceil() as usize;
    Interval {
        lower: diffs[lower_idx.min(resamples - 1)],
        upper: diffs[upper_idx.min(resamples - 1)],
    }
}

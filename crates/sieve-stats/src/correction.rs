/// Benjamini-Hochberg adjusted p-values, returned in input order.
///
/// Adjusted values are monotone in the raw p-values and capped at 1.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| {
        p_values[i]
            .partial_cmp(&p_values[j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut adjusted = vec![1.0; m];
    let mut running_min = 1.0f64;
    for (rank, &idx) in order.iter().enumerate().rev() {
        let q = p_values[idx] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(q);
        adjusted[idx] = running_min.min(1.0);
    }
    adjusted
}

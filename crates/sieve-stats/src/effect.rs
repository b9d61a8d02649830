/// Cohen's h between two proportions, signed so that B > A is positive.
pub fn cohens_h(p_a: f64, p_b: f64) -> f64 {
    phi(p_b) - phi(p_a)
}

fn phi(p: f64) -> f64 {
    2.0 * p.clamp(0.0, 1.0).sqrt().asin()
}

/// Conventional small/medium/large bands on |h|.
pub fn magnitude(h: f64) -> &'static str {
    let h = h.abs();
    if h < 0.2 {
        "negligible"
    } else if h < 0.5 {
        "small"
    } else if h < 0.8 {
        "medium"
    } else {
        "large"
    }
}

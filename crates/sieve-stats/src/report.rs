use crate::evaluator::{EvaluationReport, EvaluationResult};
use std::fmt::Write;

fn line(s: &mut String, label: &str, r: &EvaluationResult) {
    let _ = writeln!(
        s,
        "{}: n={} A={:.3} [{:.3}, {:.3}] B={:.3} [{:.3}, {:.3}] diff={:+.3} h={:+.3} ({}) chi2={:.3} p={:.4}{}",
        label,
        r.n_items,
        r.rate_a,
        r.ci_a.lower,
        r.ci_a.upper,
        r.rate_b,
        r.ci_b.lower,
        r.ci_b.upper,
        r.rate_difference,
        r.cohens_h,
        r.effect_magnitude,
        r.mcnemar.chi_square,
        r.mcnemar.p_value,
        if r.inconclusive { " inconclusive" } else { "" },
    );
}

pub fn render_evaluation_report(report: &EvaluationReport) -> String {
    let mut s = String::new();
    line(&mut s, "overall", &report.overall);
    if let Some(ci) = &report.overall.bootstrap_ci {
        let _ = writeln!(s, "overall: bootstrap diff CI [{:+.3}, {:+.3}]", ci.lower, ci.upper);
    }
    for c in &report.categories {
        line(&mut s, &c.category, &c.result);
        let _ = writeln!(
            s,
            "  adjusted p={:.4} (fdr {}) {}",
            c.adjusted_p_value,
            report.fdr,
            if c.significant_after_bh {
                "significant"
            } else {
                "not significant"
            }
        );
    }
    if report.unmatched_a + report.unmatched_b > 0 {
        let _ = writeln!(
            s,
            "WARN: excluded unmatched items A={} B={}",
            report.unmatched_a, report.unmatched_b
        );
    }
    s
}

pub fn print_evaluation_report(report: &EvaluationReport) {
    eprint!("{}", render_evaluation_report(report));
}

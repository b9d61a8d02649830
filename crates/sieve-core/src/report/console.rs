use crate::guard::GuardReport;
use crate::merge::MergeManifest;
use crate::qc::{pct, QcSummary};
use std::fmt::Write;

pub fn render_qc_summary(qc: &QcSummary) -> String {
    let mut s = String::new();
    let _ = writeln!(
        s,
        "QC: records={} runaway={} ({}%) leakage={} token_limit={} ({}%) incomplete={}",
        qc.record_count,
        qc.runaway_count,
        pct(qc.runaway_rate),
        qc.delimiter_leakage,
        qc.token_limit_hits,
        pct(qc.token_limit_hit_rate),
        qc.incomplete_count,
    );
    let _ = writeln!(
        s,
        "QC: tokens median={} p90={} p99={} cap={}",
        qc.median_tokens, qc.p90_tokens, qc.p99_tokens, qc.generation_cap
    );
    let _ = writeln!(
        s,
        "QC: acceptance instruction={}% pair={}% low_confidence instruction={} pair={}",
        pct(qc.instruction_acceptance_rate),
        pct(qc.pair_acceptance_rate),
        qc.instruction_low_confidence,
        qc.pair_low_confidence,
    );
    for reason in &qc.failed_reasons {
        let _ = writeln!(s, "FAIL [qc]: {}", reason);
    }
    let _ = writeln!(
        s,
        "QC gate: {}",
        if qc.thresholds_passed { "pass" } else { "fail" }
    );
    s
}

pub fn print_qc_summary(qc: &QcSummary) {
    eprint!("{}", render_qc_summary(qc));
}

pub fn render_merge_manifest(m: &MergeManifest) -> String {
    let mut s = String::new();
    let _ = writeln!(
        s,
        "Merge: shards={} pre_dedup={} post_dedup={} duplicates={} ({}%)",
        m.shards.len(),
        m.pre_dedup_count,
        m.post_dedup_count,
        m.duplication_count,
        pct(m.duplication_rate),
    );
    for note in &m.notes {
        let _ = writeln!(s, "WARN [merge]: {}", note);
    }
    s.push_str(&render_qc_summary(&m.qc));
    s
}

pub fn print_merge_manifest(m: &MergeManifest) {
    eprint!("{}", render_merge_manifest(m));
}

pub fn print_guard_report(r: &GuardReport) {
    eprintln!(
        "Guard [{}]: token check {}={} special / {} plain, completion pass rate {}%",
        r.model_id,
        r.token_check.sentinel,
        r.token_check.with_special,
        r.token_check.without_special,
        pct(r.completion_pass_rate)
    );
    for o in &r.sentinels {
        eprintln!(
            "  {} [{}]: {}",
            if o.unexpected() { "WARN" } else { "ok" },
            o.name,
            o.output.trim()
        );
    }
}

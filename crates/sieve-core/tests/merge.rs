mod common;

use common::{clean_funnel, record};
use sieve_core::engine::pipeline::ShardOutput;
use sieve_core::model::TrainingRecord;
use sieve_core::prompts::clean::{CleaningSettings, ResponseCleaner};
use sieve_core::qc::{QcThresholds, QualityController};
use sieve_core::storage::shard::write_shard;
use sieve_core::ShardMerger;
use tempfile::TempDir;

fn controller() -> QualityController {
    let cleaner = ResponseCleaner::from_settings(&CleaningSettings::default()).unwrap();
    QualityController::new(QcThresholds::default(), 256, cleaner)
}

fn shard(index: u32, records: Vec<TrainingRecord>) -> ShardOutput {
    let qc = controller();
    let funnel = clean_funnel(records.len() as u64);
    ShardOutput {
        shard_index: index,
        config_fingerprint: "sha256:fixture".into(),
        qc: qc.compute(&records, &funnel),
        records,
        funnel,
    }
}

fn five_shards_with_shared_instruction() -> Vec<ShardOutput> {
    (0..5)
        .map(|i| {
            let mut rs: Vec<_> = (0..10)
                .map(|_| record(i, "Explain how tides work.", &format!("From shard {i}."), 40))
                .collect();
            rs.push(record(i, &format!("Unique task from shard {i}."), "Done.", 30));
            shard(i, rs)
        })
        .collect()
}

#[test]
fn test_duplicates_across_shards_collapse_to_first() {
    let merger = ShardMerger::new(controller());
    let out = merger.merge(&five_shards_with_shared_instruction());

    assert_eq!(out.manifest.pre_dedup_count, 55);
    assert_eq!(out.manifest.post_dedup_count, 6);
    assert_eq!(out.manifest.duplication_count, 49);
    assert_eq!(out.records[0].response, "From shard 0.");
    assert_eq!(out.records[0].provenance.shard_index, 0);
    assert!(out
        .manifest
        .notes
        .iter()
        .any(|n| n.starts_with("duplication_rate")));
}

#[test]
fn test_merge_ignores_input_order() {
    let merger = ShardMerger::new(controller());
    let mut shards = five_shards_with_shared_instruction();
    let forward = merger.merge(&shards);
    shards.reverse();
    let backward = merger.merge(&shards);
    assert_eq!(forward.records, backward.records);
    assert_eq!(forward.qc, backward.qc);
}

#[test]
fn test_merge_is_idempotent() {
    let merger = ShardMerger::new(controller());
    let once = merger.merge(&five_shards_with_shared_instruction());
    let again = merger.merge(&[ShardOutput {
        shard_index: 0,
        config_fingerprint: "sha256:fixture".into(),
        records: once.records.clone(),
        funnel: once.qc.funnel.clone(),
        qc: once.qc.clone(),
    }]);
    assert_eq!(again.records, once.records);
    assert_eq!(again.manifest.duplication_count, 0);
    assert_eq!(again.qc.funnel, once.qc.funnel);
}

#[test]
fn test_funnel_counts_add_and_rates_recompute() {
    let merger = ShardMerger::new(controller());
    let mut a = shard(0, vec![record(0, "Task A.", "Answer.", 10)]);
    a.funnel.instructions_critiqued = 10;
    a.funnel.instructions_accepted = 9;
    let mut b = shard(1, vec![record(1, "Task B.", "Answer.", 10)]);
    b.funnel.instructions_critiqued = 30;
    b.funnel.instructions_accepted = 3;

    let out = merger.merge(&[a, b]);
    assert_eq!(out.qc.funnel.instructions_critiqued, 40);
    assert_eq!(out.qc.instruction_acceptance_rate, 12.0 / 40.0);
    assert!(!out.qc.thresholds_passed);
}

#[test]
fn test_runaway_rate_gate_message() {
    let records: Vec<_> = (0..100)
        .map(|i| {
            let response = if i < 7 {
                "Sure.\nUser: and another thing".to_string()
            } else {
                format!("Answer number {i}.")
            };
            record(0, &format!("Task {i}."), &response, 50)
        })
        .collect();

    let summary = controller().compute(&records, &clean_funnel(100));
    assert_eq!(summary.runaway_count, 7);
    assert_eq!(summary.runaway_rate, 0.07);
    assert!(!summary.thresholds_passed);
    assert!(summary
        .failed_reasons
        .contains(&"runaway_rate 7% exceeds 5% threshold".to_string()));
}

#[test]
fn test_qc_is_pure() {
    let records: Vec<_> = (0..20)
        .map(|i| record(0, &format!("Task {i}."), "Fine.", 10 + i))
        .collect();
    let qc = controller();
    assert_eq!(
        qc.compute(&records, &clean_funnel(20)),
        qc.compute(&records, &clean_funnel(20))
    );
}

#[test]
fn test_merge_dirs_reads_persisted_shards() {
    let tmp = TempDir::new().unwrap();
    let shards = five_shards_with_shared_instruction();
    let mut inputs = Vec::new();
    for s in &shards {
        let dir = tmp.path().join(format!("shard-{}", s.shard_index));
        write_shard(&dir, s).unwrap();
        inputs.push(dir);
    }
    inputs.reverse();

    let out = tmp.path().join("merged");
    let manifest = ShardMerger::new(controller())
        .merge_dirs(&inputs, &out)
        .unwrap();

    assert_eq!(manifest.duplication_count, 49);
    assert_eq!(manifest.shards[0].shard_index, 0);
    assert!(out.join("dataset.jsonl").exists());
    assert!(out.join("merge_manifest.json").exists());
}

#[test]
fn test_mixed_configurations_are_noted() {
    let a = shard(0, vec![record(0, "Task A.", "Answer.", 10)]);
    let mut b = shard(1, vec![record(1, "Task B.", "Answer.", 10)]);
    b.config_fingerprint = "sha256:other".into();
    let out = ShardMerger::new(controller()).merge(&[a, b]);
    assert!(out.manifest.notes.iter().any(|n| n.contains("2 different configurations")));
}

mod common;

use common::factory_model;
use sieve_core::config::SieveConfig;
use sieve_core::engine::pipeline::Pipeline;
use sieve_core::engine::session::{Session, SessionPlan, ShardStage, ShardStatus};
use sieve_core::errors::MarkerSite;
use sieve_core::guard::{prepare, GuardSettings};
use sieve_core::merge::ShardMerger;
use sieve_core::ContaminationError;
use tempfile::TempDir;

const TWO_GOOD: [&str; 2] = [
    "Describe the number {seed} in two sentences.",
    "Name one everyday use for the number {seed}.",
];

#[tokio::test]
async fn test_pilot_then_scale_up() {
    let model = prepare(
        Box::new(factory_model(TWO_GOOD.to_vec(), " A complete answer.")),
        &GuardSettings::default(),
    )
    .await
    .unwrap();
    let pipeline = Pipeline::from_config(&SieveConfig::default()).unwrap();
    let plan = SessionPlan::uniform(1, 2, 3, 99);

    let result = Session::new(&pipeline, &model).run(&plan).await.unwrap();
    let m = &result.manifest;

    assert!(m.scaled_up);
    assert!(m.passed(), "{:?}", m.stopped_reason);
    assert_eq!(m.shards.len(), 3);
    assert!(m.shards.iter().all(|s| s.status == ShardStatus::Completed));
    assert_eq!(m.shards[0].stage, ShardStage::Pilot);
    assert_eq!(m.pilot.as_ref().unwrap().post_dedup_count, 3);
    let final_merge = m.final_merge.as_ref().unwrap();
    assert_eq!(final_merge.post_dedup_count, 9);
    assert_eq!(result.records.len(), 9);
    assert_eq!(m.guard.model_id, "factory-base");
}

#[tokio::test]
async fn test_failed_pilot_gate_blocks_scale_up() {
    // One in three candidates survives critique: instruction acceptance 33%.
    let model = prepare(
        Box::new(factory_model(
            vec![
                "Summarize the number {seed}.",
                "REJECT first {seed}",
                "REJECT second {seed}",
            ],
            " A complete answer.",
        )),
        &GuardSettings::default(),
    )
    .await
    .unwrap();
    let pipeline = Pipeline::from_config(&SieveConfig::default()).unwrap();
    let plan = SessionPlan::uniform(1, 4, 3, 5);

    let result = Session::new(&pipeline, &model).run(&plan).await.unwrap();
    let m = &result.manifest;

    assert!(!m.scaled_up);
    assert!(!m.passed());
    assert!(m.final_merge.is_none());
    let reason = m.stopped_reason.as_deref().unwrap();
    assert!(reason.starts_with("pilot gate failed"), "{reason}");
    assert!(reason.contains("instruction_acceptance_rate"), "{reason}");
    assert!(m.shards.iter().all(|s| s.stage == ShardStage::Pilot));
}

#[tokio::test]
async fn test_contamination_aborts_session() {
    let model = prepare(
        Box::new(factory_model(TWO_GOOD.to_vec(), " [/INST] Sure, here you go.")),
        &GuardSettings::default(),
    )
    .await
    .unwrap();
    let pipeline = Pipeline::from_config(&SieveConfig::default()).unwrap();
    let plan = SessionPlan::uniform(2, 2, 2, 1);

    let err = Session::new(&pipeline, &model).run(&plan).await.err().unwrap();
    match err {
        ContaminationError::TemplateMarker { marker, site } => {
            assert_eq!(marker, "[/INST]");
            assert_eq!(site, MarkerSite::Output);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_stalled_shard_is_recorded_and_skipped() {
    let model = prepare(
        Box::new(factory_model(vec!["Repeat this exact task."], " ok")),
        &GuardSettings::default(),
    )
    .await
    .unwrap();
    let mut cfg = SieveConfig::default();
    cfg.generation.max_consecutive_failures = 2;
    let pipeline = Pipeline::from_config(&cfg).unwrap();

    let result = Session::new(&pipeline, &model)
        .run(&SessionPlan::uniform(2, 0, 5, 0))
        .await
        .unwrap();

    assert_eq!(result.manifest.shards.len(), 2);
    for s in &result.manifest.shards {
        assert_eq!(s.status, ShardStatus::Aborted);
        assert!(s.error.as_deref().unwrap().contains("stalled"));
    }
    assert!(result.records.is_empty());
    assert!(!result.manifest.passed());
}

#[tokio::test]
async fn test_written_session_merges_back_identically() {
    let model = prepare(
        Box::new(factory_model(TWO_GOOD.to_vec(), " A complete answer.")),
        &GuardSettings::default(),
    )
    .await
    .unwrap();
    let pipeline = Pipeline::from_config(&SieveConfig::default()).unwrap();
    let result = Session::new(&pipeline, &model)
        .run(&SessionPlan::uniform(1, 1, 2, 3))
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    result.write(dir.path()).unwrap();
    assert!(dir.path().join("session.json").exists());

    let inputs = vec![
        dir.path().join("shards/shard-0000"),
        dir.path().join("shards/shard-0001"),
    ];
    let out = TempDir::new().unwrap();
    let merger: ShardMerger = pipeline.merger();
    let manifest = merger.merge_dirs(&inputs, out.path()).unwrap();

    assert_eq!(manifest.post_dedup_count, result.records.len() as u64);
    let reread = sieve_core::storage::jsonl::read_records(&out.path().join("dataset.jsonl")).unwrap();
    let a: Vec<_> = reread.iter().map(|r| &r.instruction).collect();
    let b: Vec<_> = result.records.iter().map(|r| &r.instruction).collect();
    assert_eq!(a, b);
}

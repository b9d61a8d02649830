use crate::engine::pipeline::ShardOutput;
use crate::model::{ratio, CritiqueFunnel, TrainingRecord};
use crate::qc::{pct, QcSummary, QualityController};
use crate::storage::{jsonl, shard, write_json_pretty};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DATASET_FILE: &str = "dataset.jsonl";
pub const MERGE_MANIFEST_FILE: &str = "merge_manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShardCount {
    pub shard_index: u32,
    pub records: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeManifest {
    pub schema_version: u32,
    pub sieve_version: String,
    pub generated_at: String,
    pub shards: Vec<ShardCount>,
    pub pre_dedup_count: u64,
    pub post_dedup_count: u64,
    pub duplication_count: u64,
    pub duplication_rate: f64,
    pub notes: Vec<String>,
    pub qc: QcSummary,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub records: Vec<TrainingRecord>,
    pub qc: QcSummary,
    pub manifest: MergeManifest,
}

pub struct ShardMerger {
    qc: QualityController,
}

impl ShardMerger {
    pub fn new(qc: QualityController) -> Self {
        Self { qc }
    }

    /// Dedups by exact instruction text, first occurrence wins in shard-index
    /// then within-shard order. QC is recomputed on the union; per-shard
    /// summaries are ignored.
    pub fn merge(&self, shards: &[ShardOutput]) -> MergeOutcome {
        let mut ordered: Vec<&ShardOutput> = shards.iter().collect();
        ordered.sort_by_key(|s| s.shard_index);

        let mut seen: HashSet<&str> = HashSet::new();
        let mut records = Vec::new();
        let mut funnel = CritiqueFunnel::default();
        let mut counts = Vec::with_capacity(ordered.len());
        let mut pre = 0u64;

        for shard in &ordered {
            funnel.absorb(&shard.funnel);
            counts.push(ShardCount {
                shard_index: shard.shard_index,
                records: shard.records.len() as u64,
            });
            for r in &shard.records {
                pre += 1;
                if seen.insert(r.instruction.as_str()) {
                    records.push(r.clone());
                }
            }
        }

        let post = records.len() as u64;
        let duplication_count = pre - post;
        let duplication_rate = ratio(duplication_count, pre);
        let qc = self.qc.compute(&records, &funnel);

        let mut notes = Vec::new();
        let fingerprints: HashSet<&str> = ordered
            .iter()
            .map(|s| s.config_fingerprint.as_str())
            .collect();
        if fingerprints.len() > 1 {
            let note = format!(
                "shards were produced under {} different configurations",
                fingerprints.len()
            );
            tracing::warn!(event = "sieve.merge.mixed_config", "{}", note);
            notes.push(note);
        }

        let warn_rate = self.qc.thresholds().duplication_warn_rate;
        if pre > 0 && duplication_rate >= warn_rate {
            let note = format!(
                "duplication_rate {}% is at or above {}%: the instruction distribution is too peaked; raise temperature or repetition_penalty upstream",
                pct(duplication_rate),
                pct(warn_rate)
            );
            tracing::warn!(
                event = "sieve.merge.duplication",
                duplication_count,
                duplication_rate,
                "{}",
                note
            );
            notes.push(note);
        }

        tracing::info!(
            event = "sieve.merge.done",
            shards = counts.len(),
            pre_dedup = pre,
            post_dedup = post,
            thresholds_passed = qc.thresholds_passed,
            "merged shards"
        );

        let manifest = MergeManifest {
            schema_version: 1,
            sieve_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            shards: counts,
            pre_dedup_count: pre,
            post_dedup_count: post,
            duplication_count,
            duplication_rate,
            notes,
            qc: qc.clone(),
        };

        MergeOutcome {
            records,
            qc,
            manifest,
        }
    }

    /// Reads shard directories, merges them and writes the dataset and manifest.
    pub fn merge_dirs(&self, inputs: &[PathBuf], out_dir: &Path) -> anyhow::Result<MergeManifest> {
        let mut shards = Vec::with_capacity(inputs.len());
        for dir in inputs {
            shards.push(shard::read_shard(dir)?);
        }
        let outcome = self.merge(&shards);
        jsonl::write_records(&out_dir.join(DATASET_FILE), &outcome.records)?;
        write_json_pretty(&out_dir.join(MERGE_MANIFEST_FILE), &outcome.manifest)?;
        Ok(outcome.manifest)
    }
}

use super::{jsonl, read_json, write_json_pretty};
use crate::engine::pipeline::ShardOutput;
use crate::model::CritiqueFunnel;
use crate::qc::QcSummary;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const RECORDS_FILE: &str = "records.jsonl";
pub const SHARD_MANIFEST_FILE: &str = "shard.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardManifest {
    pub schema_version: u32,
    pub sieve_version: String,
    pub shard_index: u32,
    pub config_fingerprint: String,
    pub record_count: u64,
    pub funnel: CritiqueFunnel,
    pub qc: QcSummary,
}

pub fn write_shard(dir: &Path, shard: &ShardOutput) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    jsonl::write_records(&dir.join(RECORDS_FILE), &shard.records)?;
    let manifest = ShardManifest {
        schema_version: 1,
        sieve_version: env!("CARGO_PKG_VERSION").to_string(),
        shard_index: shard.shard_index,
        config_fingerprint: shard.config_fingerprint.clone(),
        record_count: shard.records.len() as u64,
        funnel: shard.funnel.clone(),
        qc: shard.qc.clone(),
    };
    write_json_pretty(&dir.join(SHARD_MANIFEST_FILE), &manifest)
}

pub fn read_shard(dir: &Path) -> anyhow::Result<ShardOutput> {
    let manifest: ShardManifest = read_json(&dir.join(SHARD_MANIFEST_FILE))?;
    if manifest.schema_version != 1 {
        anyhow::bail!(
            "{}: unsupported shard schema_version {}",
            dir.display(),
            manifest.schema_version
        );
    }
    let records = jsonl::read_records(&dir.join(RECORDS_FILE))?;
    if records.len() as u64 != manifest.record_count {
        anyhow::bail!(
            "{}: manifest lists {} records but {} were read",
            dir.display(),
            manifest.record_count,
            records.len()
        );
    }
    Ok(ShardOutput {
        shard_index: manifest.shard_index,
        config_fingerprint: manifest.config_fingerprint,
        records,
        funnel: manifest.funnel,
        qc: manifest.qc,
    })
}

use super::pipeline::{Pipeline, ShardOutput, ShardSpec};
use crate::errors::{ContaminationError, PipelineError};
use crate::guard::{GuardReport, GuardedModel};
use crate::merge::{MergeManifest, DATASET_FILE};
use crate::model::{CritiqueFunnel, TrainingRecord};
use crate::storage::{jsonl, shard, write_json_pretty};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SESSION_MANIFEST_FILE: &str = "session.json";

/// Pilot shards are gated before any scale-up shard runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionPlan {
    pub pilot: Vec<ShardSpec>,
    pub scale_up: Vec<ShardSpec>,
}

impl SessionPlan {
    /// Shard indices run 0.. across both stages; seeds are `base_seed + index`.
    pub fn uniform(pilot_shards: u32, scale_up_shards: u32, records_per_shard: usize, base_seed: u64) -> Self {
        let spec = |index: u32| ShardSpec {
            index,
            target_count: records_per_shard,
            seed: base_seed.wrapping_add(index as u64),
        };
        Self {
            pilot: (0..pilot_shards).map(spec).collect(),
            scale_up: (pilot_shards..pilot_shards + scale_up_shards).map(spec).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShardStage {
    Pilot,
    ScaleUp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardReport {
    pub shard_index: u32,
    pub stage: ShardStage,
    pub status: ShardStatus,
    pub records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funnel: Option<CritiqueFunnel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub schema_version: u32,
    pub sieve_version: String,
    pub generated_at: String,
    pub model_id: String,
    pub config_fingerprint: String,
    pub guard: GuardReport,
    pub shards: Vec<ShardReport>,
    pub pilot: Option<MergeManifest>,
    #[serde(rename = "final")]
    pub final_merge: Option<MergeManifest>,
    pub scaled_up: bool,
    pub stopped_reason: Option<String>,
}

impl SessionManifest {
    /// True when the records handed back cleared the last gate that ran.
    pub fn passed(&self) -> bool {
        self.stopped_reason.is_none()
            && self
                .final_merge
                .as_ref()
                .map(|m| m.qc.thresholds_passed)
                .unwrap_or(false)
    }
}

pub struct SessionResult {
    pub shards: Vec<ShardOutput>,
    pub records: Vec<TrainingRecord>,
    pub manifest: SessionManifest,
}

impl SessionResult {
    /// `shards/shard-NNNN/`, `dataset.jsonl` and `session.json` under `dir`.
    pub fn write(&self, dir: &Path) -> anyhow::Result<()> {
        for s in &self.shards {
            shard::write_shard(&dir.join("shards").join(shard_dir_name(s.shard_index)), s)?;
        }
        jsonl::write_records(&dir.join(DATASET_FILE), &self.records)?;
        write_json_pretty(&dir.join(SESSION_MANIFEST_FILE), &self.manifest)
    }
}

pub fn shard_dir_name(index: u32) -> String {
    format!("shard-{:04}", index)
}

pub struct Session<'a> {
    pipeline: &'a Pipeline,
    model: &'a GuardedModel,
}

impl<'a> Session<'a> {
    pub fn new(pipeline: &'a Pipeline, model: &'a GuardedModel) -> Self {
        Self { pipeline, model }
    }

    /// Contamination anywhere ends the session with an error and no records.
    /// Stalled or failing shards are recorded and skipped.
    pub async fn run(&self, plan: &SessionPlan) -> Result<SessionResult, ContaminationError> {
        let merger = self.pipeline.merger();
        let mut reports = Vec::new();
        let mut completed = Vec::new();

        for spec in &plan.pilot {
            self.run_one(spec, ShardStage::Pilot, &mut reports, &mut completed)
                .await?;
        }

        let pilot = merger.merge(&completed);
        let mut manifest = SessionManifest {
            schema_version: 1,
            sieve_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            model_id: self.model.model_id().to_string(),
            config_fingerprint: self.pipeline.config_fingerprint().to_string(),
            guard: self.model.report().clone(),
            shards: Vec::new(),
            pilot: Some(pilot.manifest.clone()),
            final_merge: None,
            scaled_up: false,
            stopped_reason: None,
        };

        if !pilot.qc.thresholds_passed {
            let reason = format!("pilot gate failed: {}", pilot.qc.failed_reasons.join("; "));
            tracing::warn!(event = "sieve.session.pilot_gate_failed", "{}", reason);
            manifest.stopped_reason = Some(reason);
            manifest.shards = reports;
            return Ok(SessionResult {
                shards: completed,
                records: pilot.records,
                manifest,
            });
        }

        if plan.scale_up.is_empty() {
            manifest.final_merge = Some(pilot.manifest);
            manifest.shards = reports;
            return Ok(SessionResult {
                shards: completed,
                records: pilot.records,
                manifest,
            });
        }

        tracing::info!(
            event = "sieve.session.scale_up",
            shards = plan.scale_up.len(),
            "pilot gate passed"
        );
        for spec in &plan.scale_up {
            self.run_one(spec, ShardStage::ScaleUp, &mut reports, &mut completed)
                .await?;
        }

        let merged = merger.merge(&completed);
        if !merged.qc.thresholds_passed {
            let reason = format!("final gate failed: {}", merged.qc.failed_reasons.join("; "));
            tracing::warn!(event = "sieve.session.final_gate_failed", "{}", reason);
            manifest.stopped_reason = Some(reason);
        }
        manifest.scaled_up = true;
        manifest.final_merge = Some(merged.manifest);
        manifest.shards = reports;

        Ok(SessionResult {
            shards: completed,
            records: merged.records,
            manifest,
        })
    }

    async fn run_one(
        &self,
        spec: &ShardSpec,
        stage: ShardStage,
        reports: &mut Vec<ShardReport>,
        completed: &mut Vec<ShardOutput>,
    ) -> Result<(), ContaminationError> {
        match self.pipeline.run_shard(self.model, spec).await {
            Ok(out) => {
                reports.push(ShardReport {
                    shard_index: spec.index,
                    stage,
                    status: ShardStatus::Completed,
                    records: out.records.len() as u64,
                    funnel: Some(out.funnel.clone()),
                    error: None,
                });
                completed.push(out);
                Ok(())
            }
            Err(PipelineError::Contamination(e)) => {
                let discarded: usize = completed.iter().map(|s| s.records.len()).sum();
                tracing::error!(
                    event = "sieve.session.contaminated",
                    shard = spec.index,
                    discarded,
                    error = %e,
                    "aborting run"
                );
                Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    event = "sieve.session.shard_aborted",
                    shard = spec.index,
                    error = %e,
                    "shard aborted, continuing"
                );
                reports.push(ShardReport {
                    shard_index: spec.index,
                    stage,
                    status: ShardStatus::Aborted,
                    records: 0,
                    funnel: None,
                    error: Some(e.to_string()),
                });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_plan_numbers_shards_across_stages() {
        let plan = SessionPlan::uniform(2, 3, 10, 100);
        let idx: Vec<u32> = plan.pilot.iter().chain(&plan.scale_up).map(|s| s.index).collect();
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
        assert_eq!(plan.scale_up[0].seed, 102);
        assert!(plan.pilot.iter().all(|s| s.target_count == 10));
    }
}

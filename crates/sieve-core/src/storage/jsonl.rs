use crate::model::TrainingRecord;
use anyhow::Context;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

/// One record per line. Invalid records are refused on write.
pub fn write_records(path: &Path, records: &[TrainingRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for (i, r) in records.iter().enumerate() {
        r.validate()
            .map_err(|e| anyhow::anyhow!("record {}: {}", i, e))?;
        serde_json::to_writer(&mut w, r)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_records(path: &Path) -> anyhow::Result<Vec<TrainingRecord>> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open records file {}: {}", path.display(), e))?;
    let reader = std::io::BufReader::new(file);

    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TrainingRecord = serde_json::from_str(&line)
            .map_err(|e| anyhow::anyhow!("line {}: failed to parse record: {}", i + 1, e))?;
        record
            .validate()
            .map_err(|e| anyhow::anyhow!("line {}: {}", i + 1, e))?;
        out.push(record);
    }
    Ok(out)
}

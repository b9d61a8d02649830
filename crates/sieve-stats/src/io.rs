use crate::pairing::ItemOutcome;
use std::io::BufRead;
use std::path::Path;

/// Reads one `ItemOutcome` per line; blank lines are skipped.
pub fn read_outcomes(path: &Path) -> anyhow::Result<Vec<ItemOutcome>> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open outcomes file {}: {}", path.display(), e))?;
    let reader = std::io::BufReader::new(file);

    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome: ItemOutcome = serde_json::from_str(&line).map_err(|e| {
            anyhow::anyhow!("{} line {}: failed to parse outcome: {}", path.display(), i + 1, e)
        })?;
        if outcome.item_id.trim().is_empty() {
            anyhow::bail!("{} line {}: empty item_id", path.display(), i + 1);
        }
        out.push(outcome);
    }
    Ok(out)
}

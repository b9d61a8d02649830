use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Dedup identity of a record: the exact instruction text, hashed.
pub fn dedup_key(instruction: &str) -> String {
    sha256_hex(instruction)
}

/// Short id for a generated prompt, stable across runs.
pub fn prompt_id(prompt: &str) -> String {
    let mut id = sha256_hex(prompt);
    id.truncate(16);
    id
}

/// Hash of the canonical JSON form of a config value.
///
/// serde_json maps are ordered, so the digest is stable for equal configs.
pub fn config_fingerprint<T: serde::Serialize>(cfg: &T) -> String {
    let canonical = serde_json::to_value(cfg)
        .map(|v| v.to_string())
        .unwrap_or_default();
    format!("sha256:{}", sha256_hex(&canonical))
}

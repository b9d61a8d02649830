pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS verdict_cache (
  key TEXT PRIMARY KEY,
  model TEXT NOT NULL,
  rubric_id TEXT NOT NULL,
  rubric_version TEXT NOT NULL,
  created_at TEXT NOT NULL,
  payload_json TEXT NOT NULL
);
"#;

use crate::model::CritiqueVerdict;
use crate::prompts::Rubric;
use anyhow::Context;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistent verdicts keyed by everything that can change one.
#[derive(Clone)]
pub struct VerdictCache {
    conn: Arc<Mutex<Connection>>,
}

impl VerdictCache {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).context("failed to open verdict cache db")?;
        Self::init(conn)
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(super::schema::DDL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("verdict cache lock poisoned"))
    }

    pub fn key(
        model_id: &str,
        rubric_id: &str,
        rubric_version: &str,
        margin_threshold: f64,
        prompt: &str,
    ) -> String {
        let input_hash = format!("{:x}", md5::compute(prompt));
        let raw = format!(
            "{}:{}:{}:{}:{}",
            model_id, rubric_id, rubric_version, margin_threshold, input_hash
        );
        format!("{:x}", md5::compute(raw))
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<CritiqueVerdict>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload_json FROM verdict_cache WHERE key=?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            let s: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&s)?))
        } else {
            Ok(None)
        }
    }

    pub fn put(
        &self,
        key: &str,
        model_id: &str,
        rubric: &Rubric,
        verdict: &CritiqueVerdict,
    ) -> anyhow::Result<()> {
        let conn = self.lock()?;
        let payload_json = serde_json::to_string(verdict)?;
        conn.execute(
            "INSERT INTO verdict_cache(
                key, model, rubric_id, rubric_version, created_at, payload_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(key) DO UPDATE SET
                payload_json=excluded.payload_json,
                created_at=excluded.created_at",
            params![
                key,
                model_id,
                rubric.id,
                rubric.version,
                chrono::Utc::now().to_rfc3339(),
                payload_json
            ],
        )?;
        Ok(())
    }

    pub fn len(&self) -> anyhow::Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM verdict_cache", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.len()? == 0)
    }
}

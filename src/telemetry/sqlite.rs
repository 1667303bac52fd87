//! Local trace store backed by SQLite.
//! One row in `runs` per record, with params, metrics and tags in side tables.
//! Statements run on the blocking pool so the deferred runtime keeps polling.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

use super::{now_millis, RunStatus, TelemetryError, TelemetryRecord, TraceBackend};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS runs (
        run_id TEXT PRIMARY KEY,
        experiment TEXT NOT NULL,
        status TEXT NOT NULL,
        start_time INTEGER NOT NULL,
        end_time INTEGER
    );
    CREATE TABLE IF NOT EXISTS run_params (
        run_id TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (run_id, key)
    );
    CREATE TABLE IF NOT EXISTS run_metrics (
        run_id TEXT NOT NULL,
        key TEXT NOT NULL,
        value REAL NOT NULL,
        timestamp INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS run_tags (
        run_id TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (run_id, key)
    );
    CREATE INDEX IF NOT EXISTS idx_runs_start ON runs(start_time);
";

/// A stored run, flattened for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRun {
    pub run_id: String,
    pub status: String,
    pub text: Option<String>,
    pub translation: Option<String>,
    pub latency_ms: Option<f64>,
    pub source: Option<String>,
    pub target_lang: Option<String>,
}

pub struct SqliteTraceStore {
    conn: Arc<Mutex<Connection>>,
    experiment: String,
}

impl SqliteTraceStore {
    /// Open (or create) the trace database at `db_path`.
    pub fn open(db_path: &Path, experiment: impl Into<String>) -> Result<Self, TelemetryError> {
        let conn = Connection::open(db_path).map_err(storage)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;

        info!(path = %db_path.display(), "sqlite trace store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            experiment: experiment.into(),
        })
    }

    /// Most recent runs of this store's experiment, newest first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<StoredRun>, TelemetryError> {
        let experiment = self.experiment.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT r.run_id, r.status,
                    (SELECT value FROM run_params p WHERE p.run_id = r.run_id AND p.key = 'text'),
                    (SELECT value FROM run_params p WHERE p.run_id = r.run_id AND p.key = 'translation'),
                    (SELECT value FROM run_metrics m WHERE m.run_id = r.run_id AND m.key = 'latency'),
                    (SELECT value FROM run_tags t WHERE t.run_id = r.run_id AND t.key = 'source'),
                    (SELECT value FROM run_tags t WHERE t.run_id = r.run_id AND t.key = 'target_lang')
                 FROM runs r
                 WHERE r.experiment = ?1
                 ORDER BY r.start_time DESC, r.rowid DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![experiment, limit as i64], |row| {
                Ok(StoredRun {
                    run_id: row.get(0)?,
                    status: row.get(1)?,
                    text: row.get(2)?,
                    translation: row.get(3)?,
                    latency_ms: row.get(4)?,
                    source: row.get(5)?,
                    target_lang: row.get(6)?,
                })
            })?;
            let runs = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(runs)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, TelemetryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| TelemetryError::Storage(e.to_string()))?
        .map_err(storage)
    }
}

#[async_trait]
impl TraceBackend for SqliteTraceStore {
    async fn open_run(&self, record: &TelemetryRecord) -> Result<String, TelemetryError> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let experiment = self.experiment.clone();
        let source = record.source.as_str();
        let target_lang = record.target_lang.clone();
        let id = run_id.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO runs (run_id, experiment, status, start_time)
                 VALUES (?1, ?2, 'RUNNING', ?3)",
                params![id, experiment, now_millis()],
            )?;
            for (key, value) in [("source", source.to_string()), ("target_lang", target_lang)] {
                tx.execute(
                    "INSERT INTO run_tags (run_id, key, value) VALUES (?1, ?2, ?3)",
                    params![id, key, value],
                )?;
            }
            tx.commit()
        })
        .await?;

        Ok(run_id)
    }

    async fn log_record(
        &self,
        run_id: &str,
        record: &TelemetryRecord,
    ) -> Result<(), TelemetryError> {
        let id = run_id.to_string();
        let text = record.text.clone();
        let translation = record.translation.clone();
        let latency_ms = record.latency_ms;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for (key, value) in [("text", text), ("translation", translation)] {
                tx.execute(
                    "INSERT OR REPLACE INTO run_params (run_id, key, value) VALUES (?1, ?2, ?3)",
                    params![id, key, value],
                )?;
            }
            tx.execute(
                "INSERT INTO run_metrics (run_id, key, value, timestamp)
                 VALUES (?1, 'latency', ?2, ?3)",
                params![id, latency_ms, now_millis()],
            )?;
            tx.commit()
        })
        .await
    }

    async fn close_run(&self, run_id: &str, status: RunStatus) -> Result<(), TelemetryError> {
        let id = run_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE runs SET status = ?1, end_time = ?2 WHERE run_id = ?3",
                params![status.as_str(), now_millis(), id],
            )?;
            Ok(())
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

fn storage(e: rusqlite::Error) -> TelemetryError {
    TelemetryError::Storage(e.to_string())
}

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

use super::error::ExportError;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<TelemetryError> for ExportError {
    fn from(error: TelemetryError) -> Self {
        match error {
            TelemetryError::Io(err) => ExportError::Io(err),
            other => ExportError::Configuration(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub job_id: String,
    pub site: String,
    pub phase: String,
    pub class: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub job_id: String,
    pub site: String,
    pub success: bool,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// Run history for export jobs: one JSONL line per failure for quick
/// grepping, plus a SQLite table the CLI reads back for `history`.
#[derive(Debug)]
pub struct ExportTelemetry {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl ExportTelemetry {
    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref().to_path_buf();
        let db_path = db_path.as_ref().to_path_buf();
        for parent in [log_path.parent(), db_path.parent()].into_iter().flatten() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let telemetry = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.initialize_db()?;
        Ok(telemetry)
    }

    fn initialize_db(&self) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS export_runs (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                job_id TEXT,
                site TEXT,
                success INTEGER,
                duration_ms INTEGER,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_export_runs_ts ON export_runs(ts DESC);
            CREATE TABLE IF NOT EXISTS export_failures (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                job_id TEXT,
                site TEXT,
                phase TEXT,
                class TEXT,
                message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_export_failures_ts ON export_failures(ts DESC);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> Result<Connection, TelemetryError> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn record_failure(&self, failure: &FailureRecord) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(failure)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO export_failures (job_id, site, phase, class, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                failure.job_id,
                failure.site,
                failure.phase,
                failure.class,
                failure.message,
            ],
        )?;
        Ok(())
    }

    pub fn record_run(&self, run: &RunRecord) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO export_runs (job_id, site, success, duration_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.job_id,
                run.site,
                if run.success { 1 } else { 0 },
                run.duration_ms,
                run.error.clone().unwrap_or_default(),
            ],
        )?;
        Ok(())
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}

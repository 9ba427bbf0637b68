// src/ledger.rs

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::pipeline::{Input, PipelineFailure, RunReport, Stage};

/// Audit trail of pipeline runs, one row per run.
pub struct RunLedger {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunEntry {
    pub run_id: String,
    /// RFC 3339, UTC.
    pub started_at: String,
    pub input: String,
    pub vendor_key: Option<String>,
    pub po_number: Option<String>,
    pub stage: String,
    pub succeeded: bool,
    pub error_kind: Option<String>,
    pub component: Option<String>,
    pub pdf_sha256: Option<String>,
    pub warnings: usize,
}

impl RunEntry {
    pub fn from_outcome(
        input: &Input,
        started_at: &str,
        outcome: &Result<RunReport, PipelineFailure>,
    ) -> Self {
        let input_path = input.path().display().to_string();
        let run_id = RunLedger::generate_run_id(&input_path, started_at);
        match outcome {
            Ok(report) => Self {
                run_id,
                started_at: started_at.to_string(),
                input: input_path,
                vendor_key: Some(report.vendor_key.clone()),
                po_number: Some(report.po_number.clone()),
                stage: Stage::Done.to_string(),
                succeeded: true,
                error_kind: None,
                component: None,
                pdf_sha256: Some(report.pdf_sha256.clone()),
                warnings: report.warnings.len(),
            },
            Err(failure) => Self {
                run_id,
                started_at: started_at.to_string(),
                input: input_path,
                vendor_key: None,
                po_number: None,
                stage: failure.stage.to_string(),
                succeeded: false,
                error_kind: Some(failure.kind().to_string()),
                component: Some(failure.component().to_string()),
                pdf_sha256: None,
                warnings: 0,
            },
        }
    }
}

/// Current time for `RunEntry::started_at`.
pub fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

impl RunLedger {
    /// Open (or create) the ledger database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                input TEXT NOT NULL,
                vendor_key TEXT,
                po_number TEXT,
                stage TEXT NOT NULL,
                succeeded INTEGER NOT NULL,
                error_kind TEXT,
                component TEXT,
                pdf_sha256 TEXT,
                warnings INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_vendor_key ON runs(vendor_key)",
            [],
        )?;

        info!("Run ledger initialized");
        Ok(Self { conn })
    }

    /// Stable id from the input path and start time.
    pub fn generate_run_id(input: &str, started_at: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hasher.update(started_at.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn record_run(&self, entry: &RunEntry) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO runs
                (run_id, started_at, input, vendor_key, po_number, stage, succeeded,
                 error_kind, component, pdf_sha256, warnings)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.run_id,
                entry.started_at,
                entry.input,
                entry.vendor_key,
                entry.po_number,
                entry.stage,
                entry.succeeded,
                entry.error_kind,
                entry.component,
                entry.pdf_sha256,
                entry.warnings,
            ],
        )?;
        info!(run_id = %entry.run_id, succeeded = entry.succeeded, "Run recorded");
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> SqliteResult<Option<RunEntry>> {
        self.conn
            .query_row(
                "SELECT run_id, started_at, input, vendor_key, po_number, stage, succeeded,
                        error_kind, component, pdf_sha256, warnings
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                Self::row_to_entry,
            )
            .optional()
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> SqliteResult<Vec<RunEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, started_at, input, vendor_key, po_number, stage, succeeded,
                    error_kind, component, pdf_sha256, warnings
             FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], Self::row_to_entry)?;
        rows.collect()
    }

    /// (total, succeeded, failed)
    pub fn get_counts(&self) -> SqliteResult<(usize, usize, usize)> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;

        let succeeded: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE succeeded = 1",
            [],
            |row| row.get(0),
        )?;

        Ok((total, succeeded, total - succeeded))
    }

    fn row_to_entry(row: &Row<'_>) -> SqliteResult<RunEntry> {
        Ok(RunEntry {
            run_id: row.get(0)?,
            started_at: row.get(1)?,
            input: row.get(2)?,
            vendor_key: row.get(3)?,
            po_number: row.get(4)?,
            stage: row.get(5)?,
            succeeded: row.get(6)?,
            error_kind: row.get(7)?,
            component: row.get(8)?,
            pdf_sha256: row.get(9)?,
            warnings: row.get(10)?,
        })
    }
}

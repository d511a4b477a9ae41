//! Append-only interaction log.
//!
//! One entry per pipeline state transition: which agent ran, a summary of
//! what went in and out, how long it took, and how it ended. The pipeline
//! only ever appends - the log is for operators and audits, never consulted
//! by control flow, so a sink failure degrades to a warning instead of
//! failing the conversation.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// How a logged step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    /// The step produced a usable result on a degraded path (for example a
    /// data-unavailable marker instead of data).
    Degraded,
    Failed,
}

impl StepOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Ok => "ok",
            StepOutcome::Degraded => "degraded",
            StepOutcome::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "degraded" => StepOutcome::Degraded,
            "failed" => StepOutcome::Failed,
            _ => StepOutcome::Ok,
        }
    }
}

/// One audit record. Write-once; never read by the pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionLogEntry {
    pub request_id: String,
    pub agent_name: String,
    pub input_summary: String,
    pub output_summary: String,
    pub duration_ms: u64,
    pub outcome: StepOutcome,
}

/// Append seam handed to the orchestrator.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: InteractionLogEntry);
}

/// SQLite-backed audit log.
pub struct SqliteAuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditLog {
    /// Open or create the log at `.tally/audit.db`.
    pub fn open() -> Result<Self> {
        Self::open_at(".tally/audit.db")
    }

    /// Open at a specific path (useful for testing).
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open audit database")?;
        let log = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        log.run_migrations()?;
        Ok(log)
    }

    /// In-memory log, for tools and tests that need no persistence.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory audit db")?;
        let log = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        log.run_migrations()?;
        Ok(log)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS interaction_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    request_id TEXT NOT NULL,
                    agent_name TEXT NOT NULL,
                    input_summary TEXT NOT NULL,
                    output_summary TEXT NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    outcome TEXT NOT NULL,
                    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_interaction_request ON interaction_log(request_id)",
                [],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        tracing::debug!("audit log ready, schema version {}", SCHEMA_VERSION);
        Ok(())
    }

    /// Entries for one request, oldest first. Operator convenience; the
    /// pipeline never calls this.
    pub fn entries_for_request(&self, request_id: &str) -> Result<Vec<InteractionLogEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT request_id, agent_name, input_summary, output_summary, duration_ms, outcome
             FROM interaction_log WHERE request_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![request_id], |row| {
            Ok(InteractionLogEntry {
                request_id: row.get(0)?,
                agent_name: row.get(1)?,
                input_summary: row.get(2)?,
                output_summary: row.get(3)?,
                duration_ms: row.get::<_, i64>(4)? as u64,
                outcome: StepOutcome::parse(&row.get::<_, String>(5)?),
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

}

impl AuditSink for SqliteAuditLog {
    fn append(&self, entry: InteractionLogEntry) {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("audit log lock poisoned, dropping entry: {}", e);
                return;
            }
        };
        let result = conn.execute(
            "INSERT INTO interaction_log
             (request_id, agent_name, input_summary, output_summary, duration_ms, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.request_id,
                entry.agent_name,
                entry.input_summary,
                entry.output_summary,
                entry.duration_ms as i64,
                entry.outcome.as_str(),
            ],
        );
        if let Err(e) = result {
            tracing::warn!("failed to append audit entry: {}", e);
        }
    }
}

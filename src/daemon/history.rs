//! SQLite-backed journal of synchronization passes.
//!
//! Purely informational: the scheduler's decisions never read from it, and a
//! failed write is logged rather than failing the pass.

use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

/// Passes kept after pruning unless configured otherwise.
pub const DEFAULT_RETENTION: u32 = 500;

/// One completed or failed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassRecord {
    pub started_at: u64,
    pub finished_at: u64,
    pub forced: bool,
    pub reason: String,
    pub action: Option<String>,
    pub local: Option<String>,
    pub remote: Option<String>,
    pub error: Option<String>,
}

/// Manages the pass journal.
pub struct History {
    conn: Mutex<Connection>,
    retention: u32,
}

impl History {
    /// Open or create the journal at the given path. The parent directory
    /// must already exist.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let history = Self {
            conn: Mutex::new(conn),
            retention: DEFAULT_RETENTION,
        };
        history.init()?;
        Ok(history)
    }

    /// In-memory journal, used when persistence is not wanted.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let history = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            retention: DEFAULT_RETENTION,
        };
        history.init()?;
        Ok(history)
    }

    /// Keep at most `retention` passes.
    pub fn with_retention(mut self, retention: u32) -> Self {
        self.retention = retention.max(1);
        self
    }

    fn init(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS passes (
                id INTEGER PRIMARY KEY,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                forced INTEGER NOT NULL DEFAULT 0,
                reason TEXT NOT NULL,
                action TEXT,
                local_fingerprint TEXT,
                remote_fingerprint TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_passes_started ON passes(started_at);
            ",
        )?;
        Ok(())
    }

    /// Append a pass and prune anything beyond the retention limit.
    pub fn record(&self, record: &PassRecord) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO passes (started_at, finished_at, forced, reason, action,
                                 local_fingerprint, remote_fingerprint, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.started_at as i64,
                record.finished_at as i64,
                record.forced,
                record.reason,
                record.action,
                record.local,
                record.remote,
                record.error,
            ],
        )?;

        conn.execute(
            "DELETE FROM passes WHERE id NOT IN (
                 SELECT id FROM passes ORDER BY id DESC LIMIT ?1
             )",
            params![self.retention as i64],
        )?;

        Ok(())
    }

    /// Most recent passes, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<PassRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT started_at, finished_at, forced, reason, action,
                    local_fingerprint, remote_fingerprint, error
             FROM passes
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(PassRecord {
                started_at: row.get::<_, i64>(0)? as u64,
                finished_at: row.get::<_, i64>(1)? as u64,
                forced: row.get(2)?,
                reason: row.get(3)?,
                action: row.get(4)?,
                local: row.get(5)?,
                remote: row.get(6)?,
                error: row.get(7)?,
            })
        })?;

        rows.collect()
    }

    /// Number of passes currently stored.
    pub fn len(&self) -> Result<u64, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM passes", [], |row| {
            row.get::<_, i64>(0).map(|n| n as u64)
        })
    }
}

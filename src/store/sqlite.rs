//! SQLite-backed `QueueStore`.
//!
//! One `mutation_queue` table. The `seq` rowid records commit order, so
//! `load_all` returns items exactly in enqueue order after a restart.
//! Timestamps are RFC 3339 text, payloads JSON text.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::{QueueError, Result};
use crate::types::{MutationKind, MutationStatus, QueuedMutation};

use super::{QueueStore, StatusUpdate};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS mutation_queue (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT NOT NULL UNIQUE,
    kind            TEXT NOT NULL,
    payload         TEXT NOT NULL,
    status          TEXT NOT NULL,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    terminal        INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    created_at      TEXT NOT NULL,
    last_attempt_at TEXT
);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store. Contents are lost on drop — tests only.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl QueueStore for SqliteStore {
    fn save(&self, mutation: &QueuedMutation) -> Result<()> {
        let payload = serde_json::to_string(&mutation.payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO mutation_queue
                (id, kind, payload, status, retry_count, terminal, last_error, created_at, last_attempt_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                mutation.id,
                mutation.kind.as_str(),
                payload,
                mutation.status.as_str(),
                mutation.retry_count,
                mutation.terminal,
                mutation.last_error,
                mutation.created_at.to_rfc3339(),
                mutation.last_attempt_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<QueuedMutation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload, status, retry_count, terminal, last_error, created_at, last_attempt_at
             FROM mutation_queue ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RawRow {
                id: row.get(0)?,
                kind: row.get(1)?,
                payload: row.get(2)?,
                status: row.get(3)?,
                retry_count: row.get(4)?,
                terminal: row.get(5)?,
                last_error: row.get(6)?,
                created_at: row.get(7)?,
                last_attempt_at: row.get(8)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_mutation()?);
        }
        Ok(out)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM mutation_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn update(&self, id: &str, update: &StatusUpdate) -> Result<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE mutation_queue
             SET status = ?1, retry_count = ?2, terminal = ?3, last_error = ?4, last_attempt_at = ?5
             WHERE id = ?6",
            params![
                update.status.as_str(),
                update.retry_count,
                update.terminal,
                update.last_error,
                update.last_attempt_at.map(|t| t.to_rfc3339()),
                id,
            ],
        )?;
        if affected == 0 {
            return Err(QueueError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}

/// Column values as stored, before domain parsing.
struct RawRow {
    id: String,
    kind: String,
    payload: String,
    status: String,
    retry_count: i64,
    terminal: bool,
    last_error: Option<String>,
    created_at: String,
    last_attempt_at: Option<String>,
}

impl RawRow {
    fn into_mutation(self) -> Result<QueuedMutation> {
        let kind = MutationKind::parse(&self.kind)
            .ok_or_else(|| QueueError::Storage(format!("unknown mutation kind: {}", self.kind)))?;
        let status = MutationStatus::parse(&self.status)
            .ok_or_else(|| QueueError::Storage(format!("unknown status: {}", self.status)))?;
        let last_attempt_at = match self.last_attempt_at {
            Some(ref s) => Some(parse_timestamp(s)?),
            None => None,
        };
        Ok(QueuedMutation {
            id: self.id,
            kind,
            payload: serde_json::from_str(&self.payload)?,
            status,
            retry_count: self.retry_count as u32,
            terminal: self.terminal,
            last_error: self.last_error,
            created_at: parse_timestamp(&self.created_at)?,
            last_attempt_at,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::Storage(format!("bad timestamp {s:?}: {e}")))
}

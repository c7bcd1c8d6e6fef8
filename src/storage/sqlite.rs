//! SQLite frontier backend
//!
//! Blocking rusqlite calls run on the blocking thread pool. Each commit is a
//! single SQL transaction.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{FrontierBackend, StorageError};
use crate::frontier::{Changeset, FrontierEntry, FrontierSnapshot};
use crate::models::JobId;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS frontier_entries (
        job_id TEXT NOT NULL,
        url TEXT NOT NULL,
        state TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (job_id, url)
    );

    CREATE INDEX IF NOT EXISTS idx_frontier_entries_state
        ON frontier_entries(job_id, state, sequence);

    CREATE TABLE IF NOT EXISTS frontier_visited (
        job_id TEXT NOT NULL,
        url TEXT NOT NULL,
        PRIMARY KEY (job_id, url)
    );

    CREATE TABLE IF NOT EXISTS frontier_meta (
        job_id TEXT PRIMARY KEY,
        next_sequence INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    );
"#;

/// Embedded SQLite store
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) the database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StorageError> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            conn.execute_batch(SCHEMA)?;

            tracing::info!(path = %path.display(), "SQLite frontier backend initialized");
            Ok(conn)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Unavailable("SQLite connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn write_entries(
    tx: &rusqlite::Transaction<'_>,
    job_id: &str,
    entries: &[FrontierEntry],
) -> Result<(), StorageError> {
    let mut stmt = tx.prepare_cached(
        "INSERT OR REPLACE INTO frontier_entries (job_id, url, state, sequence, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    for entry in entries {
        let data = serde_json::to_string(entry)?;
        stmt.execute(params![
            job_id,
            entry.url,
            entry.state.as_str(),
            entry.sequence as i64,
            data
        ])?;
    }
    Ok(())
}

fn write_visited(
    tx: &rusqlite::Transaction<'_>,
    job_id: &str,
    visited: &[String],
) -> Result<(), StorageError> {
    let mut stmt = tx.prepare_cached(
        "INSERT OR IGNORE INTO frontier_visited (job_id, url) VALUES (?1, ?2)",
    )?;

    for url in visited {
        stmt.execute(params![job_id, url])?;
    }
    Ok(())
}

fn write_meta(
    tx: &rusqlite::Transaction<'_>,
    job_id: &str,
    next_sequence: u64,
) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO frontier_meta (job_id, next_sequence, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(job_id) DO UPDATE SET
            next_sequence = MAX(next_sequence, excluded.next_sequence),
            updated_at = excluded.updated_at",
        params![job_id, next_sequence as i64, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn delete_job(tx: &rusqlite::Transaction<'_>, job_id: &str) -> Result<(), StorageError> {
    tx.execute("DELETE FROM frontier_entries WHERE job_id = ?1", params![job_id])?;
    tx.execute("DELETE FROM frontier_visited WHERE job_id = ?1", params![job_id])?;
    tx.execute("DELETE FROM frontier_meta WHERE job_id = ?1", params![job_id])?;
    Ok(())
}

#[async_trait]
impl FrontierBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, job_id: &JobId) -> Result<Option<FrontierSnapshot>, StorageError> {
        let job = job_id.to_string();

        self.with_conn(move |conn| {
            let next_sequence: Option<i64> = conn
                .query_row(
                    "SELECT next_sequence FROM frontier_meta WHERE job_id = ?1",
                    params![job],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(next_sequence) = next_sequence else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT data FROM frontier_entries WHERE job_id = ?1 ORDER BY sequence",
            )?;
            let rows = stmt.query_map(params![job], |row| row.get::<_, String>(0))?;

            let mut entries = Vec::new();
            for data in rows {
                entries.push(serde_json::from_str::<FrontierEntry>(&data?)?);
            }

            let mut stmt = conn
                .prepare("SELECT url FROM frontier_visited WHERE job_id = ?1 ORDER BY url")?;
            let visited = stmt
                .query_map(params![job], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(FrontierSnapshot {
                entries,
                visited,
                next_sequence: next_sequence as u64,
            }))
        })
        .await
    }

    async fn commit(&self, job_id: &JobId, changeset: &Changeset) -> Result<(), StorageError> {
        let job = job_id.to_string();
        let changeset = changeset.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            write_entries(&tx, &job, &changeset.entries)?;
            write_visited(&tx, &job, &changeset.visited)?;
            write_meta(&tx, &job, changeset.next_sequence)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn replace(
        &self,
        job_id: &JobId,
        snapshot: &FrontierSnapshot,
    ) -> Result<(), StorageError> {
        let job = job_id.to_string();
        let snapshot = snapshot.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            delete_job(&tx, &job)?;
            write_entries(&tx, &job, &snapshot.entries)?;
            write_visited(&tx, &job, &snapshot.visited)?;
            write_meta(&tx, &job, snapshot.next_sequence)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, job_id: &JobId) -> Result<(), StorageError> {
        let job = job_id.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            delete_job(&tx, &job)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

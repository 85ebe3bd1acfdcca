//! SQLite plumbing shared by the index, memory, and corridor databases.
//!
//! Each database is a WAL-mode file with exactly one writer connection behind a
//! mutex and a small pool of reader connections, so reads proceed while a scan
//! commits short write transactions.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use crate::error::StoreResult;
use schema::DatabaseKind;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) a database of the given kind with pragmas, schema, and
/// migrations applied. `dimensions` sizes the vec0 table.
pub fn open_connection(
    path: impl AsRef<Path>,
    kind: DatabaseKind,
    dimensions: usize,
) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_millis(5000))?;

    schema::init_schema(&conn, kind, dimensions).context("failed to initialize schema")?;
    migrations::run_migrations(&conn, kind).context("failed to run migrations")?;

    tracing::debug!(path = %path.display(), kind = kind.as_str(), "database opened");
    Ok(conn)
}

/// Open an in-memory database with the schema for `kind`.
pub fn open_memory_connection(kind: DatabaseKind, dimensions: usize) -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn, kind, dimensions).context("failed to initialize schema")?;
    migrations::run_migrations(&conn, kind).context("failed to run migrations")?;
    Ok(conn)
}

/// A single-writer / many-reader handle over one database file.
pub struct Database {
    kind: DatabaseKind,
    path: Option<PathBuf>,
    dimensions: usize,
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    busy_retries: u32,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("readers", &self.readers.len())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open a file-backed database with `read_connections` reader connections.
    pub fn open(
        path: impl AsRef<Path>,
        kind: DatabaseKind,
        dimensions: usize,
        read_connections: usize,
        busy_retries: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        let writer = open_connection(path, kind, dimensions)?;
        let mut readers = Vec::with_capacity(read_connections);
        for _ in 0..read_connections {
            let conn = Connection::open(path)
                .with_context(|| format!("failed to open reader for {}", path.display()))?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(Duration::from_millis(5000))?;
            readers.push(Mutex::new(conn));
        }
        tracing::info!(
            path = %path.display(),
            kind = kind.as_str(),
            readers = read_connections,
            "database ready"
        );
        Ok(Self {
            kind,
            path: Some(path.to_path_buf()),
            dimensions,
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            busy_retries,
        })
    }

    /// In-memory database for tests. Reads share the writer connection.
    pub fn open_in_memory(kind: DatabaseKind, dimensions: usize) -> Result<Self> {
        Ok(Self {
            kind,
            path: None,
            dimensions,
            writer: Mutex::new(open_memory_connection(kind, dimensions)?),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            busy_retries: 0,
        })
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Run `f` on the writer connection, retrying transient lock failures.
    ///
    /// `f` may run more than once, so it must open its own transaction.
    pub fn write<T>(&self, mut f: impl FnMut(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut attempt = 0;
        loop {
            let result = {
                let mut conn = self
                    .writer
                    .lock()
                    .map_err(|e| anyhow::anyhow!("db writer lock poisoned: {e}"))?;
                f(&mut conn)
            };
            match result {
                Err(err) if err.is_transient() && attempt < self.busy_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %err, "transient write failure, retrying");
                    std::thread::sleep(Duration::from_millis(25 * u64::from(attempt)));
                }
                other => return other,
            }
        }
    }

    /// Run `f` on a reader connection (the writer for in-memory databases).
    pub fn read<T>(&self, mut f: impl FnMut(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut attempt = 0;
        loop {
            let result = if self.readers.is_empty() {
                let conn = self
                    .writer
                    .lock()
                    .map_err(|e| anyhow::anyhow!("db writer lock poisoned: {e}"))?;
                f(&conn)
            } else {
                let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
                let conn = self.readers[idx]
                    .lock()
                    .map_err(|e| anyhow::anyhow!("db reader lock poisoned: {e}"))?;
                f(&conn)
            };
            match result {
                Err(err) if err.is_transient() && attempt < self.busy_retries => {
                    attempt += 1;
                    std::thread::sleep(Duration::from_millis(25 * u64::from(attempt)));
                }
                other => return other,
            }
        }
    }
}

/// Health report for `palace doctor`.
#[derive(Debug, serde::Serialize)]
pub struct HealthReport {
    pub kind: String,
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub schema_version: u32,
    pub sqlite_vec_version: String,
    pub embedding_model: Option<String>,
    pub row_counts: Vec<(String, i64)>,
}

/// Run integrity and bookkeeping checks against an open connection.
pub fn check_database_health(conn: &Connection, kind: DatabaseKind) -> StoreResult<HealthReport> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let sqlite_vec_version: String = conn.query_row("SELECT vec_version()", [], |r| r.get(0))?;

    let mut row_counts = Vec::new();
    for table in kind.counted_tables() {
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        row_counts.push((table.to_string(), count));
    }

    Ok(HealthReport {
        kind: kind.as_str().to_string(),
        integrity_ok: integrity == "ok",
        integrity_details: integrity,
        schema_version: migrations::get_schema_version(conn)?,
        sqlite_vec_version,
        embedding_model: migrations::get_embedding_model(conn)?,
        row_counts,
    })
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            std::mem::size_of_val(embedding),
        )
    }
}

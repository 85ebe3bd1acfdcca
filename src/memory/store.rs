//! Write path and row plumbing for records.
//!
//! [`MemoryStore::store`] validates and normalizes the input, then inserts the
//! record, its tags, and its FTS5 row in one transaction. The vector is filled
//! in later by the embedding pipeline through [`EmbeddingSink`].

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Arc;

use super::classify::classify;
use super::types::{NewRecord, Record, RecordKind, Scope};
use crate::config::{PalaceConfig, RetrievalConfig};
use crate::db::schema::DatabaseKind;
use crate::db::{embedding_to_bytes, Database};
use crate::embedding::{EmbeddingSink, EmbeddingSource, JobKey, JobQueue, TargetType};
use crate::error::{StoreError, StoreResult};
use crate::index::normalize_path;

pub(crate) const RECORD_COLUMNS: &str = "r.id, r.content, r.kind, r.scope, r.scope_path, r.tags, \
     r.created_at, r.origin, (r.embedded_hash IS NOT NULL AND r.embedded_hash = r.content_hash)";

/// One records database: the workspace memory or the corridor.
pub struct MemoryStore {
    pub(super) db: Database,
    pub(super) retrieval: RetrievalConfig,
    target: TargetType,
    queue: Option<Arc<JobQueue>>,
}

impl MemoryStore {
    pub fn new(db: Database, retrieval: RetrievalConfig, target: TargetType) -> Self {
        Self {
            db,
            retrieval,
            target,
            queue: None,
        }
    }

    /// Open `<root>/.palace/memory.db`.
    pub fn open_workspace(config: &PalaceConfig) -> Result<Self> {
        Self::open_at(config.memory_db_path(), config, TargetType::Record)
    }

    /// Open the cross-workspace corridor database.
    pub fn open_corridor(config: &PalaceConfig) -> Result<Self> {
        Self::open_at(config.corridor_db_path(), config, TargetType::CorridorRecord)
    }

    fn open_at(path: impl AsRef<Path>, config: &PalaceConfig, target: TargetType) -> Result<Self> {
        let db = Database::open(
            path,
            DatabaseKind::Memory,
            config.embedding.dimensions,
            config.storage.read_connections,
            config.storage.busy_retries,
        )?;
        Ok(Self::new(db, config.retrieval.clone(), target))
    }

    /// Enqueue embedding work for every write from now on.
    pub fn with_queue(mut self, queue: Arc<JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn target(&self) -> TargetType {
        self.target
    }

    pub fn is_corridor(&self) -> bool {
        self.target == TargetType::CorridorRecord
    }

    pub fn store(&self, input: NewRecord) -> StoreResult<Record> {
        let (record, hash) = prepare(input)?;
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            insert_record(&tx, &record, &hash)?;
            tx.commit()?;
            Ok(())
        })?;
        tracing::debug!(
            id = %record.id,
            kind = record.kind.as_str(),
            scope = record.scope.as_str(),
            store = self.target.as_str(),
            "record stored"
        );
        self.enqueue(&record.id);
        Ok(record)
    }

    /// Store unless a record with the same content and origin already exists.
    /// Returns the record and whether it was created.
    pub fn store_once(&self, input: NewRecord) -> StoreResult<(Record, bool)> {
        let (record, hash) = prepare(input)?;
        let existing = self.db.write(|conn| {
            let tx = conn.transaction()?;
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM records r \
                 WHERE r.content_hash = ?1 AND r.origin IS ?2 ORDER BY r.created_at LIMIT 1"
            );
            let found = tx
                .query_row(&sql, params![hash, record.origin], row_to_record)
                .optional()?;
            if found.is_none() {
                insert_record(&tx, &record, &hash)?;
            }
            tx.commit()?;
            Ok(found)
        })?;
        match existing {
            Some(found) => Ok((found, false)),
            None => {
                self.enqueue(&record.id);
                Ok((record, true))
            }
        }
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<Record>> {
        self.db.read(|conn| get_record(conn, id))
    }

    pub fn count(&self) -> StoreResult<i64> {
        self.db
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?))
    }

    /// Records without an up-to-date vector, for backfilling after restart.
    pub fn stale_embeddings(&self, limit: usize) -> StoreResult<Vec<String>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM records WHERE embedded_hash IS NULL OR embedded_hash != content_hash \
                 ORDER BY created_at LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    fn enqueue(&self, id: &str) {
        if let Some(queue) = &self.queue {
            queue.enqueue(JobKey::new(self.target, id));
        }
    }
}

impl EmbeddingSink for MemoryStore {
    fn source(&self, id: &str) -> StoreResult<Option<EmbeddingSource>> {
        self.db.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT content, content_hash, embedded_hash FROM records WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(EmbeddingSource {
                            text: row.get(0)?,
                            content_hash: row.get(1)?,
                            embedded_hash: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    fn store(&self, id: &str, content_hash: &str, vector: &[f32]) -> StoreResult<bool> {
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE records SET embedded_hash = ?2 WHERE id = ?1 AND content_hash = ?2",
                params![id, content_hash],
            )?;
            if updated > 0 {
                tx.execute("DELETE FROM records_vec WHERE id = ?1", params![id])?;
                tx.execute(
                    "INSERT INTO records_vec (id, embedding) VALUES (?1, ?2)",
                    params![id, embedding_to_bytes(vector)],
                )?;
            }
            tx.commit()?;
            Ok(updated > 0)
        })
    }

    fn dimensions(&self) -> usize {
        self.db.dimensions()
    }
}

/// Validate `input` and build the row to insert, with its content hash.
fn prepare(input: NewRecord) -> StoreResult<(Record, String)> {
    let content = input.content.trim();
    if content.is_empty() {
        return Err(StoreError::EmptyContent);
    }
    let kind = input.kind.unwrap_or_else(|| classify(content));
    let (scope, scope_path) = resolve_scope(input.scope, input.scope_path.as_deref())?;
    let record = Record {
        id: uuid::Uuid::now_v7().to_string(),
        content: content.to_string(),
        kind,
        scope,
        scope_path,
        tags: normalize_tags(&input.tags),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        origin: input.origin,
        embedded: false,
    };
    let hash = blake3::hash(record.content.as_bytes()).to_hex().to_string();
    Ok((record, hash))
}

/// Settle scope and path. An explicit `palace` drops the path; `room` and
/// `file` need one; with no scope the path decides.
pub fn resolve_scope(
    scope: Option<Scope>,
    path: Option<&str>,
) -> StoreResult<(Scope, Option<String>)> {
    let path = path.map(normalize_path).filter(|p| !p.is_empty());
    match (scope, path) {
        (Some(Scope::Palace), _) | (None, None) => Ok((Scope::Palace, None)),
        (Some(scope), None) => Err(StoreError::ScopePathRequired(scope.as_str().to_string())),
        (Some(scope), Some(path)) => Ok((scope, Some(path))),
        (None, Some(path)) => Ok((infer_scope(&path), Some(path))),
    }
}

/// `file` when the last segment has an extension, `room` otherwise.
fn infer_scope(path: &str) -> Scope {
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < last.len() => Scope::File,
        _ => Scope::Room,
    }
}

/// Trim, drop empties, dedup keeping first occurrence.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn insert_record(tx: &Transaction, record: &Record, hash: &str) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO records (id, content, kind, scope, scope_path, tags, origin, created_at, content_hash) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id,
            record.content,
            record.kind.as_str(),
            record.scope.as_str(),
            record.scope_path,
            serde_json::to_string(&record.tags)?,
            record.origin,
            record.created_at,
            hash,
        ],
    )?;
    let rowid = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO records_fts (rowid, content, id) VALUES (?1, ?2, ?3)",
        params![rowid, record.content, record.id],
    )?;
    let mut insert_tag = tx.prepare("INSERT INTO record_tags (record_id, tag) VALUES (?1, ?2)")?;
    for tag in &record.tags {
        insert_tag.execute(params![record.id, tag])?;
    }
    Ok(())
}

pub(crate) fn get_record(conn: &Connection, id: &str) -> StoreResult<Option<Record>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_record).optional()?)
}

pub(crate) fn row_to_record(row: &Row) -> rusqlite::Result<Record> {
    let kind: String = row.get(2)?;
    let scope: String = row.get(3)?;
    let tags: String = row.get(5)?;
    Ok(Record {
        id: row.get(0)?,
        content: row.get(1)?,
        kind: kind.parse::<RecordKind>().map_err(|e| conversion_error(2, e))?,
        scope: scope.parse::<Scope>().map_err(|e| conversion_error(3, e))?,
        scope_path: row.get(4)?,
        tags: serde_json::from_str(&tags)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        created_at: row.get(6)?,
        origin: row.get(7)?,
        embedded: row.get(8)?,
    })
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

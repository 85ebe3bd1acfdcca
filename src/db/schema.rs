//! SQL DDL for the index and memory databases.
//!
//! The index database holds `files`, `symbols`, `relationships`, the
//! `symbols_fts` (FTS5) table, and the `symbols_vec` (vec0) table. The memory
//! database (also used for the corridor) holds `records`, `record_tags`,
//! `records_fts`, and `records_vec`. Both carry `schema_meta`. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// Which schema a database file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Index,
    Memory,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Memory => "memory",
        }
    }

    /// Tables whose row counts `doctor` reports.
    pub fn counted_tables(&self) -> &'static [&'static str] {
        match self {
            Self::Index => &["files", "symbols", "relationships"],
            Self::Memory => &["records", "record_tags"],
        }
    }
}

const META_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const INDEX_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    language TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    last_scanned TEXT NOT NULL,
    symbol_count INTEGER NOT NULL DEFAULT 0,
    diagnostic_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS symbols (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
    language TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    signature TEXT NOT NULL DEFAULT '',
    doc_comment TEXT,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    exported INTEGER NOT NULL DEFAULT 0,
    parent_id TEXT,
    children TEXT NOT NULL DEFAULT '[]',
    annotations TEXT NOT NULL DEFAULT '[]',
    ordinal INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    embedded_hash TEXT
);

CREATE INDEX IF NOT EXISTS idx_symbols_path ON symbols(path, ordinal);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);
CREATE INDEX IF NOT EXISTS idx_symbols_parent ON symbols(parent_id);

CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK(kind IN ('inherits','implements','imports','calls','references')),
    from_id TEXT,
    to_id TEXT,
    to_name TEXT NOT NULL,
    path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
    line INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rel_from ON relationships(from_id);
CREATE INDEX IF NOT EXISTS idx_rel_to_id ON relationships(to_id);
CREATE INDEX IF NOT EXISTS idx_rel_to_name ON relationships(to_name);
CREATE INDEX IF NOT EXISTS idx_rel_path ON relationships(path);

-- Full-text search (BM25) over name, split identifier terms, signature, docs
CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
    name,
    terms,
    signature,
    doc_comment,
    id UNINDEXED
);
"#;

const MEMORY_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL CHECK(length(trim(content)) > 0),
    kind TEXT NOT NULL CHECK(kind IN ('idea','decision','learning','postmortem','custom')),
    scope TEXT NOT NULL DEFAULT 'palace' CHECK(scope IN ('palace','room','file')),
    scope_path TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    origin TEXT,
    created_at TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedded_hash TEXT,
    CHECK(scope = 'palace' OR (scope_path IS NOT NULL AND length(scope_path) > 0))
);

CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
CREATE INDEX IF NOT EXISTS idx_records_scope ON records(scope, scope_path);
CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at);
CREATE INDEX IF NOT EXISTS idx_records_hash ON records(content_hash);

CREATE TABLE IF NOT EXISTS record_tags (
    record_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (record_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_record_tags_tag ON record_tags(tag);

CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
    content,
    id UNINDEXED
);
"#;

/// vec0 virtual tables must be created separately (sqlite-vec syntax).
fn vec_table_sql(kind: DatabaseKind, dimensions: usize) -> String {
    let table = match kind {
        DatabaseKind::Index => "symbols_vec",
        DatabaseKind::Memory => "records_vec",
    };
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {table} USING vec0(\n    id TEXT PRIMARY KEY,\n    embedding FLOAT[{dimensions}]\n);"
    )
}

/// Initialize all schema tables for `kind`. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(
    conn: &Connection,
    kind: DatabaseKind,
    dimensions: usize,
) -> rusqlite::Result<()> {
    conn.execute_batch(META_SQL)?;
    match kind {
        DatabaseKind::Index => conn.execute_batch(INDEX_SQL)?,
        DatabaseKind::Memory => conn.execute_batch(MEMORY_SQL)?,
    }
    conn.execute_batch(&vec_table_sql(kind, dimensions))?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('database_kind', ?1)",
        [kind.as_str()],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('embedding_dimensions', ?1)",
        [dimensions.to_string()],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn index_schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, DatabaseKind::Index, 384).unwrap();

        let tables = tables(&conn);
        for expected in [
            "files",
            "symbols",
            "relationships",
            "symbols_fts",
            "symbols_vec",
            "schema_meta",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
        assert!(!tables.contains(&"records".to_string()));
    }

    #[test]
    fn memory_schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, DatabaseKind::Memory, 384).unwrap();

        let tables = tables(&conn);
        for expected in ["records", "record_tags", "records_fts", "records_vec", "schema_meta"] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn scope_path_check_rejects_file_without_path() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, DatabaseKind::Memory, 8).unwrap();
        let result = conn.execute(
            "INSERT INTO records (id, content, kind, scope, created_at, content_hash) \
             VALUES ('x', 'c', 'idea', 'file', '2024-01-01', 'h')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, DatabaseKind::Index, 16).unwrap();
        init_schema(&conn, DatabaseKind::Index, 16).unwrap();
    }
}

//! Durable symbol graph for one workspace.
//!
//! [`IndexStore`] owns the `files`, `symbols`, and `relationships` tables
//! plus their FTS5 and vec0 mirrors. Each file's rows are replaced in one
//! transaction so readers never see a half-updated file.

pub mod graph;
pub mod scan;
pub mod search;

use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::config::{PalaceConfig, RetrievalConfig};
use crate::db::schema::DatabaseKind;
use crate::db::{embedding_to_bytes, Database};
use crate::embedding::{EmbeddingSink, EmbeddingSource};
use crate::error::StoreResult;
use crate::parser::{Language, ParseResult, Relationship, RelationshipKind, Symbol, SymbolKind};

pub use graph::GraphEdge;
pub use scan::{Indexer, ScanReport};
pub use search::{SearchOptions, SymbolHit};

/// Stored per-file bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: String,
    pub language: Language,
    pub content_hash: String,
    pub last_scanned: String,
    pub symbol_count: usize,
    pub diagnostic_count: usize,
}

/// Filter for [`IndexStore::list_symbols`]. All fields are optional.
#[derive(Debug, Clone, Default)]
pub struct SymbolFilter {
    /// Exact file path, or a directory containing files.
    pub path: Option<String>,
    pub kind: Option<SymbolKind>,
    /// Case-sensitive name prefix.
    pub prefix: Option<String>,
    pub exported_only: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub files: i64,
    pub symbols: i64,
    pub relationships: i64,
    pub embedded_symbols: i64,
    pub languages: BTreeMap<String, i64>,
}

/// Outcome of [`IndexStore::upsert_file`].
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub file: FileRecord,
    /// Symbols whose stored vector is missing or stale.
    pub needs_embedding: Vec<String>,
}

pub(crate) const SYMBOL_COLUMNS: &str = "s.id, s.path, s.language, s.kind, s.name, s.qualified_name, \
     s.signature, s.doc_comment, s.start_line, s.end_line, s.exported, s.parent_id, s.children, s.annotations";

pub struct IndexStore {
    db: Database,
    retrieval: RetrievalConfig,
}

impl IndexStore {
    pub fn new(db: Database, retrieval: RetrievalConfig) -> Self {
        Self { db, retrieval }
    }

    /// Open `<root>/.palace/index.db` as configured.
    pub fn open(config: &PalaceConfig) -> Result<Self> {
        let db = Database::open(
            config.index_db_path(),
            DatabaseKind::Index,
            config.embedding.dimensions,
            config.storage.read_connections,
            config.storage.busy_retries,
        )?;
        Ok(Self::new(db, config.retrieval.clone()))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Replace every row owned by `path` with `result`, atomically.
    pub fn upsert_file(
        &self,
        path: &str,
        language: Language,
        content_hash: &str,
        result: &ParseResult,
    ) -> StoreResult<UpsertOutcome> {
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            let outcome = replace_file(&tx, path, language, content_hash, result)?;
            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Remove a file and everything derived from it. Returns whether it existed.
    pub fn delete_file(&self, path: &str) -> StoreResult<bool> {
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            clear_file(&tx, path, &HashMap::new())?;
            let removed = tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    pub fn file(&self, path: &str) -> StoreResult<Option<FileRecord>> {
        self.db.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT path, language, content_hash, last_scanned, symbol_count, diagnostic_count \
                     FROM files WHERE path = ?1",
                    params![path],
                    row_to_file,
                )
                .optional()?)
        })
    }

    /// Indexed file paths equal to or below `prefix` (all files when empty).
    pub fn files_under(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT path FROM files WHERE ?1 = '' OR path = ?1 OR path LIKE ?2 ESCAPE '\\' ORDER BY path",
            )?;
            let rows = stmt
                .query_map(params![prefix, like_under(prefix)], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    pub fn find_symbol(&self, id: &str) -> StoreResult<Option<Symbol>> {
        self.db.read(|conn| find_symbol(conn, id))
    }

    /// All symbols named `name` (or whose qualified name is `name`).
    pub fn find_by_name(&self, name: &str) -> StoreResult<Vec<Symbol>> {
        self.db.read(|conn| {
            let sql = format!(
                "SELECT {SYMBOL_COLUMNS} FROM symbols s WHERE s.name = ?1 OR s.qualified_name = ?1 \
                 ORDER BY s.path, s.ordinal"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![name], row_to_symbol)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Resolve a caller-supplied symbol reference: an id first, then a name.
    pub fn resolve(&self, reference: &str) -> StoreResult<Vec<Symbol>> {
        if let Some(symbol) = self.find_symbol(reference)? {
            return Ok(vec![symbol]);
        }
        self.find_by_name(reference)
    }

    /// Symbols in file/source order matching `filter`. Unbounded unless
    /// `filter.limit` is set; callers facing clients clamp it first.
    pub fn list_symbols(&self, filter: &SymbolFilter) -> StoreResult<Vec<Symbol>> {
        let limit = filter.limit.map_or(-1, |n| n as i64);
        self.db.read(|conn| {
            let sql = format!(
                "SELECT {SYMBOL_COLUMNS} FROM symbols s \
                 WHERE (?1 IS NULL OR s.path = ?1 OR s.path LIKE ?2 ESCAPE '\\') \
                   AND (?3 IS NULL OR s.kind = ?3) \
                   AND (?4 IS NULL OR substr(s.name, 1, length(?4)) = ?4) \
                   AND (?5 = 0 OR s.exported = 1) \
                 ORDER BY s.path, s.ordinal LIMIT ?6"
            );
            let mut stmt = conn.prepare(&sql)?;
            let path = filter
                .path
                .as_deref()
                .map(normalize_path)
                .filter(|p| !p.is_empty());
            let rows = stmt
                .query_map(
                    params![
                        path,
                        path.as_deref().map(like_under),
                        filter.kind.map(|k| k.as_str()),
                        filter.prefix,
                        filter.exported_only,
                        limit,
                    ],
                    row_to_symbol,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Relationships recorded for one file, in source order.
    pub fn relationships_in(&self, path: &str) -> StoreResult<Vec<Relationship>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, from_id, to_id, to_name, path, line FROM relationships \
                 WHERE path = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![path], row_to_relationship)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn stats(&self) -> StoreResult<IndexStats> {
        self.db.read(|conn| {
            let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0));
            let mut languages = BTreeMap::new();
            let mut stmt = conn.prepare("SELECT language, COUNT(*) FROM files GROUP BY language")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (language, n) = row?;
                languages.insert(language, n);
            }
            Ok(IndexStats {
                files: count("SELECT COUNT(*) FROM files")?,
                symbols: count("SELECT COUNT(*) FROM symbols")?,
                relationships: count("SELECT COUNT(*) FROM relationships")?,
                embedded_symbols: count(
                    "SELECT COUNT(*) FROM symbols WHERE embedded_hash IS NOT NULL AND embedded_hash = content_hash",
                )?,
                languages,
            })
        })
    }

    // ── Embedding sink support ───────────────────────────────────────────────

    /// Text to embed for a symbol, with its current content hash and the hash
    /// its stored vector was computed from.
    pub fn embedding_source(&self, id: &str) -> StoreResult<Option<EmbeddingSource>> {
        self.db.read(|conn| {
            let symbol = match find_symbol(conn, id)? {
                Some(symbol) => symbol,
                None => return Ok(None),
            };
            let (content_hash, embedded_hash): (String, Option<String>) = conn.query_row(
                "SELECT content_hash, embedded_hash FROM symbols WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(Some(EmbeddingSource {
                text: embedding_text(&symbol),
                content_hash,
                embedded_hash,
            }))
        })
    }

    /// Store a vector computed from content with hash `content_hash`.
    /// Ignored when the symbol changed or vanished in the meantime.
    pub fn store_embedding(
        &self,
        id: &str,
        content_hash: &str,
        vector: &[f32],
    ) -> StoreResult<bool> {
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE symbols SET embedded_hash = ?2 WHERE id = ?1 AND content_hash = ?2",
                params![id, content_hash],
            )?;
            if updated > 0 {
                tx.execute("DELETE FROM symbols_vec WHERE id = ?1", params![id])?;
                tx.execute(
                    "INSERT INTO symbols_vec (id, embedding) VALUES (?1, ?2)",
                    params![id, embedding_to_bytes(vector)],
                )?;
            }
            tx.commit()?;
            Ok(updated > 0)
        })
    }

    /// Symbols without an up-to-date vector, for backfilling after restart.
    pub fn stale_embeddings(&self, limit: usize) -> StoreResult<Vec<String>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM symbols WHERE embedded_hash IS NULL OR embedded_hash != content_hash \
                 ORDER BY path, ordinal LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }
}

impl EmbeddingSink for IndexStore {
    fn source(&self, id: &str) -> StoreResult<Option<EmbeddingSource>> {
        self.embedding_source(id)
    }

    fn store(&self, id: &str, content_hash: &str, vector: &[f32]) -> StoreResult<bool> {
        self.store_embedding(id, content_hash, vector)
    }

    fn dimensions(&self) -> usize {
        self.db.dimensions()
    }
}

/// Text a symbol is embedded and hashed from.
pub fn embedding_text(symbol: &Symbol) -> String {
    let mut text = format!(
        "{} {} {}\n{}",
        symbol.kind.as_str(),
        symbol.qualified_name,
        split_identifier(&symbol.name),
        symbol.signature
    );
    if let Some(doc) = &symbol.doc_comment {
        text.push('\n');
        text.push_str(doc);
    }
    text
}

/// `parseHTTPRequest_v2` -> `parse http request v2`.
pub fn split_identifier(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        let prev = i.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(i + 1).copied();
        let boundary = match prev {
            Some(p) if p.is_lowercase() && c.is_uppercase() => true,
            Some(p) if p.is_uppercase() && c.is_uppercase() => {
                next.is_some_and(|n| n.is_lowercase())
            }
            Some(p) if p.is_alphabetic() != c.is_alphabetic() => true,
            _ => false,
        };
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.join(" ")
}

fn symbol_hash(symbol: &Symbol) -> String {
    blake3::hash(embedding_text(symbol).as_bytes()).to_hex().to_string()
}

/// Delete a file's derived rows, keeping vectors for ids in `keep_vectors`.
fn clear_file(
    tx: &Transaction,
    path: &str,
    keep_vectors: &HashMap<String, String>,
) -> StoreResult<()> {
    let ids: Vec<String> = {
        let mut stmt = tx.prepare("SELECT id FROM symbols WHERE path = ?1")?;
        let rows = stmt
            .query_map(params![path], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        rows
    };
    for id in &ids {
        if !keep_vectors.contains_key(id) {
            tx.execute("DELETE FROM symbols_vec WHERE id = ?1", params![id])?;
        }
    }
    tx.execute(
        "DELETE FROM symbols_fts WHERE rowid IN (SELECT rowid FROM symbols WHERE path = ?1)",
        params![path],
    )?;
    tx.execute("DELETE FROM relationships WHERE path = ?1", params![path])?;
    tx.execute("DELETE FROM symbols WHERE path = ?1", params![path])?;
    Ok(())
}

fn replace_file(
    tx: &Transaction,
    path: &str,
    language: Language,
    content_hash: &str,
    result: &ParseResult,
) -> StoreResult<UpsertOutcome> {
    // Previous embedded hashes, so unchanged symbols keep their vectors.
    let previous: HashMap<String, String> = {
        let mut stmt = tx.prepare(
            "SELECT id, embedded_hash FROM symbols WHERE path = ?1 AND embedded_hash IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![path], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, String>, _>>()?;
        rows
    };

    let hashes: Vec<String> = result.symbols.iter().map(symbol_hash).collect();
    let keep: HashMap<String, String> = result
        .symbols
        .iter()
        .zip(&hashes)
        .filter(|(s, h)| previous.get(&s.id) == Some(*h))
        .map(|(s, h)| (s.id.clone(), h.clone()))
        .collect();

    clear_file(tx, path, &keep)?;

    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO files (path, language, content_hash, last_scanned, symbol_count, diagnostic_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(path) DO UPDATE SET language = excluded.language, content_hash = excluded.content_hash, \
         last_scanned = excluded.last_scanned, symbol_count = excluded.symbol_count, \
         diagnostic_count = excluded.diagnostic_count",
        params![
            path,
            language.as_str(),
            content_hash,
            now,
            result.symbols.len() as i64,
            result.diagnostics.len() as i64,
        ],
    )?;

    let mut needs_embedding = Vec::new();
    {
        let mut insert_symbol = tx.prepare(
            "INSERT INTO symbols (id, path, language, kind, name, qualified_name, signature, doc_comment, \
             start_line, end_line, exported, parent_id, children, annotations, ordinal, content_hash, embedded_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )?;
        let mut insert_fts = tx.prepare(
            "INSERT INTO symbols_fts (rowid, name, terms, signature, doc_comment, id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for (ordinal, (symbol, hash)) in result.symbols.iter().zip(&hashes).enumerate() {
            let embedded = keep.get(&symbol.id);
            insert_symbol.execute(params![
                symbol.id,
                path,
                language.as_str(),
                symbol.kind.as_str(),
                symbol.name,
                symbol.qualified_name,
                symbol.signature,
                symbol.doc_comment,
                symbol.start_line,
                symbol.end_line,
                symbol.exported,
                symbol.parent_id,
                serde_json::to_string(&symbol.children)?,
                serde_json::to_string(&symbol.annotations)?,
                ordinal as i64,
                hash,
                embedded,
            ])?;
            let rowid = tx.last_insert_rowid();
            let terms = format!(
                "{} {}",
                split_identifier(&symbol.name),
                symbol.qualified_name.replace(['.', ':'], " ")
            );
            insert_fts.execute(params![
                rowid,
                symbol.name,
                terms,
                symbol.signature,
                symbol.doc_comment.as_deref().unwrap_or(""),
                symbol.id,
            ])?;
            if embedded.is_none() {
                needs_embedding.push(symbol.id.clone());
            }
        }

        let mut insert_rel = tx.prepare(
            "INSERT INTO relationships (kind, from_id, to_id, to_name, path, line) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for rel in &result.relationships {
            insert_rel.execute(params![
                rel.kind.as_str(),
                rel.from_id,
                rel.to_id,
                rel.to_name,
                path,
                rel.line,
            ])?;
        }
    }

    Ok(UpsertOutcome {
        file: FileRecord {
            path: path.to_string(),
            language,
            content_hash: content_hash.to_string(),
            last_scanned: now,
            symbol_count: result.symbols.len(),
            diagnostic_count: result.diagnostics.len(),
        },
        needs_embedding,
    })
}

pub(crate) fn find_symbol(conn: &Connection, id: &str) -> StoreResult<Option<Symbol>> {
    let sql = format!("SELECT {SYMBOL_COLUMNS} FROM symbols s WHERE s.id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_symbol).optional()?)
}

/// Batch-fetch symbols by id.
pub(crate) fn fetch_symbols(
    conn: &Connection,
    ids: &[&str],
) -> StoreResult<HashMap<String, Symbol>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {SYMBOL_COLUMNS} FROM symbols s WHERE s.id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
    let rows = stmt
        .query_map(params.as_slice(), row_to_symbol)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|s| (s.id.clone(), s)).collect())
}

fn conversion_error(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown value '{value}'").into(),
    )
}

pub(crate) fn row_to_symbol(row: &Row) -> rusqlite::Result<Symbol> {
    let language: String = row.get(2)?;
    let kind: String = row.get(3)?;
    let children: String = row.get(12)?;
    let annotations: String = row.get(13)?;
    Ok(Symbol {
        id: row.get(0)?,
        path: row.get(1)?,
        language: Language::parse(&language).ok_or_else(|| conversion_error(2, &language))?,
        kind: SymbolKind::parse(&kind).ok_or_else(|| conversion_error(3, &kind))?,
        name: row.get(4)?,
        qualified_name: row.get(5)?,
        signature: row.get(6)?,
        doc_comment: row.get(7)?,
        start_line: row.get(8)?,
        end_line: row.get(9)?,
        exported: row.get(10)?,
        parent_id: row.get(11)?,
        children: serde_json::from_str(&children).unwrap_or_default(),
        annotations: serde_json::from_str(&annotations).unwrap_or_default(),
    })
}

pub(crate) fn row_to_relationship(row: &Row) -> rusqlite::Result<Relationship> {
    let kind: String = row.get(0)?;
    Ok(Relationship {
        kind: RelationshipKind::parse(&kind).ok_or_else(|| conversion_error(0, &kind))?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        to_name: row.get(3)?,
        path: row.get(4)?,
        line: row.get(5)?,
    })
}

fn row_to_file(row: &Row) -> rusqlite::Result<FileRecord> {
    let language: String = row.get(1)?;
    Ok(FileRecord {
        path: row.get(0)?,
        language: Language::parse(&language).ok_or_else(|| conversion_error(1, &language))?,
        content_hash: row.get(2)?,
        last_scanned: row.get(3)?,
        symbol_count: row.get::<_, i64>(4)? as usize,
        diagnostic_count: row.get::<_, i64>(5)? as usize,
    })
}

/// Workspace-relative, `/`-separated, no leading `./` or trailing `/`.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches("./").trim_end_matches('/');
    if path == "." {
        String::new()
    } else {
        path.to_string()
    }
}

/// LIKE pattern matching paths strictly below directory `dir`.
pub(crate) fn like_under(dir: &str) -> String {
    let escaped = dir
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{escaped}/%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn store() -> IndexStore {
        let db = Database::open_in_memory(DatabaseKind::Index, 8).unwrap();
        IndexStore::new(db, RetrievalConfig::default())
    }

    fn upsert(store: &IndexStore, path: &str, src: &str) -> UpsertOutcome {
        let result = parse(src.as_bytes(), path).unwrap();
        let hash = blake3::hash(src.as_bytes()).to_hex().to_string();
        let language = Language::from_path(path).unwrap();
        store.upsert_file(path, language, &hash, &result).unwrap()
    }

    fn names(symbols: &[Symbol]) -> Vec<&str> {
        symbols.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn upsert_replaces_previous_version() {
        let store = store();
        upsert(&store, "a.py", "def one():\n    pass\n\ndef two():\n    pass\n");
        upsert(&store, "a.py", "def three():\n    pass\n");

        let filter = SymbolFilter {
            path: Some("a.py".into()),
            ..Default::default()
        };
        let symbols = store.list_symbols(&filter).unwrap();
        assert_eq!(names(&symbols), ["three"]);

        let stats = store.stats().unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.symbols, 1);
    }

    #[test]
    fn list_matches_parse_result_exactly() {
        let store = store();
        let src = "class A:\n    def f(self):\n        pass\n\ndef g():\n    pass\n";
        upsert(&store, "pkg/mod.py", src);
        let expected = parse(src.as_bytes(), "pkg/mod.py").unwrap().symbols;
        let listed = store
            .list_symbols(&SymbolFilter {
                path: Some("pkg/mod.py".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(listed, expected);
    }

    #[test]
    fn listing_a_file_is_not_capped() {
        let store = store();
        let src: String = (0..60).map(|i| format!("def f{i}():\n    pass\n\n")).collect();
        upsert(&store, "big.py", &src);
        let mut filter = SymbolFilter {
            path: Some("big.py".into()),
            ..Default::default()
        };
        let listed = store.list_symbols(&filter).unwrap();
        assert_eq!(listed.len(), 60);
        assert_eq!(listed, parse(src.as_bytes(), "big.py").unwrap().symbols);

        filter.limit = Some(7);
        assert_eq!(store.list_symbols(&filter).unwrap().len(), 7);
    }

    #[test]
    fn delete_file_cascades() {
        let store = store();
        upsert(&store, "a.py", "import os\n\ndef f():\n    os.getcwd()\n");
        assert!(store.delete_file("a.py").unwrap());
        assert!(!store.delete_file("a.py").unwrap());
        let stats = store.stats().unwrap();
        assert_eq!((stats.files, stats.symbols, stats.relationships), (0, 0, 0));
        assert!(store.relationships_in("a.py").unwrap().is_empty());
    }

    #[test]
    fn list_symbols_filters() {
        let store = store();
        upsert(
            &store,
            "src/a.py",
            "def parse_one():\n    pass\n\ndef _hidden():\n    pass\n\nclass Parser:\n    pass\n",
        );
        upsert(&store, "src/sub/b.py", "def parse_two():\n    pass\n");
        upsert(&store, "other/c.py", "def parse_three():\n    pass\n");

        let under_src = store
            .list_symbols(&SymbolFilter {
                path: Some("src".into()),
                prefix: Some("parse".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(names(&under_src), ["parse_one", "parse_two"]);

        let classes = store
            .list_symbols(&SymbolFilter {
                kind: Some(SymbolKind::Class),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(names(&classes), ["Parser"]);

        let exported = store
            .list_symbols(&SymbolFilter {
                path: Some("src/a.py".into()),
                exported_only: true,
                ..Default::default()
            })
            .unwrap();
        assert!(!names(&exported).contains(&"_hidden"));
    }

    #[test]
    fn unchanged_symbols_keep_embeddings() {
        let store = store();
        let first = upsert(&store, "a.py", "def f():\n    pass\n");
        assert_eq!(first.needs_embedding.len(), 1);
        let id = &first.needs_embedding[0];
        let source = store.embedding_source(id).unwrap().unwrap();
        assert!(source.embedded_hash.is_none());
        let vector = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!(store.store_embedding(id, &source.content_hash, &vector).unwrap());

        // same symbol, new sibling: only the sibling needs a vector
        let second = upsert(&store, "a.py", "def f():\n    pass\n\ndef g():\n    pass\n");
        assert_eq!(second.needs_embedding.len(), 1);
        assert_ne!(&second.needs_embedding[0], id);
        assert_eq!(store.stats().unwrap().embedded_symbols, 1);
    }

    #[test]
    fn stale_embedding_is_ignored() {
        let store = store();
        let outcome = upsert(&store, "a.py", "def f():\n    pass\n");
        let id = &outcome.needs_embedding[0];
        assert!(!store.store_embedding(id, "not-the-hash", &[0.0; 8]).unwrap());
    }

    #[test]
    fn split_identifier_cases() {
        assert_eq!(split_identifier("DoWork"), "do work");
        assert_eq!(split_identifier("parse_file"), "parse file");
        assert_eq!(split_identifier("HTTPServer"), "http server");
        assert_eq!(split_identifier("utf8Decode"), "utf 8 decode");
    }

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize_path("./src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_path("src/"), "src");
        assert_eq!(normalize_path("."), "");
        assert_eq!(like_under("a_b"), "a\\_b/%");
    }
}

//! Filtered and ranked reads over records.
//!
//! Without a query, recall is a newest-first listing. With one, candidates
//! come from three places: a case-insensitive substring match (works before
//! any vector exists), FTS5 BM25, and vec0 KNN when a query vector is given.
//! Scores blend through [`rank::hybrid`].

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::{HashMap, HashSet};

use super::store::{row_to_record, MemoryStore, RECORD_COLUMNS};
use super::types::{RecallFilter, RecallHit, Record, Scope};
use crate::db::embedding_to_bytes;
use crate::embedding::rank::{self, Weights};
use crate::error::StoreResult;
use crate::index::normalize_path;
use crate::index::search::fts_query;

/// Lexical score for a literal substring hit.
const SUBSTRING_SCORE: f64 = 1.0;

/// BM25 hits rank below literal substring hits.
const FTS_SCALE: f64 = 0.8;

/// SQL conditions over `records r`, with positional parameters in order.
#[derive(Debug, Default)]
pub(super) struct Conditions {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Conditions {
    pub(super) fn new(filter: &RecallFilter) -> Self {
        let mut conditions = Self::default();
        if let Some(kind) = filter.kind {
            conditions.push("r.kind = ?", [Value::Text(kind.as_str().to_string())]);
        }
        if let Some(scope) = filter.scope {
            conditions.push("r.scope = ?", [Value::Text(scope.as_str().to_string())]);
        }
        for tag in super::store::normalize_tags(&filter.tags) {
            conditions.push(
                "EXISTS (SELECT 1 FROM record_tags t WHERE t.record_id = r.id AND t.tag = ?)",
                [Value::Text(tag)],
            );
        }
        if let Some(path) = filter.path.as_deref().map(normalize_path).filter(|p| !p.is_empty()) {
            // palace always applies; a file record must be the path or below
            // it; a room applies when either path contains the other
            conditions.push(
                "(r.scope = 'palace' \
                  OR (r.scope = 'file' AND (r.scope_path = ? OR substr(r.scope_path, 1, length(?) + 1) = ? || '/')) \
                  OR (r.scope = 'room' AND (r.scope_path = ? \
                      OR substr(?, 1, length(r.scope_path) + 1) = r.scope_path || '/' \
                      OR substr(r.scope_path, 1, length(?) + 1) = ? || '/')))",
                std::iter::repeat(Value::Text(path)).take(7),
            );
        }
        conditions
    }

    fn push(&mut self, clause: &str, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.to_string());
        self.params.extend(params);
    }

    /// `" AND ..."` for appending to an existing WHERE, or empty.
    fn and(&self) -> String {
        self.clauses.iter().map(|c| format!(" AND {c}")).collect()
    }

    fn with(
        &self,
        before: impl IntoIterator<Item = Value>,
        after: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        before
            .into_iter()
            .chain(self.params.iter().cloned())
            .chain(after)
            .collect()
    }
}

/// Whether a record with `scope`/`scope_path` applies to `path`.
pub fn scope_admits(scope: Scope, scope_path: Option<&str>, path: &str) -> bool {
    let path = normalize_path(path);
    if path.is_empty() {
        return true;
    }
    let under = |inner: &str, outer: &str| {
        inner == outer || inner.strip_prefix(outer).is_some_and(|r| r.starts_with('/'))
    };
    match (scope, scope_path) {
        (Scope::Palace, _) => true,
        (Scope::File, Some(p)) => under(p, &path),
        (Scope::Room, Some(p)) => under(&path, p) || under(p, &path),
        (_, None) => false,
    }
}

impl MemoryStore {
    /// Matching records, newest first or ranked by `filter.query`.
    pub fn recall(
        &self,
        filter: &RecallFilter,
        query_embedding: Option<&[f32]>,
    ) -> StoreResult<Vec<RecallHit>> {
        recall_across(&[self], filter, query_embedding)
    }

    /// Every record matching `filter` (query and limit ignored), newest first.
    pub fn records(&self, filter: &RecallFilter) -> StoreResult<Vec<Record>> {
        let conditions = Conditions::new(filter);
        self.db.read(|conn| select(conn, &conditions, None))
    }

    fn source(&self) -> Option<&'static str> {
        self.is_corridor().then_some("corridor")
    }
}

/// Candidates one store contributes to a ranked recall.
struct Candidates {
    fts: Vec<(String, f64)>,
    substring: Vec<String>,
    semantic: Vec<(String, f64)>,
    records: Vec<Record>,
}

/// Recall over several stores as one result set.
///
/// BM25 ranks from every store are normalized together, so a weak match in
/// one store cannot outrank a stronger one in another. Limits and weights
/// come from the first store.
pub fn recall_across(
    stores: &[&MemoryStore],
    filter: &RecallFilter,
    query_embedding: Option<&[f32]>,
) -> StoreResult<Vec<RecallHit>> {
    let Some(first) = stores.first() else {
        return Ok(Vec::new());
    };
    let retrieval = &first.retrieval;
    let limit = retrieval.clamp_limit(filter.limit);
    let conditions = Conditions::new(filter);
    let query = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty());

    let Some(query) = query else {
        let mut hits = Vec::new();
        for store in stores {
            let source = store.source();
            let records = store.db.read(|conn| select(conn, &conditions, Some(limit)))?;
            hits.extend(records.into_iter().map(|record| RecallHit {
                record,
                score: None,
                source,
            }));
        }
        hits.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then_with(|| b.record.id.cmp(&a.record.id))
        });
        hits.truncate(limit);
        return Ok(hits);
    };

    let per_store = limit * 3;
    let weights = Weights::from(retrieval);
    let min_similarity = retrieval.min_similarity;

    let mut ranked_fts = Vec::new();
    let mut substring = Vec::new();
    let mut semantic: HashMap<String, f64> = HashMap::new();
    let mut records = Vec::new();
    for store in stores {
        let found = store.db.read(|conn| {
            let fts = fts_candidates(conn, query, &conditions, per_store)?;
            let substring = substring_candidates(conn, query, &conditions, per_store)?;
            let lexical: HashSet<&str> = fts
                .iter()
                .map(|(id, _)| id.as_str())
                .chain(substring.iter().map(String::as_str))
                .collect();
            let semantic: Vec<(String, f64)> = match query_embedding {
                Some(embedding) => knn_candidates(conn, embedding, per_store)?
                    .into_iter()
                    .map(|(id, distance)| (id, rank::cosine_from_l2(distance)))
                    .filter(|(id, cos)| lexical.contains(id.as_str()) || *cos >= min_similarity)
                    .collect(),
                None => Vec::new(),
            };
            let mut ids: Vec<&str> = lexical.iter().copied().collect();
            ids.extend(
                semantic
                    .iter()
                    .map(|(id, _)| id.as_str())
                    .filter(|id| !lexical.contains(id)),
            );
            let records = fetch(conn, &ids, &conditions)?;
            Ok(Candidates {
                fts,
                substring,
                semantic,
                records,
            })
        })?;
        ranked_fts.extend(found.fts);
        substring.extend(found.substring);
        semantic.extend(found.semantic);
        let source = store.source();
        records.extend(found.records.into_iter().map(|record| (record, source)));
    }

    let mut lexical: HashMap<String, f64> = rank::normalize_lexical(&ranked_fts)
        .into_iter()
        .map(|(id, score)| (id, score * FTS_SCALE))
        .collect();
    for id in substring {
        lexical.insert(id, SUBSTRING_SCORE);
    }

    let mut hits: Vec<RecallHit> = records
        .into_iter()
        .map(|(record, source)| {
            let score = rank::hybrid(
                lexical.get(&record.id).copied(),
                semantic.get(&record.id).copied(),
                weights,
            );
            RecallHit {
                record,
                score: Some(score),
                source,
            }
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .total_cmp(&a.score.unwrap_or(0.0))
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
            .then_with(|| b.record.id.cmp(&a.record.id))
    });
    hits.truncate(limit);
    Ok(hits)
}

fn select(
    conn: &Connection,
    conditions: &Conditions,
    limit: Option<usize>,
) -> StoreResult<Vec<Record>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records r WHERE 1 = 1{} \
         ORDER BY r.created_at DESC, r.id DESC LIMIT ?",
        conditions.and()
    );
    // LIMIT -1 is unbounded in SQLite
    let limit = limit.map_or(-1, |l| l as i64);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(conditions.with([], [Value::Integer(limit)])), row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn fetch(conn: &Connection, ids: &[&str], conditions: &Conditions) -> StoreResult<Vec<Record>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records r WHERE r.id IN ({placeholders}){}",
        conditions.and()
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = ids.iter().map(|id| Value::Text(id.to_string()));
    let rows = stmt
        .query_map(params_from_iter(conditions.with(ids, [])), row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn substring_candidates(
    conn: &Connection,
    query: &str,
    conditions: &Conditions,
    limit: usize,
) -> StoreResult<Vec<String>> {
    let sql = format!(
        "SELECT r.id FROM records r WHERE instr(lower(r.content), lower(?)) > 0{} \
         ORDER BY r.created_at DESC LIMIT ?",
        conditions.and()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params_from_iter(conditions.with(
                [Value::Text(query.to_string())],
                [Value::Integer(limit as i64)],
            )),
            |row| row.get(0),
        )?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

/// BM25 candidates as (id, rank), rank negative, lower is better.
fn fts_candidates(
    conn: &Connection,
    query: &str,
    conditions: &Conditions,
    limit: usize,
) -> StoreResult<Vec<(String, f64)>> {
    let expr = fts_query(query, false);
    if expr.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT r.id, bm25(records_fts) AS score \
         FROM records_fts JOIN records r ON r.rowid = records_fts.rowid \
         WHERE records_fts MATCH ?{} ORDER BY score LIMIT ?",
        conditions.and()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params_from_iter(conditions.with([Value::Text(expr)], [Value::Integer(limit as i64)])),
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn knn_candidates(
    conn: &Connection,
    embedding: &[f32],
    limit: usize,
) -> StoreResult<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM records_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![embedding_to_bytes(embedding), limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

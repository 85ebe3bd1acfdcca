use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use super::{fetch_symbols, like_under, normalize_path, split_identifier, IndexStore};
use crate::db::embedding_to_bytes;
use crate::embedding::rank::{self, Weights};
use crate::error::StoreResult;
use crate::parser::Symbol;

/// BM25 column weights: name, split terms, signature, doc comment, id.
const BM25_WEIGHTS: &str = "10.0, 6.0, 2.0, 1.0, 0.0";

/// Lexical score given to substring-only matches in fuzzy mode.
const FUZZY_SUBSTRING_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    /// Restrict to files below this directory.
    pub room: Option<String>,
    /// Prefix-match query terms and fall back to substring matches on names.
    pub fuzzy: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolHit {
    #[serde(flatten)]
    pub symbol: Symbol,
    pub score: f64,
}

impl IndexStore {
    /// Ranked symbol search. `query_embedding`, when present, blends cosine
    /// similarity into the lexical BM25 score.
    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
        query_embedding: Option<&[f32]>,
    ) -> StoreResult<Vec<SymbolHit>> {
        let limit = self.retrieval().clamp_limit(options.limit);
        let candidates = limit * 3;
        let room = options
            .room
            .as_deref()
            .map(normalize_path)
            .filter(|r| !r.is_empty());
        let weights = Weights::from(self.retrieval());
        let min_similarity = self.retrieval().min_similarity;

        self.db.read(|conn| {
            let mut lexical = rank::normalize_lexical(&fts_search(
                conn,
                query,
                options.fuzzy,
                room.as_deref(),
                candidates,
            )?);

            if options.fuzzy {
                for id in substring_search(conn, query, room.as_deref(), candidates)? {
                    lexical.entry(id).or_insert(FUZZY_SUBSTRING_SCORE);
                }
            }

            let semantic: HashMap<String, f64> = match query_embedding {
                Some(embedding) => vector_search(conn, embedding, candidates)?
                    .into_iter()
                    .map(|(id, distance)| (id, rank::cosine_from_l2(distance)))
                    .filter(|(id, cos)| lexical.contains_key(id) || *cos >= min_similarity)
                    .collect(),
                None => HashMap::new(),
            };

            let mut ids: Vec<&str> = lexical.keys().map(String::as_str).collect();
            ids.extend(
                semantic
                    .keys()
                    .filter(|id| !lexical.contains_key(*id))
                    .map(String::as_str),
            );
            let symbols = fetch_symbols(conn, &ids)?;

            let mut hits: Vec<SymbolHit> = symbols
                .into_values()
                .filter(|s| room.as_deref().map_or(true, |r| within(&s.path, r)))
                .map(|symbol| {
                    let score = rank::hybrid(
                        lexical.get(&symbol.id).copied(),
                        semantic.get(&symbol.id).copied(),
                        weights,
                    );
                    SymbolHit { symbol, score }
                })
                .collect();

            hits.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.symbol.name.cmp(&b.symbol.name))
                    .then_with(|| a.symbol.path.cmp(&b.symbol.path))
            });
            hits.truncate(limit);
            Ok(hits)
        })
    }
}

fn within(path: &str, dir: &str) -> bool {
    path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// FTS5 BM25 search. Returns (id, rank) with rank negative, lower is better.
fn fts_search(
    conn: &Connection,
    query: &str,
    fuzzy: bool,
    room: Option<&str>,
    limit: usize,
) -> StoreResult<Vec<(String, f64)>> {
    let expr = fts_query(query, fuzzy);
    if expr.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT s.id, bm25(symbols_fts, {BM25_WEIGHTS}) AS rank \
         FROM symbols_fts JOIN symbols s ON s.rowid = symbols_fts.rowid \
         WHERE symbols_fts MATCH ?1 \
           AND (?2 IS NULL OR s.path = ?2 OR s.path LIKE ?3 ESCAPE '\\') \
         ORDER BY rank LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![expr, room, room.map(like_under), limit as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Build an FTS5 expression: every query word and its identifier parts,
/// quoted, OR-ed together so BM25 rewards documents matching more of them.
pub(crate) fn fts_query(query: &str, fuzzy: bool) -> String {
    let mut terms: Vec<String> = Vec::new();
    for word in query.split_whitespace() {
        let clean: String = word.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect();
        if clean.is_empty() {
            continue;
        }
        let mut push = |t: String| {
            if !t.is_empty() && !terms.contains(&t) {
                terms.push(t);
            }
        };
        push(clean.to_lowercase());
        for part in split_identifier(&clean).split_whitespace() {
            push(part.to_string());
        }
    }
    terms
        .into_iter()
        .map(|t| if fuzzy { format!("\"{t}\"*") } else { format!("\"{t}\"") })
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn substring_search(
    conn: &Connection,
    query: &str,
    room: Option<&str>,
    limit: usize,
) -> StoreResult<Vec<String>> {
    let needle = query.trim();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let pattern = format!(
        "%{}%",
        needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let mut stmt = conn.prepare(
        "SELECT id FROM symbols s WHERE s.name LIKE ?1 ESCAPE '\\' \
           AND (?2 IS NULL OR s.path = ?2 OR s.path LIKE ?3 ESCAPE '\\') \
         ORDER BY length(s.name), s.name LIMIT ?4",
    )?;
    let rows = stmt
        .query_map(
            params![pattern, room, room.map(like_under), limit as i64],
            |row| row.get(0),
        )?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

/// KNN candidates from the vec0 table: (id, L2 distance).
fn vector_search(
    conn: &Connection,
    embedding: &[f32],
    limit: usize,
) -> StoreResult<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM symbols_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![embedding_to_bytes(embedding), limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

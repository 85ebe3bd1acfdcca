//! Bounded breadth-first traversal over the relationship table.
//!
//! Edges whose `to_id` was bound at parse time are followed directly. The rest
//! carry only a name and are matched against symbols at query time: the bare
//! name, the qualified name, or a `.`/`:`/`/`-separated suffix.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use super::{fetch_symbols, find_symbol, IndexStore, SYMBOL_COLUMNS};
use crate::error::{StoreError, StoreResult};
use crate::parser::{RelationshipKind, Symbol};

/// One reachable node, with the edge that first reached it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub kind: RelationshipKind,
    /// Hops from the starting symbol (1 = direct).
    pub depth: usize,
    /// Qualified name of the resolved symbol, or the raw target name.
    pub name: String,
    /// `None` for targets outside the index (external packages, builtins).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    /// File and line the edge was recorded at.
    pub path: String,
    pub line: u32,
}

const CALLS: &[RelationshipKind] = &[RelationshipKind::Calls];

const IMPACT: &[RelationshipKind] = &[
    RelationshipKind::Calls,
    RelationshipKind::References,
    RelationshipKind::Inherits,
    RelationshipKind::Implements,
];

impl IndexStore {
    /// Symbols that call `id`, transitively up to `depth` hops.
    pub fn callers(&self, id: &str, depth: Option<usize>) -> StoreResult<Vec<GraphEdge>> {
        let depth = self.retrieval().clamp_depth(depth);
        self.db.read(|conn| incoming(conn, id, CALLS, depth))
    }

    /// Everything that would be affected by changing `id`: callers,
    /// referrers, subclasses and implementors, transitively.
    pub fn dependents(&self, id: &str, depth: Option<usize>) -> StoreResult<Vec<GraphEdge>> {
        let depth = self.retrieval().clamp_depth(depth);
        self.db.read(|conn| incoming(conn, id, IMPACT, depth))
    }

    /// What `id` (and its members) call, reference, or extend.
    pub fn dependencies(&self, id: &str, depth: Option<usize>) -> StoreResult<Vec<GraphEdge>> {
        let depth = self.retrieval().clamp_depth(depth);
        self.db.read(|conn| outgoing(conn, id, depth))
    }

    /// File-level `imports` edges for `path`, in source order.
    pub fn file_imports(&self, path: &str) -> StoreResult<Vec<GraphEdge>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT to_name, path, line FROM relationships \
                 WHERE path = ?1 AND kind = 'imports' ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![path], |row| {
                    Ok(GraphEdge {
                        kind: RelationshipKind::Imports,
                        depth: 1,
                        name: row.get(0)?,
                        symbol: None,
                        path: row.get(1)?,
                        line: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn kinds_sql(kinds: &[RelationshipKind]) -> String {
    kinds
        .iter()
        .map(|k| format!("'{}'", k.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn last_segment(name: &str) -> &str {
    name.rsplit(['.', ':', '/']).find(|s| !s.is_empty()).unwrap_or(name)
}

fn sort_edges(edges: &mut [GraphEdge]) {
    edges.sort_by(|a, b| {
        a.kind
            .as_str()
            .cmp(b.kind.as_str())
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.depth.cmp(&b.depth))
            .then_with(|| a.path.cmp(&b.path))
    });
}

fn require(conn: &Connection, id: &str) -> StoreResult<Symbol> {
    find_symbol(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("symbol {id}")))
}

/// Walk edges pointing at the frontier, collecting their sources.
fn incoming(
    conn: &Connection,
    id: &str,
    kinds: &[RelationshipKind],
    max_depth: usize,
) -> StoreResult<Vec<GraphEdge>> {
    let origin = require(conn, id)?;
    let sql = format!(
        "SELECT r.kind, r.from_id, r.path, r.line FROM relationships r \
         WHERE r.kind IN ({}) AND r.from_id IS NOT NULL \
           AND (r.to_id = ?1 OR (r.to_id IS NULL AND ( \
                r.to_name = ?2 OR r.to_name = ?3 \
                OR substr(r.to_name, -length(?2) - 1) IN ('.' || ?2, ':' || ?2, '/' || ?2)))) \
         ORDER BY r.path, r.line",
        kinds_sql(kinds)
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut seen: HashSet<String> = HashSet::from([origin.id.clone()]);
    let mut queue: VecDeque<(Symbol, usize)> = VecDeque::from([(origin, 0)]);
    let mut edges = Vec::new();

    while let Some((target, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let rows = stmt
            .query_map(params![target.id, target.name, target.qualified_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let fresh: Vec<&str> = rows
            .iter()
            .map(|(_, from, _, _)| from.as_str())
            .filter(|from| !seen.contains(*from))
            .collect();
        let sources = fetch_symbols(conn, &fresh)?;

        for (kind, from, path, line) in rows {
            if !seen.insert(from.clone()) {
                continue;
            }
            let Some(source) = sources.get(&from) else {
                continue;
            };
            let Some(kind) = RelationshipKind::parse(&kind) else {
                continue;
            };
            edges.push(GraphEdge {
                kind,
                depth: depth + 1,
                name: source.qualified_name.clone(),
                symbol: Some(source.clone()),
                path,
                line,
            });
            queue.push_back((source.clone(), depth + 1));
        }
    }

    sort_edges(&mut edges);
    Ok(edges)
}

/// Walk edges leaving the frontier (and the frontier's members).
fn outgoing(conn: &Connection, id: &str, max_depth: usize) -> StoreResult<Vec<GraphEdge>> {
    let origin = require(conn, id)?;
    let edge_sql = format!(
        "SELECT kind, to_id, to_name, path, line FROM relationships \
         WHERE from_id = ?1 AND kind IN ({}) ORDER BY id",
        kinds_sql(IMPACT)
    );
    let mut edge_stmt = conn.prepare(&edge_sql)?;
    let by_name_sql = format!(
        "SELECT {SYMBOL_COLUMNS} FROM symbols s WHERE s.name = ?1 OR s.qualified_name = ?2 \
         ORDER BY (s.path = ?3) DESC, s.path, s.ordinal LIMIT 1"
    );
    let mut by_name = conn.prepare(&by_name_sql)?;

    let origin_id = origin.id.clone();
    let mut visited: HashSet<String> = HashSet::from([origin.id.clone()]);
    let mut reported: HashSet<(RelationshipKind, String)> = HashSet::new();
    let mut queue: VecDeque<(Symbol, usize)> = VecDeque::from([(origin, 0)]);
    let mut edges = Vec::new();

    while let Some((source, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let mut from_ids = vec![source.id.clone()];
        from_ids.extend(source.children.iter().cloned());

        for from in &from_ids {
            let rows = edge_stmt
                .query_map(params![from], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for (kind, to_id, to_name, path, line) in rows {
                let Some(kind) = RelationshipKind::parse(&kind) else {
                    continue;
                };
                let target = match to_id {
                    Some(to_id) => find_symbol(conn, &to_id)?,
                    None => {
                        let short = last_segment(&to_name);
                        let mut rows =
                            by_name.query_map(params![short, to_name, path], super::row_to_symbol)?;
                        let found = rows.next().transpose()?;
                        found
                    }
                };
                // a symbol's own members and the origin are never its dependencies
                if target.as_ref().is_some_and(|t| t.id == origin_id || from_ids.contains(&t.id)) {
                    continue;
                }
                let key = target.as_ref().map_or_else(|| to_name.clone(), |t| t.id.clone());
                if !reported.insert((kind, key)) {
                    continue;
                }
                let name = target
                    .as_ref()
                    .map_or_else(|| to_name.clone(), |t| t.qualified_name.clone());
                if let Some(target) = &target {
                    if visited.insert(target.id.clone()) {
                        queue.push_back((target.clone(), depth + 1));
                    }
                }
                edges.push(GraphEdge {
                    kind,
                    depth: depth + 1,
                    name,
                    symbol: target,
                    path,
                    line,
                });
            }
        }
    }

    sort_edges(&mut edges);
    Ok(edges)
}

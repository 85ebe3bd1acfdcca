//! Index exploration: search, listing, and graph traversal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{blocking, reply, PalaceTools};
use crate::error::{StoreError, StoreResult, ToolError};
use crate::index::{GraphEdge, IndexStore, SearchOptions, SymbolFilter};
use crate::parser::{Symbol, SymbolKind};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExploreParams {
    #[schemars(description = "Identifier, words, or a fragment of a signature or doc comment.")]
    pub query: String,

    #[schemars(description = "Maximum results. Capped by the server.")]
    pub limit: Option<usize>,

    #[schemars(description = "Only symbols in files below this directory.")]
    pub room: Option<String>,

    #[schemars(description = "Prefix-match terms and fall back to substring matches on names.")]
    pub fuzzy: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExploreSymbolsParams {
    #[schemars(description = "A file, or a directory to list recursively.")]
    pub path: Option<String>,

    #[schemars(description = "function, method, class, variable, interface, enum, namespace, or type.")]
    pub kind: Option<SymbolKind>,

    #[schemars(description = "Case-sensitive name prefix.")]
    pub prefix: Option<String>,

    #[schemars(description = "Only exported symbols.")]
    pub exported_only: Option<bool>,

    #[schemars(description = "Maximum results. Capped by the server.")]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExploreDepsParams {
    #[schemars(description = "Symbol id or name. Takes precedence over path.")]
    pub symbol: Option<String>,

    #[schemars(description = "File whose imports to list.")]
    pub path: Option<String>,

    #[schemars(description = "Traversal depth. Capped by the server.")]
    pub depth: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExploreCallersParams {
    #[schemars(description = "Symbol id or name.")]
    pub symbol: String,

    #[schemars(description = "Traversal depth. Capped by the server.")]
    pub depth: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExploreImpactParams {
    #[schemars(description = "Symbol id or name.")]
    pub symbol: String,

    #[schemars(description = "Traversal depth. Capped by the server.")]
    pub depth: Option<usize>,
}

/// Edges reached from one resolved symbol. A name can resolve to several
/// symbols (overloads, same name in different files); each gets its own.
#[derive(Debug, Serialize)]
pub struct Traversal {
    pub target: Symbol,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Serialize)]
struct Listing<T> {
    results: Vec<T>,
    count: usize,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(results: Vec<T>) -> Self {
        Self {
            count: results.len(),
            results,
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Callers,
    Impact,
    Dependencies,
}

/// Resolve `reference` and walk the graph from every match.
fn traverse(
    index: &IndexStore,
    reference: &str,
    direction: Direction,
    depth: Option<usize>,
) -> StoreResult<Vec<Traversal>> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(StoreError::Invalid {
            field: "symbol",
            message: "must not be blank".into(),
        });
    }
    let targets = index.resolve(reference)?;
    if targets.is_empty() {
        return Err(StoreError::NotFound(format!("symbol '{reference}'")));
    }
    targets
        .into_iter()
        .map(|target| {
            let edges = match direction {
                Direction::Callers => index.callers(&target.id, depth)?,
                Direction::Impact => index.dependents(&target.id, depth)?,
                Direction::Dependencies => index.dependencies(&target.id, depth)?,
            };
            Ok(Traversal { target, edges })
        })
        .collect()
}

impl PalaceTools {
    pub(super) async fn explore(&self, params: ExploreParams) -> Result<Value, ToolError> {
        let query = params.query.trim().to_string();
        if query.is_empty() {
            return Err(ToolError::invalid("query", "must not be blank"));
        }
        let embedding = self.query_vector(&query).await;
        let options = SearchOptions {
            limit: params.limit,
            room: params.room,
            fuzzy: params.fuzzy.unwrap_or(false),
        };
        let index = Arc::clone(&self.index);
        let hits = blocking(move || index.search(&query, &options, embedding.as_deref())).await?;
        reply(Listing::from(hits))
    }

    pub(super) async fn explore_symbols(
        &self,
        params: ExploreSymbolsParams,
    ) -> Result<Value, ToolError> {
        let filter = SymbolFilter {
            path: params.path,
            kind: params.kind,
            prefix: params.prefix.filter(|p| !p.is_empty()),
            exported_only: params.exported_only.unwrap_or(false),
            limit: Some(self.config.retrieval.clamp_limit(params.limit)),
        };
        let index = Arc::clone(&self.index);
        let symbols = blocking(move || index.list_symbols(&filter)).await?;
        reply(Listing::from(symbols))
    }

    pub(super) async fn explore_deps(&self, params: ExploreDepsParams) -> Result<Value, ToolError> {
        let index = Arc::clone(&self.index);
        let depth = params.depth;
        match (params.symbol, params.path) {
            (Some(symbol), _) => {
                let found = blocking(move || {
                    traverse(&index, &symbol, Direction::Dependencies, depth)
                })
                .await?;
                reply(Listing::from(found))
            }
            (None, Some(path)) => {
                let path = crate::index::normalize_path(&path);
                let imports = blocking(move || index.file_imports(&path)).await?;
                reply(Listing::from(imports))
            }
            (None, None) => Err(ToolError::missing("symbol")),
        }
    }

    pub(super) async fn explore_callers(
        &self,
        params: ExploreCallersParams,
    ) -> Result<Value, ToolError> {
        let index = Arc::clone(&self.index);
        let found = blocking(move || {
            traverse(&index, &params.symbol, Direction::Callers, params.depth)
        })
        .await?;
        reply(Listing::from(found))
    }

    pub(super) async fn explore_impact(
        &self,
        params: ExploreImpactParams,
    ) -> Result<Value, ToolError> {
        let index = Arc::clone(&self.index);
        let found = blocking(move || {
            traverse(&index, &params.symbol, Direction::Impact, params.depth)
        })
        .await?;
        reply(Listing::from(found))
    }
}

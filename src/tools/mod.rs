//! Tool catalog and dispatch.
//!
//! Every tool takes a `#[derive(JsonSchema)]` params struct. The generated
//! schema is both what `initialize` advertises and what required-field
//! validation reads, so the two cannot drift apart.

pub mod briefing;
pub mod explore;
pub mod memory;
pub mod rescan;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PalaceConfig;
use crate::embedding::embed_query;
use crate::error::{StoreResult, ToolError};
use crate::index::{Indexer, IndexStore};
use crate::memory::MemoryStore;
use crate::provider::{CompletionProvider, EmbeddingProvider};

use briefing::BriefingParams;
use explore::{
    ExploreCallersParams, ExploreDepsParams, ExploreImpactParams, ExploreParams,
    ExploreSymbolsParams,
};
use memory::{ForgetParams, PromoteParams, RecallParams, ReflectParams, StoreParams};
use rescan::RescanParams;

/// One entry of the advertised tool catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn describe<P: JsonSchema>(name: &'static str, description: &'static str) -> ToolDescriptor {
    ToolDescriptor {
        name,
        description,
        input_schema: schemars::schema_for!(P).to_value(),
    }
}

/// Every tool the server exposes, in a stable order.
pub fn catalog() -> Vec<ToolDescriptor> {
    vec![
        describe::<StoreParams>(
            "store",
            "Store a knowledge record (idea, decision, learning, postmortem, custom). \
             Kind is classified from the content when omitted.",
        ),
        describe::<RecallParams>(
            "recall",
            "Recall records by kind, tags, path, or a free-text query. \
             Newest first without a query; ranked by relevance with one.",
        ),
        describe::<ReflectParams>(
            "reflect",
            "Summarize records: counts by kind and scope, recurring tags and terms, \
             and decisions that contradict each other.",
        ),
        describe::<ForgetParams>("forget", "Permanently delete a record by id."),
        describe::<PromoteParams>(
            "promote",
            "Copy a workspace record into the cross-workspace corridor. Idempotent.",
        ),
        describe::<ExploreParams>(
            "explore",
            "Search indexed symbols by name, terms, signature, and docs.",
        ),
        describe::<ExploreImpactParams>(
            "explore_impact",
            "Symbols affected by changing a symbol: callers, referrers, subclasses, implementors.",
        ),
        describe::<ExploreSymbolsParams>(
            "explore_symbols",
            "List symbols by file or directory, kind, and name prefix.",
        ),
        describe::<ExploreDepsParams>(
            "explore_deps",
            "What a symbol depends on, or the imports of a file.",
        ),
        describe::<ExploreCallersParams>(
            "explore_callers",
            "Symbols that call a symbol, transitively.",
        ),
        describe::<RescanParams>(
            "rescan",
            "Re-index a file or directory (the whole workspace by default).",
        ),
        describe::<BriefingParams>(
            "briefing",
            "Synthesized briefing on the workspace, a file, a directory, or a task, \
             combining recalled records and indexed symbols.",
        ),
    ]
}

/// Shared handles every tool call runs against. Cheap to clone.
#[derive(Clone)]
pub struct PalaceTools {
    config: Arc<PalaceConfig>,
    index: Arc<IndexStore>,
    indexer: Arc<Indexer>,
    memory: Arc<MemoryStore>,
    corridor: Option<Arc<MemoryStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    completer: Option<Arc<dyn CompletionProvider>>,
}

impl PalaceTools {
    pub fn new(config: Arc<PalaceConfig>, indexer: Arc<Indexer>, memory: Arc<MemoryStore>) -> Self {
        Self {
            config,
            index: Arc::clone(indexer.store()),
            indexer,
            memory,
            corridor: None,
            embedder: None,
            completer: None,
        }
    }

    pub fn with_corridor(mut self, corridor: Option<Arc<MemoryStore>>) -> Self {
        self.corridor = corridor;
        self
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_completer(mut self, completer: Option<Arc<dyn CompletionProvider>>) -> Self {
        self.completer = completer;
        self
    }

    pub fn config(&self) -> &PalaceConfig {
        &self.config
    }

    /// Validate `arguments` against tool `name` and run it.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        tracing::debug!(tool = name, "tool call");
        match name {
            "store" => self.store(parse(arguments)?).await,
            "recall" => self.recall(parse(arguments)?).await,
            "reflect" => self.reflect(parse(arguments)?).await,
            "forget" => self.forget(parse(arguments)?).await,
            "promote" => self.promote(parse(arguments)?).await,
            "explore" => self.explore(parse(arguments)?).await,
            "explore_impact" => self.explore_impact(parse(arguments)?).await,
            "explore_symbols" => self.explore_symbols(parse(arguments)?).await,
            "explore_deps" => self.explore_deps(parse(arguments)?).await,
            "explore_callers" => self.explore_callers(parse(arguments)?).await,
            "rescan" => self.rescan(parse(arguments)?).await,
            "briefing" => self.briefing(parse(arguments)?).await,
            other => Err(ToolError::MethodNotFound(format!("tool '{other}'"))),
        }
    }

    /// Embed a search query if a provider is configured; `None` degrades to
    /// lexical ranking.
    async fn query_vector(&self, query: &str) -> Option<Vec<f32>> {
        let timeout = Duration::from_millis(self.config.embedding.timeout_ms);
        embed_query(self.embedder.as_ref(), query, timeout).await
    }
}

/// Check the fields `P`'s schema marks required, then deserialize.
pub fn parse<P: DeserializeOwned + JsonSchema>(arguments: Value) -> Result<P, ToolError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        Value::Object(_) => arguments,
        _ => {
            return Err(ToolError::InvalidParams {
                field: None,
                message: "arguments must be an object".into(),
                kind: "invalid_params",
            })
        }
    };
    let schema = schemars::schema_for!(P);
    if let Some(required) = schema.as_value().get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if arguments.get(field).map_or(true, Value::is_null) {
                return Err(ToolError::missing(field));
            }
        }
    }
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidParams {
        field: None,
        message: e.to_string(),
        kind: "invalid_params",
    })
}

/// Run a synchronous store operation on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ToolError>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(ToolError::internal)?
        .map_err(ToolError::from)
}

fn reply(value: impl Serialize) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(ToolError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordKind;

    #[test]
    fn catalog_lists_every_tool_once() {
        let names: Vec<&str> = catalog().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            [
                "store",
                "recall",
                "reflect",
                "forget",
                "promote",
                "explore",
                "explore_impact",
                "explore_symbols",
                "explore_deps",
                "explore_callers",
                "rescan",
                "briefing"
            ]
        );
    }

    #[test]
    fn schemas_mark_required_fields() {
        let tools = catalog();
        let required = |name: &str| {
            tools
                .iter()
                .find(|t| t.name == name)
                .and_then(|t| t.input_schema.get("required").cloned())
                .unwrap_or(Value::Array(Vec::new()))
        };
        assert_eq!(required("store"), serde_json::json!(["content"]));
        assert_eq!(required("forget"), serde_json::json!(["id"]));
        assert_eq!(required("explore"), serde_json::json!(["query"]));
        assert_eq!(required("explore_callers"), serde_json::json!(["symbol"]));
        assert_eq!(required("recall"), serde_json::json!([]));
    }

    #[test]
    fn missing_required_field_is_named() {
        let err = parse::<StoreParams>(serde_json::json!({"as": "idea"})).unwrap_err();
        match err {
            ToolError::InvalidParams { field, .. } => assert_eq!(field.as_deref(), Some("content")),
            other => panic!("unexpected {other:?}"),
        }
        let err = parse::<ForgetParams>(serde_json::json!({"id": null})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { field: Some(ref f), .. } if f == "id"));
    }

    #[test]
    fn kind_accepts_as_and_kind() {
        let a: StoreParams = parse(serde_json::json!({"content": "x", "as": "idea"})).unwrap();
        let b: StoreParams =
            parse(serde_json::json!({"content": "x", "kind": "decision"})).unwrap();
        assert_eq!(a.kind, Some(RecordKind::Idea));
        assert_eq!(b.kind, Some(RecordKind::Decision));
        assert!(parse::<StoreParams>(serde_json::json!({"content": "x", "as": "memo"})).is_err());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert!(parse::<RecallParams>(serde_json::json!([1, 2])).is_err());
        assert!(parse::<RecallParams>(Value::Null).is_ok());
    }
}

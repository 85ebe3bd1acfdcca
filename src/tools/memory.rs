//! `store`, `recall`, `reflect`, `forget`, and `promote`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{blocking, reply, PalaceTools};
use crate::error::ToolError;
use crate::memory::{promote, recall_across, NewRecord, RecallFilter, RecallHit, RecordKind, Scope};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoreParams {
    #[schemars(description = "The knowledge to record. Must not be blank.")]
    pub content: String,

    #[serde(rename = "as", alias = "kind", default)]
    #[schemars(description = "Record kind: idea, decision, learning, postmortem, or custom. Classified from content when omitted.")]
    pub kind: Option<RecordKind>,

    #[serde(default)]
    #[schemars(description = "Free-form labels. Blank entries are dropped and duplicates collapsed.")]
    pub tags: Vec<String>,

    #[schemars(description = "palace (whole workspace), room (a directory), or file. Inferred from scopePath when omitted.")]
    pub scope: Option<Scope>,

    #[schemars(description = "Workspace-relative directory or file. Required when scope is room or file.")]
    pub scope_path: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecallParams {
    #[schemars(description = "Only records of this kind.")]
    pub kind: Option<RecordKind>,

    #[serde(default)]
    #[schemars(description = "Only records carrying every one of these tags.")]
    pub tags: Vec<String>,

    #[schemars(description = "Free-text query. Results are ranked by relevance when given.")]
    pub query: Option<String>,

    #[schemars(description = "Only records that apply to this file or directory.")]
    pub path: Option<String>,

    #[schemars(description = "Only records with this scope.")]
    pub scope: Option<Scope>,

    #[schemars(description = "Maximum results. Capped by the server.")]
    pub limit: Option<usize>,

    #[schemars(description = "Also search records promoted to the cross-workspace corridor.")]
    pub include_corridor: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReflectParams {
    #[schemars(description = "Restrict to records that apply to this file or directory.")]
    pub context: Option<String>,

    #[schemars(description = "Restrict to one kind.")]
    pub kind: Option<RecordKind>,

    #[serde(default)]
    #[schemars(description = "Restrict to records carrying every one of these tags.")]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ForgetParams {
    #[schemars(description = "Id of the record to delete.")]
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PromoteParams {
    #[schemars(description = "Id of the workspace record to copy into the corridor.")]
    pub id: String,
}

#[derive(Debug, Serialize)]
struct RecallReply {
    records: Vec<RecallHit>,
    count: usize,
}

impl PalaceTools {
    pub(super) async fn store(&self, params: StoreParams) -> Result<Value, ToolError> {
        let memory = Arc::clone(&self.memory);
        let input = NewRecord {
            content: params.content,
            kind: params.kind,
            scope: params.scope,
            scope_path: params.scope_path,
            tags: params.tags,
            origin: None,
        };
        let record = blocking(move || memory.store(input)).await?;
        tracing::info!(id = %record.id, kind = record.kind.as_str(), "record stored");
        reply(record)
    }

    pub(super) async fn recall(&self, params: RecallParams) -> Result<Value, ToolError> {
        let limit = self.config.retrieval.clamp_limit(params.limit);
        let query = params
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(String::from);
        let embedding = match &query {
            Some(q) => self.query_vector(q).await,
            None => None,
        };
        let filter = RecallFilter {
            kind: params.kind,
            tags: params.tags,
            query: query.clone(),
            path: params.path,
            scope: params.scope,
            limit: Some(limit),
        };
        let corridor = match (params.include_corridor.unwrap_or(false), &self.corridor) {
            (true, Some(corridor)) => Some(Arc::clone(corridor)),
            (true, None) => {
                tracing::debug!("corridor requested but disabled");
                None
            }
            _ => None,
        };

        let memory = Arc::clone(&self.memory);
        let hits = blocking(move || {
            let mut stores = vec![&*memory];
            if let Some(corridor) = corridor.as_deref() {
                stores.push(corridor);
            }
            recall_across(&stores, &filter, embedding.as_deref())
        })
        .await?;
        tracing::debug!(count = hits.len(), query = query.is_some(), "recall complete");
        reply(RecallReply {
            count: hits.len(),
            records: hits,
        })
    }

    pub(super) async fn reflect(&self, params: ReflectParams) -> Result<Value, ToolError> {
        let memory = Arc::clone(&self.memory);
        let filter = RecallFilter {
            kind: params.kind,
            tags: params.tags,
            path: params.context,
            ..Default::default()
        };
        let reflection = blocking(move || memory.reflect(&filter)).await?;
        reply(reflection)
    }

    pub(super) async fn forget(&self, params: ForgetParams) -> Result<Value, ToolError> {
        let memory = Arc::clone(&self.memory);
        let result = blocking(move || memory.forget(&params.id)).await?;
        tracing::info!(id = %result.id, "record forgotten");
        reply(result)
    }

    pub(super) async fn promote(&self, params: PromoteParams) -> Result<Value, ToolError> {
        let Some(corridor) = self.corridor.clone() else {
            return Err(ToolError::InvalidParams {
                field: None,
                message: "the corridor is disabled (storage.corridor_enabled = false)".into(),
                kind: "corridor_disabled",
            });
        };
        let memory = Arc::clone(&self.memory);
        let origin = self.indexer.root().to_string_lossy().into_owned();
        let promotion = blocking(move || promote(&memory, &corridor, &params.id, &origin)).await?;
        reply(promotion)
    }
}

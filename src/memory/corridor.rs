//! Promotion of workspace records into the cross-workspace corridor.

use serde::Serialize;

use super::store::MemoryStore;
use super::types::{NewRecord, Record};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    /// The corridor copy.
    pub record: Record,
    /// False when the record had already been promoted.
    pub created: bool,
}

/// Copy record `id` from `workspace` into `corridor`, tagged with `origin`.
///
/// The workspace copy is left alone. Promoting the same content from the
/// same origin again returns the existing corridor record.
pub fn promote(
    workspace: &MemoryStore,
    corridor: &MemoryStore,
    id: &str,
    origin: &str,
) -> StoreResult<Promotion> {
    let id = id.trim();
    if id.is_empty() {
        return Err(StoreError::IdRequired);
    }
    let source = workspace
        .get(id)?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    let (record, created) = corridor.store_once(NewRecord {
        content: source.content,
        kind: Some(source.kind),
        scope: Some(source.scope),
        scope_path: source.scope_path,
        tags: source.tags,
        origin: Some(origin.to_string()),
    })?;
    tracing::info!(id, corridor_id = %record.id, created, origin, "record promoted");
    Ok(Promotion { record, created })
}

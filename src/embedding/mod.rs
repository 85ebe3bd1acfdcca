//! Background embedding pipeline.
//!
//! Writes to the index and memory stores enqueue a [`JobKey`]; a fixed pool
//! of workers pulls keys, asks the owning store for the text to embed through
//! an [`EmbeddingSink`], calls the provider on the blocking pool, and writes
//! the normalized vector back. Nothing on the write path waits for it.

pub mod queue;
pub mod rank;
pub mod worker;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreResult;
use crate::provider::EmbeddingProvider;

pub use queue::{Enqueued, JobQueue, JobState, JobStatus, QueueStats};
pub use worker::{EmbeddingPipeline, RetryPolicy, SinkSet};

/// Which store owns the row being embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Symbol,
    Record,
    CorridorRecord,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symbol => "symbol",
            Self::Record => "record",
            Self::CorridorRecord => "corridor_record",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobKey {
    #[serde(rename = "targetType")]
    pub target: TargetType,
    #[serde(rename = "targetId")]
    pub id: String,
}

impl JobKey {
    pub fn new(target: TargetType, id: impl Into<String>) -> Self {
        Self { target, id: id.into() }
    }

    pub fn symbol(id: impl Into<String>) -> Self {
        Self::new(TargetType::Symbol, id)
    }

    pub fn record(id: impl Into<String>) -> Self {
        Self::new(TargetType::Record, id)
    }

    pub fn corridor_record(id: impl Into<String>) -> Self {
        Self::new(TargetType::CorridorRecord, id)
    }
}

/// Text a row should be embedded from, with the hashes that decide whether
/// the work is still needed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSource {
    pub text: String,
    pub content_hash: String,
    pub embedded_hash: Option<String>,
}

impl EmbeddingSource {
    pub fn is_current(&self) -> bool {
        self.embedded_hash.as_deref() == Some(self.content_hash.as_str())
    }
}

/// A store that owns embeddable rows.
pub trait EmbeddingSink: Send + Sync {
    /// `None` when the row no longer exists.
    fn source(&self, id: &str) -> StoreResult<Option<EmbeddingSource>>;

    /// Persist `vector` for `id` if its content still hashes to
    /// `content_hash`. Returns whether it was written.
    fn store(&self, id: &str, content_hash: &str, vector: &[f32]) -> StoreResult<bool>;

    /// Width of the vector column.
    fn dimensions(&self) -> usize;
}

/// Embed a search query on the blocking pool.
///
/// Any failure (no provider, provider error, timeout) yields `None` so the
/// caller falls back to lexical ranking.
pub async fn embed_query(
    provider: Option<&Arc<dyn EmbeddingProvider>>,
    text: &str,
    timeout: Duration,
) -> Option<Vec<f32>> {
    let provider = Arc::clone(provider?);
    let text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    let task = tokio::task::spawn_blocking(move || provider.embed(&text));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(vector))) => Some(crate::provider::l2_normalize(&vector)),
        Ok(Ok(Err(e))) => {
            tracing::warn!(error = %e, "query embedding failed, using lexical ranking");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "query embedding task panicked");
            None
        }
        Err(_) => {
            tracing::warn!(?timeout, "query embedding timed out, using lexical ranking");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl EmbeddingProvider for Fixed {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![3.0, 4.0])
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_id(&self) -> &str {
            "fixed"
        }
    }

    struct Broken;

    impl EmbeddingProvider for Broken {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("offline")
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_id(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn query_embeddings_are_normalized() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(Fixed);
        let v = embed_query(Some(&provider), "hello", Duration::from_secs(1)).await.unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_embedding_degrades_to_none() {
        let broken: Arc<dyn EmbeddingProvider> = Arc::new(Broken);
        assert!(embed_query(Some(&broken), "hello", Duration::from_secs(1)).await.is_none());
        assert!(embed_query(None, "hello", Duration::from_secs(1)).await.is_none());
        let fixed: Arc<dyn EmbeddingProvider> = Arc::new(Fixed);
        assert!(embed_query(Some(&fixed), "   ", Duration::from_secs(1)).await.is_none());
    }

    #[test]
    fn job_keys_serialize_with_target_names() {
        let json = serde_json::to_value(JobKey::corridor_record("r1")).unwrap();
        assert_eq!(json, serde_json::json!({"targetType": "corridor_record", "targetId": "r1"}));
    }
}

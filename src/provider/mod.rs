//! Pluggable model backends: text embeddings and chat completions.
//!
//! Both traits are synchronous. Callers in async contexts must go through
//! `tokio::task::spawn_blocking`; the remote implementations rely on that and
//! drive their HTTP futures with a captured runtime handle.

pub mod local;
pub mod remote;

use anyhow::Result;
use std::sync::Arc;

use crate::config::{BriefingConfig, EmbeddingConfig};

/// Text-to-vector model.
///
/// Implementations return vectors of exactly [`dimensions`](Self::dimensions)
/// entries. The pipeline L2-normalizes whatever comes back.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;

    /// Identifier stored alongside vectors to detect model changes.
    fn model_id(&self) -> &str;
}

/// Prompt-to-prose model backing `briefing`.
pub trait CompletionProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;

    fn model_id(&self) -> &str;
}

/// Build the configured embedding provider. `"none"` disables semantic ranking.
pub fn create_embedding_provider(
    config: &EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "local" => Ok(Some(Arc::new(local::LocalEmbeddingProvider::new(config)?))),
        "remote" => Ok(Some(Arc::new(remote::RemoteEmbeddingProvider::new(config)?))),
        "none" => Ok(None),
        other => {
            anyhow::bail!("unknown embedding provider: {other}. Supported: local, remote, none")
        }
    }
}

/// Build the configured completion provider for briefings.
pub fn create_completion_provider(
    config: &BriefingConfig,
) -> Result<Option<Arc<dyn CompletionProvider>>> {
    match config.provider.as_str() {
        "remote" => Ok(Some(Arc::new(remote::RemoteCompletionProvider::new(config)?))),
        "none" => Ok(None),
        other => anyhow::bail!("unknown briefing provider: {other}. Supported: remote, none"),
    }
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

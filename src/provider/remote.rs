//! OpenAI-compatible HTTP providers (`/embeddings`, `/chat/completions`).

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::runtime::Handle;

use super::{CompletionProvider, EmbeddingProvider};
use crate::config::{BriefingConfig, EmbeddingConfig};

fn api_key(env: &str) -> Option<String> {
    std::env::var(env).ok().filter(|k| !k.is_empty())
}

fn client(timeout_ms: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .context("failed to build HTTP client")
}

/// Runtime handle used to drive requests from blocking-pool threads.
fn runtime() -> Result<Handle> {
    Handle::try_current().context("remote providers must be created inside a tokio runtime")
}

pub struct RemoteEmbeddingProvider {
    client: Client,
    handle: Handle,
    url: String,
    api_key: Option<String>,
    model: String,
    model_id: String,
    dimensions: usize,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: client(config.timeout_ms)?,
            handle: runtime()?,
            url: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            api_key: api_key(&config.api_key_env),
            model: config.model.clone(),
            model_id: format!("remote:{}", config.model),
            dimensions: config.dimensions,
        })
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimensions,
        });
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let json: Value = req.send().await?.error_for_status()?.json().await?;
        parse_embedding_response(json)
    }
}

impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .context("embedding response was empty")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.handle.block_on(self.request(texts))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// `data[*].embedding`, reordered by `data[*].index` when present.
fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .context("embedding response is missing the data array")?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(fallback);
        let values = item
            .get("embedding")
            .and_then(Value::as_array)
            .context("embedding item is missing its vector")?;
        let vector = values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32).context("embedding values must be numeric"))
            .collect::<Result<Vec<f32>>>()?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

pub struct RemoteCompletionProvider {
    client: Client,
    handle: Handle,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl RemoteCompletionProvider {
    pub fn new(config: &BriefingConfig) -> Result<Self> {
        Ok(Self {
            client: client(config.timeout_ms)?,
            handle: runtime()?,
            url: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: api_key(&config.api_key_env),
            model: config.model.clone(),
        })
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": "You brief software engineers on a codebase. Be concise and concrete." },
                { "role": "user", "content": prompt },
            ],
        });
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let json: Value = req.send().await?.error_for_status()?.json().await?;
        parse_completion_response(&json)
    }
}

impl CompletionProvider for RemoteCompletionProvider {
    fn complete(&self, prompt: &str) -> Result<String> {
        self.handle.block_on(self.request(prompt))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn parse_completion_response(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .context("completion response has no message content")
}

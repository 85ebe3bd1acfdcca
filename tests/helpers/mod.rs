#![allow(dead_code)]

use anyhow::Result;
use palace::config::PalaceConfig;
use palace::provider::{CompletionProvider, EmbeddingProvider};
use palace::server::{serve_connection, Services};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::task::JoinHandle;

pub const DIMS: usize = 8;

/// Config rooted at `root`, with every database under it and no providers.
pub fn test_config(root: &Path) -> PalaceConfig {
    let mut config = PalaceConfig::default();
    config.workspace.root = root.to_string_lossy().into_owned();
    config.workspace.scan_on_start = false;
    config.storage.corridor_path = root.join("corridor.db").to_string_lossy().into_owned();
    config.storage.read_connections = 2;
    config.embedding.provider = "none".into();
    config.embedding.dimensions = DIMS;
    config.embedding.max_attempts = 2;
    config.embedding.base_backoff_ms = 1;
    config.embedding.max_backoff_ms = 5;
    config.server.request_timeout_ms = 5_000;
    config
}

pub fn services(root: &Path) -> Services {
    Services::assemble(test_config(root), None, None).unwrap()
}

/// Write `contents` to `rel` below `root`, creating directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Bag-of-words embedder: texts sharing words get similar vectors.
#[derive(Default)]
pub struct StubEmbedder {
    pub calls: AtomicUsize,
}

impl EmbeddingProvider for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0.0f32; DIMS];
        v[0] = 0.01;
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let bucket = word.to_lowercase().bytes().map(usize::from).sum::<usize>() % DIMS;
            v[bucket] += 1.0;
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> &str {
        "stub:bag-of-words"
    }
}

/// Embedder whose every call fails.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("model offline")
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> &str {
        "stub:failing"
    }
}

/// Completion provider that echoes the first line of its prompt.
pub struct StubCompleter;

impl CompletionProvider for StubCompleter {
    fn complete(&self, prompt: &str) -> Result<String> {
        Ok(format!("stub briefing ({} chars of material)", prompt.len()))
    }

    fn model_id(&self) -> &str {
        "stub:completer"
    }
}

/// Completion provider that blocks for `delay`, then counts the finished call.
pub struct SlowCompleter {
    pub delay: Duration,
    pub finished: AtomicUsize,
}

impl SlowCompleter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            finished: AtomicUsize::new(0),
        }
    }
}

impl CompletionProvider for SlowCompleter {
    fn complete(&self, _prompt: &str) -> Result<String> {
        std::thread::sleep(self.delay);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok("slow briefing".into())
    }

    fn model_id(&self) -> &str {
        "stub:slow"
    }
}

/// In-process JSON-RPC client over a duplex pipe.
pub struct Client {
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    next_id: i64,
    pub server: JoinHandle<Result<()>>,
}

impl Client {
    pub fn connect(services: &Services) -> Self {
        let (client, server) = tokio::io::duplex(1 << 16);
        let (server_read, server_write) = tokio::io::split(server);
        let server = tokio::spawn(serve_connection(services.tools(), server_read, server_write));
        let (read, writer) = tokio::io::split(client);
        Self {
            writer,
            lines: BufReader::new(read).lines(),
            next_id: 0,
            server,
        }
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.send_bytes(line.as_bytes()).await;
    }

    pub async fn send_bytes(&mut self, line: &[u8]) {
        self.writer.write_all(line).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
            .await
            .expect("timed out waiting for a response")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        let response = self.recv().await;
        assert_eq!(response["id"], json!(id));
        response
    }

    pub async fn initialize(&mut self) -> Value {
        let response = self.request("initialize", json!({"protocolVersion": "2025-06-18"})).await;
        self.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
        response
    }

    /// Call a tool and return the whole response.
    pub async fn call(&mut self, tool: &str, arguments: Value) -> Value {
        self.request("tools/call", json!({"name": tool, "arguments": arguments})).await
    }

    /// Call a tool that must succeed and return its structured content.
    pub async fn call_ok(&mut self, tool: &str, arguments: Value) -> Value {
        let response = self.call(tool, arguments).await;
        assert!(response.get("error").is_none(), "{tool} failed: {response}");
        response["result"]["structuredContent"].clone()
    }
}

/// Error code of a failed response.
pub fn error_code(response: &Value) -> i64 {
    response["error"]["code"].as_i64().unwrap_or_else(|| panic!("not an error: {response}"))
}

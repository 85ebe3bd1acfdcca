use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PalaceConfig {
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub briefing: BriefingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// `"stdio"` or `"socket"`.
    pub transport: String,
    pub socket_path: String,
    pub log_level: String,
    /// Per-request deadline for `tools/call`.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: String,
    /// Directory (relative to `root` unless absolute) holding the workspace databases.
    pub data_dir: String,
    pub scan_on_start: bool,
    /// Files larger than this are skipped by the scanner.
    pub max_file_bytes: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub corridor_enabled: bool,
    pub corridor_path: String,
    /// Reader connections per database (writer is always a single connection).
    pub read_connections: usize,
    /// Bounded retries for SQLITE_BUSY / SQLITE_LOCKED before surfacing an error.
    pub busy_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"local"`, `"remote"`, or `"none"`.
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub dimensions: usize,
    pub api_base: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    /// Hard cap applied silently to every caller-supplied `limit`.
    pub max_limit: usize,
    pub lexical_weight: f64,
    pub semantic_weight: f64,
    /// Semantic-only candidates below this cosine similarity are dropped.
    pub min_similarity: f64,
    pub default_depth: usize,
    pub max_depth: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BriefingConfig {
    /// `"remote"` or `"none"`.
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    /// When false, `briefing` fails with `provider_unavailable` instead of
    /// falling back to the template summary.
    pub fallback: bool,
    pub max_records: usize,
    pub max_symbols: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            socket_path: default_palace_dir()
                .join("palace.sock")
                .to_string_lossy()
                .into_owned(),
            log_level: "info".into(),
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: ".".into(),
            data_dir: ".palace".into(),
            scan_on_start: true,
            max_file_bytes: 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let corridor_path = default_palace_dir()
            .join("corridor.db")
            .to_string_lossy()
            .into_owned();
        Self {
            corridor_enabled: true,
            corridor_path,
            read_connections: 4,
            busy_retries: 3,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_palace_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            dimensions: 384,
            api_base: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_ms: 10_000,
            workers: 2,
            queue_capacity: 4096,
            max_attempts: 4,
            base_backoff_ms: 250,
            max_backoff_ms: 8_000,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 50,
            lexical_weight: 0.6,
            semantic_weight: 0.4,
            min_similarity: 0.3,
            default_depth: 3,
            max_depth: 8,
        }
    }
}

impl Default for BriefingConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            model: "gpt-4o-mini".into(),
            api_base: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_ms: 20_000,
            fallback: true,
            max_records: 20,
            max_symbols: 20,
        }
    }
}

impl RetrievalConfig {
    /// Resolve a caller-supplied limit: default when absent, never zero, capped at `max_limit`.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .max(1)
            .min(self.max_limit.max(1))
    }

    pub fn clamp_depth(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_depth)
            .max(1)
            .min(self.max_depth.max(1))
    }
}

/// Returns `~/.palace/`, falling back to `./.palace` when no home directory is known.
pub fn default_palace_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palace")
}

impl PalaceConfig {
    /// Load config for the workspace named by `PALACE_ROOT` (or the current directory).
    pub fn load() -> Result<Self> {
        let root = std::env::var("PALACE_ROOT").unwrap_or_else(|_| ".".into());
        let workspace_config = Path::new(&root).join(".palace").join("config.toml");
        if workspace_config.exists() {
            Self::load_from(workspace_config)
        } else {
            Self::load_from(default_palace_dir().join("config.toml"))
        }
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            PalaceConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PALACE_ROOT") {
            self.workspace.root = val;
        }
        if let Ok(val) = std::env::var("PALACE_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("PALACE_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
        if let Ok(val) = std::env::var("PALACE_CORRIDOR") {
            self.storage.corridor_path = val;
        }
    }

    /// Absolute workspace root, canonicalized when it exists.
    pub fn resolved_root(&self) -> PathBuf {
        let root = expand_tilde(&self.workspace.root);
        root.canonicalize().unwrap_or(root)
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        let dir = expand_tilde(&self.workspace.data_dir);
        if dir.is_absolute() {
            dir
        } else {
            self.resolved_root().join(dir)
        }
    }

    pub fn index_db_path(&self) -> PathBuf {
        self.resolved_data_dir().join("index.db")
    }

    pub fn memory_db_path(&self) -> PathBuf {
        self.resolved_data_dir().join("memory.db")
    }

    pub fn corridor_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.corridor_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

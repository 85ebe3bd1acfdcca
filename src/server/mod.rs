//! Process wiring: open the stores, start the embedding pipeline, serve.

pub mod protocol;
pub mod session;
pub mod transport;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PalaceConfig;
use crate::db::migrations::check_embedding_model;
use crate::db::Database;
use crate::embedding::{
    EmbeddingPipeline, EmbeddingSink, JobKey, JobQueue, RetryPolicy, SinkSet, TargetType,
};
use crate::index::{IndexStore, Indexer};
use crate::memory::MemoryStore;
use crate::provider::{
    create_completion_provider, create_embedding_provider, CompletionProvider, EmbeddingProvider,
};
use crate::tools::PalaceTools;

pub use session::serve_connection;

/// Everything a running server owns.
pub struct Services {
    pub config: Arc<PalaceConfig>,
    pub index: Arc<IndexStore>,
    pub indexer: Arc<Indexer>,
    pub memory: Arc<MemoryStore>,
    pub corridor: Option<Arc<MemoryStore>>,
    pub queue: Option<Arc<JobQueue>>,
    pipeline: Option<EmbeddingPipeline>,
    tools: PalaceTools,
}

impl Services {
    /// Open the stores and build the configured providers. A provider that
    /// fails to load is logged and left out; the server still starts.
    pub fn open(config: PalaceConfig) -> Result<Self> {
        let embedder = create_embedding_provider(&config.embedding).unwrap_or_else(|e| {
            warn!(error = %e, "embedding provider unavailable, semantic ranking disabled");
            None
        });
        let completer = create_completion_provider(&config.briefing).unwrap_or_else(|e| {
            warn!(error = %e, "briefing provider unavailable, using template briefings");
            None
        });
        Self::assemble(config, embedder, completer)
    }

    /// Wire stores and providers together. Must run inside a tokio runtime
    /// when `embedder` is set, since the worker pool is spawned here.
    pub fn assemble(
        config: PalaceConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        completer: Option<Arc<dyn CompletionProvider>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let queue = embedder
            .as_ref()
            .map(|_| Arc::new(JobQueue::new(config.embedding.queue_capacity)));

        let index = Arc::new(IndexStore::open(&config)?);
        let mut memory = MemoryStore::open_workspace(&config)?;
        let mut corridor = if config.storage.corridor_enabled {
            match MemoryStore::open_corridor(&config) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %config.corridor_db_path().display(),
                        "corridor unavailable, continuing without it"
                    );
                    None
                }
            }
        } else {
            None
        };
        let mut indexer = Indexer::new(
            Arc::clone(&index),
            config.resolved_root(),
            config.workspace.max_file_bytes,
        );
        if let Some(queue) = &queue {
            memory = memory.with_queue(Arc::clone(queue));
            corridor = corridor.map(|c| c.with_queue(Arc::clone(queue)));
            indexer = indexer.with_queue(Arc::clone(queue));
        }
        let memory = Arc::new(memory);
        let corridor = corridor.map(Arc::new);
        let indexer = Arc::new(indexer);

        let pipeline = match (&embedder, &queue) {
            (Some(provider), Some(queue)) => {
                let model = provider.model_id();
                record_model(index.database(), model)?;
                record_model(memory.database(), model)?;
                if let Some(corridor) = &corridor {
                    record_model(corridor.database(), model)?;
                }
                let mut sinks = SinkSet::new()
                    .with(TargetType::Symbol, Arc::clone(&index) as Arc<dyn EmbeddingSink>)
                    .with(TargetType::Record, Arc::clone(&memory) as Arc<dyn EmbeddingSink>);
                if let Some(corridor) = &corridor {
                    sinks = sinks.with(
                        TargetType::CorridorRecord,
                        Arc::clone(corridor) as Arc<dyn EmbeddingSink>,
                    );
                }
                Some(EmbeddingPipeline::start(
                    Arc::clone(queue),
                    Arc::clone(provider),
                    sinks,
                    RetryPolicy::from(&config.embedding),
                    config.embedding.workers,
                ))
            }
            _ => None,
        };

        let tools = PalaceTools::new(Arc::clone(&config), Arc::clone(&indexer), Arc::clone(&memory))
            .with_corridor(corridor.clone())
            .with_embedder(embedder)
            .with_completer(completer);

        info!(
            root = %indexer.root().display(),
            corridor = corridor.is_some(),
            embeddings = pipeline.is_some(),
            "palace ready"
        );
        Ok(Self {
            config,
            index,
            indexer,
            memory,
            corridor,
            queue,
            pipeline,
            tools,
        })
    }

    pub fn tools(&self) -> PalaceTools {
        self.tools.clone()
    }

    /// Queue rows whose vector is missing or stale. Returns how many were queued.
    pub fn backfill(&self) -> Result<usize> {
        let Some(queue) = &self.queue else {
            return Ok(0);
        };
        let limit = self.config.embedding.queue_capacity;
        let mut keys: Vec<JobKey> = self
            .index
            .stale_embeddings(limit)?
            .into_iter()
            .map(JobKey::symbol)
            .collect();
        keys.extend(self.memory.stale_embeddings(limit)?.into_iter().map(JobKey::record));
        if let Some(corridor) = &self.corridor {
            keys.extend(corridor.stale_embeddings(limit)?.into_iter().map(JobKey::corridor_record));
        }
        let queued = keys.len();
        for key in keys {
            queue.enqueue(key);
        }
        if queued > 0 {
            info!(queued, "embedding backfill queued");
        }
        Ok(queued)
    }

    /// Index the whole workspace without blocking startup.
    pub fn scan_in_background(&self) {
        let indexer = Arc::clone(&self.indexer);
        tokio::spawn(async move {
            if let Err(e) = indexer.rescan(None).await {
                warn!(error = %e, "startup scan failed");
            }
        });
    }

    /// Stop the embedding workers. Queued jobs that never ran are picked up
    /// by the next start's backfill.
    pub async fn shutdown(self) {
        if let Some(pipeline) = self.pipeline {
            pipeline.shutdown().await;
        }
        info!("palace stopped");
    }
}

fn record_model(db: &Database, model: &str) -> Result<()> {
    db.write(|conn| Ok(check_embedding_model(conn, model)?))?;
    Ok(())
}

/// Run the server until the client disconnects (stdio) or the process is
/// interrupted (socket).
pub async fn serve(config: PalaceConfig, socket: Option<PathBuf>) -> Result<()> {
    let socket = socket.or_else(|| {
        (config.server.transport == "socket")
            .then(|| crate::config::expand_tilde(&config.server.socket_path))
    });
    let services = Services::open(config)?;
    if let Err(e) = services.backfill() {
        warn!(error = %e, "embedding backfill failed");
    }
    if services.config.workspace.scan_on_start {
        services.scan_in_background();
    }

    let result = match socket {
        Some(path) => transport::serve_socket(services.tools(), &path).await,
        None => transport::serve_stdio(services.tools()).await,
    };
    services.shutdown().await;
    result
}

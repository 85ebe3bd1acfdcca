//! Workspace scanning: walk, hash, parse, upsert.
//!
//! A rescan of one file and a rescan of its directory may race. Each file has
//! a gate holding a generation counter and an async lock: submissions queue on
//! the lock in order, and a submission that finds a newer generation waiting
//! behind it steps aside so only the latest one does the work.

use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{normalize_path, IndexStore};
use crate::embedding::{JobKey, JobQueue};
use crate::error::{StoreError, StoreResult};
use crate::parser::{self, Language};

/// What happened to one file during a rescan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Indexed { symbols: usize, diagnostics: usize },
    Unchanged,
    Removed,
    Skipped { reason: String },
    Failed { error: String },
    /// A newer rescan of the same file was already queued.
    Superseded,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub path: String,
    pub scanned: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Per-file outcomes, unchanged files omitted.
    pub files: Vec<FileReport>,
    pub duration_ms: u64,
}

impl ScanReport {
    fn record(&mut self, path: String, outcome: FileOutcome) {
        match &outcome {
            FileOutcome::Indexed { .. } => self.indexed += 1,
            FileOutcome::Unchanged => {
                self.unchanged += 1;
                return;
            }
            FileOutcome::Removed => self.removed += 1,
            FileOutcome::Skipped { .. } => self.skipped += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
            FileOutcome::Superseded => {}
        }
        self.files.push(FileReport { path, outcome });
    }
}

#[derive(Default)]
struct FileGate {
    generation: AtomicU64,
    lock: tokio::sync::Mutex<()>,
}

/// Outcome of indexing one file plus the symbol ids to embed.
type Indexed = (FileOutcome, Vec<String>);

/// A file found by the walk.
struct Candidate {
    rel: String,
    abs: PathBuf,
    language: Language,
    too_large: bool,
}

pub struct Indexer {
    store: Arc<IndexStore>,
    root: PathBuf,
    max_file_bytes: u64,
    queue: Option<Arc<JobQueue>>,
    gates: Mutex<HashMap<String, Arc<FileGate>>>,
}

impl Indexer {
    pub fn new(store: Arc<IndexStore>, root: impl Into<PathBuf>, max_file_bytes: u64) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            store,
            root,
            max_file_bytes,
            queue: None,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Feed symbols that need vectors to the embedding queue.
    pub fn with_queue(mut self, queue: Arc<JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan a file or directory (the whole workspace when `None`).
    pub async fn rescan(&self, path: Option<&str>) -> StoreResult<ScanReport> {
        let start = Instant::now();
        let rel = self.relative(path.unwrap_or(""))?;
        let abs = if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&rel)
        };

        let candidates = {
            let root = self.root.clone();
            let abs = abs.clone();
            let max = self.max_file_bytes;
            tokio::task::spawn_blocking(move || walk(&root, &abs, max))
                .await
                .map_err(|e| StoreError::Other(anyhow::anyhow!("scan walk panicked: {e}")))?
        };

        let indexed_before = self.store.files_under(&rel)?;
        if candidates.is_empty() && indexed_before.is_empty() && !abs.exists() {
            return Err(StoreError::NotFound(format!("path {rel}")));
        }

        let mut report = ScanReport {
            path: rel.clone(),
            ..Default::default()
        };
        let mut present = HashSet::new();

        for candidate in candidates {
            report.scanned += 1;
            if candidate.too_large {
                report.record(
                    candidate.rel,
                    FileOutcome::Skipped {
                        reason: format!("larger than {} bytes", self.max_file_bytes),
                    },
                );
                continue;
            }
            present.insert(candidate.rel.clone());
            let rel = candidate.rel.clone();
            let outcome = self.gated(&rel, |indexer| indexer.index_file(candidate)).await;
            report.record(rel, outcome);
        }

        for gone in indexed_before.into_iter().filter(|p| !present.contains(p)) {
            let outcome = self
                .gated(&gone, |indexer| {
                    let path = gone.clone();
                    async move {
                        match indexer.store.delete_file(&path) {
                            Ok(true) => FileOutcome::Removed,
                            Ok(false) => FileOutcome::Unchanged,
                            Err(e) => FileOutcome::Failed { error: e.to_string() },
                        }
                    }
                })
                .await;
            report.record(gone, outcome);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            path = %report.path,
            scanned = report.scanned,
            indexed = report.indexed,
            unchanged = report.unchanged,
            removed = report.removed,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "rescan complete"
        );
        Ok(report)
    }

    /// Workspace-relative form of `path`, rejecting anything outside the root.
    fn relative(&self, path: &str) -> StoreResult<String> {
        let outside = || StoreError::Invalid {
            field: "path",
            message: format!("'{path}' is outside the workspace root"),
        };
        let candidate = Path::new(path);
        let rel = if candidate.is_absolute() {
            let canonical = candidate.canonicalize().unwrap_or_else(|_| candidate.to_path_buf());
            canonical
                .strip_prefix(&self.root)
                .map_err(|_| outside())?
                .to_string_lossy()
                .into_owned()
        } else {
            path.to_string()
        };
        if Path::new(&rel)
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(outside());
        }
        Ok(normalize_path(&rel))
    }

    /// Run `work` for `path` after every earlier submission for it, unless a
    /// later submission is already waiting.
    async fn gated<'a, F, Fut>(&'a self, path: &str, work: F) -> FileOutcome
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: std::future::Future<Output = FileOutcome>,
    {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
            gates.entry(path.to_string()).or_default().clone()
        };
        let ticket = gate.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = {
            let _guard = gate.lock.lock().await;
            if gate.generation.load(Ordering::SeqCst) != ticket {
                debug!(path, "rescan superseded by a newer submission");
                FileOutcome::Superseded
            } else {
                work(self).await
            }
        };

        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        // only the map and this call hold the gate
        if Arc::strong_count(&gate) <= 2 {
            gates.remove(path);
        }
        outcome
    }

    async fn index_file(&self, candidate: Candidate) -> FileOutcome {
        let store = Arc::clone(&self.store);
        let rel = candidate.rel.clone();
        let result = tokio::task::spawn_blocking(move || -> StoreResult<Indexed> {
            let bytes = std::fs::read(&candidate.abs)
                .map_err(|e| {
                    StoreError::Other(anyhow::anyhow!("read {}: {e}", candidate.abs.display()))
                })?;
            let hash = blake3::hash(&bytes).to_hex().to_string();
            if store
                .file(&candidate.rel)?
                .is_some_and(|f| f.content_hash == hash)
            {
                return Ok((FileOutcome::Unchanged, Vec::new()));
            }
            let parsed = match parser::parse_as(&bytes, &candidate.rel, candidate.language) {
                Ok(parsed) => parsed,
                Err(e) => return Ok((FileOutcome::Failed { error: e.to_string() }, Vec::new())),
            };
            let outcome = store.upsert_file(&candidate.rel, candidate.language, &hash, &parsed)?;
            Ok((
                FileOutcome::Indexed {
                    symbols: outcome.file.symbol_count,
                    diagnostics: outcome.file.diagnostic_count,
                },
                outcome.needs_embedding,
            ))
        })
        .await;

        match result {
            Ok(Ok((outcome, needs_embedding))) => {
                if let Some(queue) = &self.queue {
                    for id in needs_embedding {
                        queue.enqueue(JobKey::symbol(id));
                    }
                }
                outcome
            }
            Ok(Err(e)) => {
                warn!(path = %rel, error = %e, "failed to index file");
                FileOutcome::Failed { error: e.to_string() }
            }
            Err(e) => {
                warn!(path = %rel, error = %e, "indexing task panicked");
                FileOutcome::Failed {
                    error: "indexing task panicked".into(),
                }
            }
        }
    }
}

/// Supported source files under `target`, honoring ignore files.
fn walk(root: &Path, target: &Path, max_file_bytes: u64) -> Vec<Candidate> {
    let mut out = Vec::new();
    if !target.exists() {
        return out;
    }
    let walker = WalkBuilder::new(target)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .build();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "walk error");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let abs = entry.path().to_path_buf();
        let Ok(rel) = abs.strip_prefix(root) else {
            continue;
        };
        let rel = normalize_path(&rel.to_string_lossy());
        let Some(language) = Language::from_path(&rel) else {
            continue;
        };
        let too_large = entry
            .metadata()
            .map(|m| m.len() > max_file_bytes)
            .unwrap_or(false);
        out.push(Candidate {
            rel,
            abs,
            language,
            too_large,
        });
    }
    out.sort_by(|a, b| a.rel.cmp(&b.rel));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::db::schema::DatabaseKind;
    use crate::db::Database;
    use crate::index::SymbolFilter;
    use std::fs;

    fn indexer(root: &Path, max_file_bytes: u64) -> Indexer {
        let db = Database::open_in_memory(DatabaseKind::Index, 4).unwrap();
        let store = Arc::new(IndexStore::new(db, RetrievalConfig::default()));
        Indexer::new(store, root, max_file_bytes)
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn scan_then_rescan_is_incremental() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.py", "def a():\n    pass\n");
        write(dir.path(), "src/b.rs", "pub fn b() {}\n");
        write(dir.path(), "README.md", "# notes\n");
        let indexer = indexer(dir.path(), 1024 * 1024);

        let first = indexer.rescan(None).await.unwrap();
        assert_eq!((first.scanned, first.indexed), (2, 2));

        let second = indexer.rescan(None).await.unwrap();
        assert_eq!((second.indexed, second.unchanged), (0, 2));
        assert!(second.files.is_empty());

        write(dir.path(), "src/a.py", "def a2():\n    pass\n");
        fs::remove_file(dir.path().join("src/b.rs")).unwrap();
        let third = indexer.rescan(Some("src")).await.unwrap();
        assert_eq!((third.indexed, third.removed), (1, 1));

        let symbols = indexer.store().list_symbols(&SymbolFilter::default()).unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a2"]);
    }

    #[tokio::test]
    async fn respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "generated/\n");
        write(dir.path(), "generated/out.py", "def gen():\n    pass\n");
        write(dir.path(), "main.go", "package main\n\nfunc main() {}\n");
        let report = indexer(dir.path(), 1024).rescan(None).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.files[0].path, "main.go");
    }

    #[tokio::test]
    async fn oversize_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.py", &"x = 1\n".repeat(100));
        let report = indexer(dir.path(), 64).rescan(None).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.indexed, 0);
    }

    #[tokio::test]
    async fn paths_outside_root_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = indexer(dir.path(), 1024);
        let err = indexer.rescan(Some("../elsewhere")).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { field: "path", .. }));
        let err = indexer.rescan(Some("/definitely/not/here")).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = indexer(dir.path(), 1024).rescan(Some("nope.py")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_rescans_of_one_file_converge() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "def one():\n    pass\n");
        let indexer = Arc::new(indexer(dir.path(), 1024));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let indexer = Arc::clone(&indexer);
                tokio::spawn(async move { indexer.rescan(Some("a.py")).await.unwrap() })
            })
            .collect();
        let mut indexed = 0;
        for task in tasks {
            indexed += task.await.unwrap().indexed;
        }
        assert!(indexed >= 1);
        let stats = indexer.store().stats().unwrap();
        assert_eq!((stats.files, stats.symbols), (1, 1));
    }
}

//! Fixed worker pool draining the [`JobQueue`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EmbeddingSink, JobKey, JobQueue, TargetType};
use crate::config::EmbeddingConfig;
use crate::provider::{l2_normalize, EmbeddingProvider};

/// Bounded exponential backoff for provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.max(1).saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl From<&EmbeddingConfig> for RetryPolicy {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Stores that accept vectors, by target type.
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: HashMap<TargetType, Arc<dyn EmbeddingSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: TargetType, sink: Arc<dyn EmbeddingSink>) -> Self {
        self.sinks.insert(target, sink);
        self
    }

    pub fn get(&self, target: TargetType) -> Option<&Arc<dyn EmbeddingSink>> {
        self.sinks.get(&target)
    }
}

/// Running worker pool. Dropping it leaves the workers running; call
/// [`shutdown`](Self::shutdown) to stop them.
pub struct EmbeddingPipeline {
    queue: Arc<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl EmbeddingPipeline {
    pub fn start(
        queue: Arc<JobQueue>,
        provider: Arc<dyn EmbeddingProvider>,
        sinks: SinkSet,
        policy: RetryPolicy,
        workers: usize,
    ) -> Self {
        let sinks = Arc::new(sinks);
        let workers = (0..workers.max(1))
            .map(|n| {
                let queue = Arc::clone(&queue);
                let provider = Arc::clone(&provider);
                let sinks = Arc::clone(&sinks);
                tokio::spawn(async move {
                    debug!(worker = n, "embedding worker started");
                    while let Some(key) = queue.next().await {
                        let ok = process(&queue, &provider, &sinks, policy, &key).await;
                        queue.finish(&key, ok);
                    }
                    debug!(worker = n, "embedding worker stopped");
                })
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), model = provider.model_id(), "embedding pipeline started");
        Self { queue, workers }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Stop accepting work and wait for in-flight jobs to return.
    pub async fn shutdown(self) {
        self.queue.shutdown();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "embedding worker panicked");
            }
        }
    }
}

/// Run one job to completion. Returns false when it ends `failed`.
async fn process(
    queue: &JobQueue,
    provider: &Arc<dyn EmbeddingProvider>,
    sinks: &SinkSet,
    policy: RetryPolicy,
    key: &JobKey,
) -> bool {
    let Some(sink) = sinks.get(key.target).cloned() else {
        warn!(target_type = key.target.as_str(), "no sink registered for embedding target");
        return false;
    };

    let source = {
        let sink = Arc::clone(&sink);
        let id = key.id.clone();
        tokio::task::spawn_blocking(move || sink.source(&id)).await
    };
    let source = match source {
        Ok(Ok(Some(source))) => source,
        // row deleted since the job was queued
        Ok(Ok(None)) => return true,
        Ok(Err(e)) => {
            warn!(id = %key.id, error = %e, "failed to load embedding source");
            return false;
        }
        Err(e) => {
            warn!(id = %key.id, error = %e, "embedding source task panicked");
            return false;
        }
    };
    if source.is_current() {
        return true;
    }

    let expected = sink.dimensions();
    for attempt in 1..=policy.max_attempts {
        queue.record_attempt(key);
        let result = {
            let provider = Arc::clone(provider);
            let text = source.text.clone();
            tokio::task::spawn_blocking(move || provider.embed(&text)).await
        };
        let error = match result {
            Ok(Ok(vector)) if vector.len() != expected => {
                // retrying cannot fix a model/schema mismatch
                warn!(
                    id = %key.id,
                    got = vector.len(),
                    expected,
                    "embedding dimension mismatch"
                );
                return false;
            }
            Ok(Ok(vector)) => {
                let vector = l2_normalize(&vector);
                let stored = {
                    let sink = Arc::clone(&sink);
                    let id = key.id.clone();
                    let hash = source.content_hash.clone();
                    tokio::task::spawn_blocking(move || sink.store(&id, &hash, &vector)).await
                };
                match stored {
                    Ok(Ok(written)) => {
                        debug!(
                            target_type = key.target.as_str(),
                            id = %key.id,
                            written,
                            "embedding stored"
                        );
                        return true;
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };

        if attempt < policy.max_attempts {
            let delay = policy.backoff(attempt);
            debug!(
                id = %key.id,
                attempt,
                ?delay,
                error = %error,
                "embedding attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            if queue.is_shut_down() {
                return false;
            }
        } else {
            warn!(
                target_type = key.target.as_str(),
                id = %key.id,
                attempts = attempt,
                error = %error,
                "embedding failed permanently"
            );
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingSource, JobStatus};
    use crate::error::StoreResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Flaky {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for Flaky {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("transient provider error");
            }
            Ok(vec![2.0, 0.0])
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_id(&self) -> &str {
            "flaky"
        }
    }

    #[derive(Default)]
    struct MemorySink {
        stored: Mutex<HashMap<String, Vec<f32>>>,
        current: Mutex<HashMap<String, String>>,
    }

    impl EmbeddingSink for MemorySink {
        fn source(&self, id: &str) -> StoreResult<Option<EmbeddingSource>> {
            if id == "gone" {
                return Ok(None);
            }
            Ok(Some(EmbeddingSource {
                text: format!("text for {id}"),
                content_hash: "h1".into(),
                embedded_hash: self.current.lock().unwrap().get(id).cloned(),
            }))
        }
        fn store(&self, id: &str, content_hash: &str, vector: &[f32]) -> StoreResult<bool> {
            self.stored.lock().unwrap().insert(id.to_string(), vector.to_vec());
            self.current.lock().unwrap().insert(id.to_string(), content_hash.to_string());
            Ok(true)
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn flaky(failures: usize) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_then_stores_normalized_vector() {
        let queue = Arc::new(JobQueue::new(16));
        let sink = Arc::new(MemorySink::default());
        let provider = flaky(2);
        let pipeline = EmbeddingPipeline::start(
            Arc::clone(&queue),
            provider.clone(),
            SinkSet::new().with(TargetType::Symbol, sink.clone()),
            policy(4),
            1,
        );

        queue.enqueue(JobKey::symbol("s1"));
        queue.wait_idle().await;

        assert_eq!(sink.stored.lock().unwrap()["s1"], vec![1.0, 0.0]);
        let state = queue.status(&JobKey::symbol("s1")).unwrap();
        assert_eq!((state.status, state.attempts), (JobStatus::Done, 3));
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_retries_mark_failed() {
        let queue = Arc::new(JobQueue::new(16));
        let sink = Arc::new(MemorySink::default());
        let pipeline = EmbeddingPipeline::start(
            Arc::clone(&queue),
            flaky(100),
            SinkSet::new().with(TargetType::Record, sink.clone()),
            policy(3),
            2,
        );

        queue.enqueue(JobKey::record("r1"));
        queue.wait_idle().await;

        let state = queue.status(&JobKey::record("r1")).unwrap();
        assert_eq!((state.status, state.attempts), (JobStatus::Failed, 3));
        assert!(sink.stored.lock().unwrap().is_empty());
        assert_eq!(queue.stats().failed, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn current_and_deleted_rows_are_no_ops() {
        let queue = Arc::new(JobQueue::new(16));
        let sink = Arc::new(MemorySink::default());
        sink.current.lock().unwrap().insert("s1".into(), "h1".into());
        let provider = flaky(0);
        let pipeline = EmbeddingPipeline::start(
            Arc::clone(&queue),
            provider.clone(),
            SinkSet::new().with(TargetType::Symbol, sink.clone()),
            policy(2),
            1,
        );

        queue.enqueue(JobKey::symbol("s1"));
        queue.enqueue(JobKey::symbol("gone"));
        queue.wait_idle().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.stats().done, 2);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn missing_sink_fails_job() {
        let queue = Arc::new(JobQueue::new(16));
        let pipeline =
            EmbeddingPipeline::start(Arc::clone(&queue), flaky(0), SinkSet::new(), policy(1), 1);
        queue.enqueue(JobKey::corridor_record("c1"));
        queue.wait_idle().await;
        assert_eq!(queue.stats().failed, 1);
        pipeline.shutdown().await;
    }
}

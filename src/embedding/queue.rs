//! Bounded, coalescing job queue for embedding work.
//!
//! One mutex guards the pending deque and the per-key state table, so a key is
//! either pending once, processing once, or finished. Workers block in
//! [`JobQueue::next`] until work arrives or the queue shuts down.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::{watch, Notify};

use super::JobKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobState {
    pub status: JobStatus,
    pub attempts: u32,
    /// Set when the key was re-enqueued while processing.
    #[serde(skip)]
    rerun: bool,
}

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Already pending; nothing added.
    Coalesced,
    /// Currently processing; it will run once more afterwards.
    Requeued,
    /// Queue full.
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub done: u64,
    pub failed: u64,
    pub coalesced: u64,
    pub requeued: u64,
    pub rejected: u64,
    pub capacity: usize,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<JobKey>,
    jobs: HashMap<JobKey, JobState>,
    /// Finished keys, oldest first, for evicting old entries from `jobs`.
    finished: VecDeque<JobKey>,
    processing: usize,
    done: u64,
    failed: u64,
    coalesced: u64,
    requeued: u64,
    rejected: u64,
}

impl Inner {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.processing == 0
    }
}

pub struct JobQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    work: Notify,
    idle: Notify,
    shutdown: watch::Sender<bool>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            work: Notify::new(),
            idle: Notify::new(),
            shutdown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, key: JobKey) -> Enqueued {
        let mut inner = self.lock();
        match inner.jobs.get(&key).map(|s| s.status) {
            Some(JobStatus::Pending) => {
                inner.coalesced += 1;
                return Enqueued::Coalesced;
            }
            Some(JobStatus::Processing) => {
                if let Some(state) = inner.jobs.get_mut(&key) {
                    state.rerun = true;
                }
                inner.requeued += 1;
                return Enqueued::Requeued;
            }
            _ => {}
        }
        if inner.pending.len() >= self.capacity {
            inner.rejected += 1;
            tracing::warn!(
                target_type = key.target.as_str(),
                id = %key.id,
                "embedding queue full, job rejected"
            );
            return Enqueued::Rejected;
        }
        inner.jobs.insert(
            key.clone(),
            JobState {
                status: JobStatus::Pending,
                attempts: 0,
                rerun: false,
            },
        );
        inner.finished.retain(|k| k != &key);
        inner.pending.push_back(key);
        drop(inner);
        self.work.notify_one();
        Enqueued::Queued
    }

    /// Wait for the next job. `None` once the queue is shut down.
    pub async fn next(&self) -> Option<JobKey> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                return None;
            }
            {
                let mut inner = self.lock();
                if let Some(key) = inner.pending.pop_front() {
                    if let Some(state) = inner.jobs.get_mut(&key) {
                        state.status = JobStatus::Processing;
                    }
                    inner.processing += 1;
                    return Some(key);
                }
            }
            tokio::select! {
                _ = self.work.notified() => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Count one provider attempt for `key`.
    pub fn record_attempt(&self, key: &JobKey) {
        if let Some(state) = self.lock().jobs.get_mut(key) {
            state.attempts += 1;
        }
    }

    /// Mark a processing job finished. A job re-enqueued while it ran goes
    /// back to the pending queue instead.
    pub fn finish(&self, key: &JobKey, succeeded: bool) {
        let mut inner = self.lock();
        inner.processing = inner.processing.saturating_sub(1);
        let rerun = inner.jobs.get(key).is_some_and(|s| s.rerun);
        if rerun {
            if let Some(state) = inner.jobs.get_mut(key) {
                *state = JobState {
                    status: JobStatus::Pending,
                    attempts: 0,
                    rerun: false,
                };
            }
            inner.pending.push_back(key.clone());
            drop(inner);
            self.work.notify_one();
            return;
        }

        if let Some(state) = inner.jobs.get_mut(key) {
            state.status = if succeeded { JobStatus::Done } else { JobStatus::Failed };
        }
        if succeeded {
            inner.done += 1;
        } else {
            inner.failed += 1;
        }
        inner.finished.push_back(key.clone());
        while inner.finished.len() > self.capacity {
            if let Some(old) = inner.finished.pop_front() {
                inner.jobs.remove(&old);
            }
        }
        let idle = inner.is_idle();
        drop(inner);
        if idle {
            self.idle.notify_waiters();
        }
    }

    pub fn status(&self, key: &JobKey) -> Option<JobState> {
        self.lock().jobs.get(key).cloned()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            pending: inner.pending.len(),
            processing: inner.processing,
            done: inner.done,
            failed: inner.failed,
            coalesced: inner.coalesced,
            requeued: inner.requeued,
            rejected: inner.rejected,
            capacity: self.capacity,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Resolve once nothing is pending or processing.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() || *self.shutdown.borrow() {
                return;
            }
            notified.await;
        }
    }

    /// Wake every worker and make [`next`](Self::next) return `None`.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.idle.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

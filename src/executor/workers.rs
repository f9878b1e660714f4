//! Per-Queue Worker Pools
//!
//! Every queue owns an independent worker pool with its own concurrency bound
//! (`max_threads`). Jobs are one-shot and run as soon as a slot is free.
//!
//! ## Responsibilities
//! - **Isolation**: each pool has its own admission loop and semaphore, so a
//!   saturated queue never holds back jobs of another queue.
//! - **Ordering**: jobs of one queue are admitted in submission order. Nothing
//!   is promised across queues.
//! - **Containment**: a job that returns an error or panics is logged and its
//!   slot is handed back; the pool keeps serving.
//!
//! Pools are created while handlers register and only start once the
//! configuration is loaded (`start_all`), because that is when per-queue
//! limits become known. Jobs scheduled before that are buffered.

use super::types::INTERNAL_QUEUE;
use crate::config::QueueOptions;
use crate::error::{QueueError, Result};

use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{Semaphore, mpsc};

type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct QueuedJob {
    name: String,
    job: Job,
}

#[derive(Default)]
struct PoolCounters {
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Point-in-time view of one queue's pool.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStats {
    pub queue: String,
    pub started: bool,
    /// `None` means unbounded.
    pub max_threads: Option<usize>,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// The execution context of a single queue.
pub struct WorkerPool {
    name: String,
    sender: mpsc::UnboundedSender<QueuedJob>,
    /// Taken by the admission loop when the pool starts.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedJob>>>,
    /// Set exactly once, on start.
    max_threads: OnceLock<Option<usize>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    fn new(name: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            sender,
            receiver: Mutex::new(Some(receiver)),
            max_threads: OnceLock::new(),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Name of the queue this pool serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the admission loop is running.
    pub fn is_started(&self) -> bool {
        self.max_threads.get().is_some()
    }

    /// Concurrency bound applied on start. `None` while unbounded or not started.
    pub fn max_threads(&self) -> Option<usize> {
        self.max_threads.get().copied().flatten()
    }

    /// Spawns the admission loop. Returns `false` if the pool was already running.
    ///
    /// Must be called from within a Tokio runtime.
    fn start(&self, max_threads: Option<usize>) -> bool {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(receiver) = receiver else {
            return false;
        };

        let max_threads = max_threads.filter(|limit| *limit > 0);
        let _ = self.max_threads.set(max_threads);

        match max_threads {
            Some(limit) => tracing::info!(
                "Starting worker pool for queue '{}' with max_threads = {}",
                self.name,
                limit
            ),
            None => tracing::info!("Starting unbounded worker pool for queue '{}'", self.name),
        }

        let limit = max_threads.map(|limit| Arc::new(Semaphore::new(limit)));
        tokio::spawn(admission_loop(
            self.name.clone(),
            receiver,
            limit,
            self.counters.clone(),
        ));
        true
    }

    /// Queues a one-shot job to run as soon as a slot is free.
    ///
    /// Fails with `PoolClosed` when the admission loop is gone, e.g. after its
    /// runtime shut down.
    pub fn submit<F>(&self, job_name: &str, job: F) -> Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);

        let queued = QueuedJob {
            name: job_name.to_string(),
            job: Box::pin(job),
        };
        if self.sender.send(queued).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::PoolClosed(self.name.clone()));
        }

        tracing::debug!("Scheduled job '{}' in queue '{}'", job_name, self.name);
        Ok(())
    }

    /// Snapshot of this pool's counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue: self.name.clone(),
            started: self.is_started(),
            max_threads: self.max_threads(),
            queued: self.counters.queued.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

/// Admits jobs in arrival order, waiting for a free slot when bounded.
async fn admission_loop(
    queue: String,
    mut receiver: mpsc::UnboundedReceiver<QueuedJob>,
    limit: Option<Arc<Semaphore>>,
    counters: Arc<PoolCounters>,
) {
    while let Some(QueuedJob { name, job }) = receiver.recv().await {
        let permit = match &limit {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => break,
            },
            None => None,
        };

        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.running.fetch_add(1, Ordering::SeqCst);

        let counters = counters.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = AssertUnwindSafe(job).catch_unwind().await;
            counters.running.fetch_sub(1, Ordering::SeqCst);

            match outcome {
                Ok(Ok(())) => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!("Job '{}' in queue '{}' completed", name, queue);
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!("Job '{}' in queue '{}' failed: {}", name, queue, e);
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::error!("Job '{}' in queue '{}' panicked", name, queue);
                }
            }
        });
    }

    tracing::info!("Worker pool for queue '{}' stopped", queue);
}

/// The queue name → worker pool map of one node.
pub struct QueueWorkerPools {
    pools: DashMap<String, Arc<WorkerPool>>,
    /// Per-queue options, known once `start_all` ran.
    options: OnceLock<HashMap<String, QueueOptions>>,
}

impl QueueWorkerPools {
    /// Creates an empty map. Pools appear as task handlers register.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the pool for `queue`, creating it if needed.
    ///
    /// A pool created after `start_all` starts right away with its configured
    /// limit.
    pub fn get_or_create(&self, queue: &str) -> Arc<WorkerPool> {
        let mut created = false;
        let pool = self
            .pools
            .entry(queue.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(WorkerPool::new(queue))
            })
            .clone();

        if created {
            tracing::debug!("Created worker pool for queue '{}'", queue);
            if let Some(options) = self.options.get() {
                pool.start(Self::limit_for(options, queue));
            }
        }

        pool
    }

    /// Returns the pool for `queue` without creating it.
    pub fn get(&self, queue: &str) -> Option<Arc<WorkerPool>> {
        self.pools.get(queue).map(|entry| entry.value().clone())
    }

    /// Checks whether `queue` has a pool.
    pub fn contains(&self, queue: &str) -> bool {
        self.pools.contains_key(queue)
    }

    /// Starts every pool created so far, the internal one included.
    ///
    /// Call this after the configuration is fully loaded and every handler has
    /// registered.
    pub fn start_all(&self, queues: &HashMap<String, QueueOptions>) {
        if self.options.set(queues.clone()).is_err() {
            tracing::warn!("Worker pools already started, ignoring new queue options");
        }
        let options = self.options.get().cloned().unwrap_or_default();

        self.get_or_create(INTERNAL_QUEUE);

        let pools: Vec<Arc<WorkerPool>> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();
        for pool in pools {
            pool.start(Self::limit_for(&options, pool.name()));
        }

        tracing::info!("Started {} worker pools", self.pools.len());
    }

    /// Schedules an immediate one-shot job in `queue`.
    ///
    /// # Returns
    /// * `Ok(())` once the job is queued.
    /// * `Err(NotFound)` if no pool exists for `queue`.
    /// * `Err(PoolClosed)` if the pool no longer accepts jobs.
    pub fn schedule_now<F>(&self, queue: &str, job_name: &str, job: F) -> Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let pool = self
            .get(queue)
            .ok_or_else(|| QueueError::NotFound(format!("queue '{}'", queue)))?;
        pool.submit(job_name, job)
    }

    /// Returns the names of all queues with a pool, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns a snapshot of every pool, sorted by queue name.
    pub fn stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self.pools.iter().map(|entry| entry.stats()).collect();
        stats.sort_by(|a, b| a.queue.cmp(&b.queue));
        stats
    }

    fn limit_for(options: &HashMap<String, QueueOptions>, queue: &str) -> Option<usize> {
        options.get(queue).and_then(|opts| opts.max_threads)
    }
}

impl Default for QueueWorkerPools {
    fn default() -> Self {
        Self {
            pools: DashMap::new(),
            options: OnceLock::new(),
        }
    }
}

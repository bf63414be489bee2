//! # Executors
//!
//! Where the bridge runs work it must not run on the caller's stack:
//! listener callbacks, coroutine re-polls and resume delivery.
//!
//! - [`DirectExecutor`] runs a job inline. Only safe where the job cannot
//!   block the thread that produced it.
//! - [`CoroutinePool`] runs jobs on N `may` worker coroutines sharing one
//!   unbounded queue, with panic recovery per job and queue metrics.
//!
//! ## Configuration
//!
//! Pools are sized from [`RuntimeConfig`]: `RESUMABLE_IO_WORKERS`,
//! `RESUMABLE_DISPATCH_WORKERS` and `RESUMABLE_STACK_SIZE`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use may::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;
use crate::runtime_config::RuntimeConfig;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);

    /// Name used in logs.
    fn name(&self) -> &str {
        "executor"
    }
}

/// Runs every job on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, job: Job) {
        job();
    }

    fn name(&self) -> &str {
        "direct"
    }
}

/// Counters for a [`CoroutinePool`].
#[derive(Debug, Default)]
pub struct PoolMetrics {
    dispatched: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    queue_depth: AtomicUsize,
}

impl PoolMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panicked_count(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Jobs queued or running (approximate).
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }
}

/// Fixed set of `may` coroutines draining a shared job queue.
pub struct CoroutinePool {
    name: Arc<str>,
    // Swapped out on close; submitting never takes a lock.
    sender: ArcSwapOption<mpsc::Sender<Job>>,
    metrics: Arc<PoolMetrics>,
    workers: usize,
}

impl CoroutinePool {
    /// Spawn `workers` coroutines with the given stack size.
    ///
    /// Fails only if no worker at all could be spawned.
    pub fn new(name: &str, workers: usize, stack_size: usize) -> Result<Self, BridgeError> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(rx);
        let metrics = Arc::new(PoolMetrics::new());
        let name: Arc<str> = Arc::from(name);
        let workers = workers.max(1);

        info!(
            pool = %name,
            num_workers = workers,
            stack_size = stack_size,
            "Creating coroutine pool"
        );

        let mut spawned = 0usize;
        let mut last_error = None;
        for worker_id in 0..workers {
            let rx = Arc::clone(&rx);
            let metrics = Arc::clone(&metrics);
            let pool_name = Arc::clone(&name);

            // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
            // The closure owns everything it touches (Arc'd queue and metrics), jobs are
            // Send + 'static, and panics are caught per job so a worker never unwinds.
            let spawn_result = unsafe {
                may::coroutine::Builder::new()
                    .name(format!("{pool_name}-{worker_id}"))
                    .stack_size(stack_size)
                    .spawn(move || {
                        debug!(pool = %pool_name, worker_id = worker_id, "Worker coroutine started");
                        while let Ok(job) = rx.recv() {
                            if let Err(panic) =
                                std::panic::catch_unwind(std::panic::AssertUnwindSafe(job))
                            {
                                metrics.record_panic();
                                error!(
                                    pool = %pool_name,
                                    worker_id = worker_id,
                                    panic_message = ?panic,
                                    "Pooled job panicked - CRITICAL"
                                );
                            }
                            metrics.record_completion();
                        }
                        debug!(pool = %pool_name, worker_id = worker_id, "Worker coroutine exiting");
                    })
            };

            match spawn_result {
                Ok(_) => spawned += 1,
                Err(e) => {
                    error!(
                        pool = %name,
                        worker_id = worker_id,
                        error = %e,
                        "Failed to spawn worker coroutine"
                    );
                    last_error = Some(e);
                }
            }
        }

        if spawned == 0 {
            return Err(BridgeError::Spawn(last_error.unwrap_or_else(|| {
                std::io::Error::other("no worker coroutine spawned")
            })));
        }

        Ok(Self {
            name,
            sender: ArcSwapOption::from_pointee(tx),
            metrics,
            workers: spawned,
        })
    }

    /// Pool for resume delivery and listener callbacks.
    pub fn io_from_config(config: &RuntimeConfig) -> Result<Self, BridgeError> {
        Self::new("resumable-io", config.io_workers, config.stack_size)
    }

    /// Pool for re-polling woken coroutine handlers.
    pub fn dispatch_from_config(config: &RuntimeConfig) -> Result<Self, BridgeError> {
        Self::new("resumable-dispatch", config.dispatch_workers, config.stack_size)
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Close the queue. Workers finish what is queued, then exit; jobs
    /// submitted afterwards run inline.
    pub fn close(&self) {
        if self.sender.swap(None).is_some() {
            info!(pool = %self.name, "Coroutine pool closed");
        }
    }
}

impl Executor for CoroutinePool {
    fn execute(&self, job: Job) {
        self.metrics.record_dispatch();
        let rejected = match &*self.sender.load() {
            Some(tx) => tx.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        if let Some(job) = rejected {
            warn!(pool = %self.name, "Coroutine pool unavailable - running job inline");
            job();
            self.metrics.record_completion();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CoroutinePool {
    fn drop(&mut self) {
        self.close();
    }
}

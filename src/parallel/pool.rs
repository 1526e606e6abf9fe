//! Worker Pool
//!
//! A fixed-size `rayon` pool shared by every parallel invocation. Work is
//! submitted as a closure; its result comes back through a one-slot
//! channel wrapped in a [`PartitionFuture`].

use crate::error::{RunResult, RunnerError};
use crate::execution::CancellationToken;
use crossbeam_channel::{self as channel, select};
use std::sync::{Arc, OnceLock};

static GLOBAL_POOL: OnceLock<Arc<WorkerPool>> = OnceLock::new();

pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool of `threads` workers (0 = one per core).
    pub fn new(threads: usize) -> RunResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("runner-worker-{i}"))
            .panic_handler(|_| tracing::error!("worker_panicked"))
            .build()
            .map_err(|e| RunnerError::Runtime(format!("failed to build worker pool: {e}")))?;
        tracing::debug!(threads = pool.current_num_threads(), "worker_pool_started");
        Ok(WorkerPool { pool })
    }

    /// The process-wide pool. The first caller decides its size.
    pub fn global(threads: usize) -> RunResult<Arc<WorkerPool>> {
        if let Some(pool) = GLOBAL_POOL.get() {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(WorkerPool::new(threads)?);
        Ok(Arc::clone(GLOBAL_POOL.get_or_init(|| pool)))
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool so nested `par_iter` calls use its workers.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }

    /// Queue `work` on the pool.
    pub fn submit<T, F>(&self, work: F) -> PartitionFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> RunResult<T> + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        self.pool.spawn(move || {
            // The future may have been dropped; the result is then discarded
            let _ = tx.send(work());
        });
        PartitionFuture { rx }
    }
}

/// Pending result of submitted work
pub struct PartitionFuture<T> {
    rx: channel::Receiver<RunResult<T>>,
}

impl<T> PartitionFuture<T> {
    /// Block until the work finishes or `token` fires.
    ///
    /// A worker that panicked drops its sender, which surfaces as
    /// [`RunnerError::Panicked`].
    pub fn join(self, token: &CancellationToken) -> RunResult<T> {
        token.check()?;
        let signal = token.signal().clone();
        select! {
            recv(self.rx) -> result => {
                result.unwrap_or_else(|_| Err(RunnerError::panicked("partition worker")))
            }
            recv(signal) -> _ => Err(RunnerError::Cancelled {
                reason: token.reason().unwrap_or_default(),
            }),
        }
    }
}

//! Fixed-size worker pool fed from a FIFO queue.
//!
//! Synchronization is two mutex/condvar pairs: one guards the queue and the
//! terminate flag, the other guards the live-work counter that [`ThreadPool::wait`]
//! blocks on. The counter always equals queued plus executing items.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace, warn};

use crate::error::PoolError;

/// Environment variable read by [`PoolConfig::from_env`].
pub const THREADS_ENV: &str = "CELLGRID_THREADS";

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Thread pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    pub num_threads: usize,
    /// Worker threads are named `{prefix}-{index}`
    pub thread_name_prefix: String,
    /// Stack size in bytes, `None` keeps the platform default
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            thread_name_prefix: "cellgrid-worker".to_string(),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Default configuration with the thread count taken from `CELLGRID_THREADS`
    /// when it is set to a positive integer.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(THREADS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.num_threads = n,
                _ => warn!(value = %raw, "ignoring invalid {}", THREADS_ENV),
            }
        }
        config
    }

    pub fn threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

struct QueueState {
    jobs: VecDeque<Job>,
    terminate: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    queue_cv: Condvar,
    live: Mutex<usize>,
    live_cv: Condvar,
    panicked: AtomicUsize,
}

/// A fixed set of worker threads draining a FIFO queue of closures.
///
/// Items are dequeued in the order they were enqueued; which worker runs a
/// given item, and the order in which items complete, is unspecified.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    config: PoolConfig,
}

impl ThreadPool {
    /// Spawns a pool with `num_threads` workers and default naming.
    ///
    /// # Arguments
    ///
    /// * `num_threads` - Number of worker threads, must be at least one.
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::default().threads(num_threads))
    }

    /// Spawns a pool from an explicit configuration.
    ///
    /// Every worker starts parked on the queue condvar. If a spawn fails the
    /// workers already started are terminated before the error is returned.
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        if config.num_threads == 0 {
            return Err(PoolError::NoThreads);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                terminate: false,
            }),
            queue_cv: Condvar::new(),
            live: Mutex::new(0),
            live_cv: Condvar::new(),
            panicked: AtomicUsize::new(0),
        });

        let mut pool = ThreadPool {
            shared,
            workers: Vec::with_capacity(config.num_threads),
            config,
        };

        for index in 0..pool.config.num_threads {
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", pool.config.thread_name_prefix, index));
            if let Some(stack_size) = pool.config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let shared = Arc::clone(&pool.shared);
            let handle = builder
                .spawn(move || worker_loop(shared, index))
                .map_err(|source| PoolError::Spawn { index, source })?;
            pool.workers.push(handle);
        }

        debug!(
            threads = pool.config.num_threads,
            prefix = %pool.config.thread_name_prefix,
            "thread pool started"
        );
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.config.num_threads
    }

    /// Items enqueued but not yet completed.
    pub fn pending(&self) -> usize {
        *lock(&self.shared.live)
    }

    /// Appends a work item to the tail of the queue and wakes every idle worker.
    ///
    /// # Arguments
    ///
    /// * `job` - Runs exactly once on some worker thread.
    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(job));
    }

    /// Enqueues a closure that borrows from the caller.
    ///
    /// # Safety
    ///
    /// The caller must not let `'a` end before the item has completed, i.e.
    /// it has to call [`wait`](Self::wait) before anything the closure
    /// borrows goes out of scope, on every path including unwinding.
    pub(crate) unsafe fn enqueue_scoped<'a>(&self, job: Box<dyn FnOnce() + Send + 'a>) {
        // SAFETY: only the lifetime bound changes, the caller keeps the
        // borrow alive until the barrier.
        let job: Job = unsafe { std::mem::transmute(job) };
        self.push(job);
    }

    fn push(&self, job: Job) {
        // Counter is bumped while the queue lock is still held so no worker can
        // dequeue and complete the item before it is counted.
        let mut queue = lock(&self.shared.queue);
        queue.jobs.push_back(job);
        *lock(&self.shared.live) += 1;
        drop(queue);
        self.shared.queue_cv.notify_all();
    }

    /// Blocks until every enqueued item has completed.
    ///
    /// Must not be called from inside a work item of the same pool; that
    /// deadlocks. Panics inside items are caught by the worker and reported
    /// here once the barrier is reached.
    pub fn wait(&self) -> Result<(), PoolError> {
        let mut live = lock(&self.shared.live);
        while *live != 0 {
            live = self
                .shared
                .live_cv
                .wait(live)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(live);

        match self.shared.panicked.swap(0, Ordering::AcqRel) {
            0 => Ok(()),
            count => Err(PoolError::WorkPanicked { count }),
        }
    }

    /// Drains the queue, stops every worker and joins them.
    ///
    /// Items already queued still run; the pool is consumed and cannot be
    /// reused. Dropping the pool does the same.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        lock(&self.shared.queue).terminate = true;
        self.shared.queue_cv.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread exited abnormally");
            }
        }
        debug!(threads = self.config.num_threads, "thread pool terminated");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.config.num_threads)
            .field("pending", &self.pending())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    trace!(worker = index, "worker waiting");
    loop {
        let job = {
            let mut queue = lock(&shared.queue);
            loop {
                // Pending items are drained before the terminate flag is honoured.
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.terminate {
                    break None;
                }
                queue = shared
                    .queue_cv
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        let Some(job) = job else {
            break;
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            shared.panicked.fetch_add(1, Ordering::AcqRel);
            error!(worker = index, "work item panicked");
        }

        let mut live = lock(&shared.live);
        *live -= 1;
        if *live == 0 {
            shared.live_cv.notify_all();
        }
    }
    trace!(worker = index, "worker terminated");
}

// No lock is ever held while user code runs, so a poisoned guard still
// protects consistent state.
#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

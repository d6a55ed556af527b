//! Static-partition parallel loop on top of [`ThreadPool`].

use std::ops::Range;

use crate::error::PoolError;
use crate::pool::ThreadPool;

/// Half-open index range handled by `worker` when `count` indices are split
/// into `workers` contiguous chunks of `ceil(count / workers)`.
///
/// Trailing chunks are clamped to `count`, so they may be short or empty.
#[inline]
pub fn chunk_range(worker: usize, workers: usize, count: usize) -> Range<usize> {
    let chunk = count.div_ceil(workers.max(1));
    let start = worker.saturating_mul(chunk).min(count);
    let end = (worker + 1).saturating_mul(chunk).min(count);
    start..end
}

/// Calls `f(i)` for every `i` in `0..count` and returns once all calls have finished.
///
/// One work item per pool thread is enqueued, each walking its own chunk in
/// increasing index order. Ordering across chunks is unspecified. `f` may
/// borrow from the caller's stack.
///
/// Must not be called from inside a work item of `pool`.
///
/// The barrier is [`ThreadPool::wait`], so the result covers every item on
/// the pool, not only these chunks. `Err(PoolError::WorkPanicked)` counts
/// panics from any item since the last `wait` returned, including earlier
/// [`ThreadPool::enqueue`] calls and items from another thread's concurrent
/// `parallel_for`. The first caller to reach the barrier takes the count.
///
/// # Arguments
///
/// * `pool` - Pool whose workers run the chunks.
/// * `count` - Number of indices; zero enqueues only empty chunks.
/// * `f` - Per-index callback.
pub fn parallel_for<F>(pool: &ThreadPool, count: usize, f: F) -> Result<(), PoolError>
where
    F: Fn(usize) + Sync,
{
    let workers = pool.thread_count();
    let f = &f;
    for worker in 0..workers {
        let range = chunk_range(worker, workers, count);
        let job: Box<dyn FnOnce() + Send + '_> = Box::new(move || {
            for index in range {
                f(index);
            }
        });
        // SAFETY: `wait` below does not return before every chunk has run,
        // and nothing between here and there can unwind.
        unsafe { pool.enqueue_scoped(job) };
    }
    pool.wait()
}

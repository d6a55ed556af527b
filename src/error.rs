//! Error types for the pool and the hash map.

use std::io;

/// Errors reported by [`ThreadPool`](crate::ThreadPool) and
/// [`parallel_for`](crate::parallel_for).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("thread pool needs at least one worker thread")]
    NoThreads,

    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("{count} work item(s) panicked since the last wait")]
    WorkPanicked { count: usize },
}

/// Errors reported by [`Hashmap`](crate::Hashmap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HashmapError {
    #[error("requested capacity {requested} exceeds the maximum table size {max}")]
    CapacityTooLarge { requested: usize, max: usize },

    #[error("hash map is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("key {0:#x} is reserved as the empty-slot sentinel")]
    ReservedKey(u32),
}

/// Errors reported by [`SpatialGrid`](crate::SpatialGrid).
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("cell size must be positive and finite, got {0}")]
    InvalidCellSize(f32),

    #[error("{0} points do not fit in 32-bit point indices")]
    TooManyPoints(usize),

    #[error(transparent)]
    Hashmap(#[from] HashmapError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

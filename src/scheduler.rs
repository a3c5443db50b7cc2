//! The injected parallel-map capability.

use rayon::prelude::*;

/// A fork-join map over independent work items.
///
/// The update algorithm is decoupled from any specific concurrency runtime
/// by receiving this capability from the session driver. Implementations
/// must preserve item-to-result correspondence (result `i` comes from item
/// `i`) but may compute in any order or distribution across workers; no unit
/// of work may block waiting on another unit in the same map.
pub trait Scheduler: Send + Sync {
    /// Map `f` over `items`, possibly in parallel.
    fn parallel_map<T, U, F>(&self, items: Vec<T>, f: F) -> Vec<U>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> U + Send + Sync;
}

/// Default work-splitting granularity for [`RayonScheduler`].
const DEFAULT_MIN_CHUNK: usize = 16;

/// Rayon-backed scheduler.
///
/// `min_chunk` is the parallelism-granularity knob consumed from the session
/// driver: work lists are not split below this many items per worker, which
/// keeps tiny updates from paying fork overhead.
#[derive(Debug, Clone, Copy)]
pub struct RayonScheduler {
    min_chunk: usize,
}

impl Default for RayonScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RayonScheduler {
    /// Create a scheduler with the default granularity.
    pub fn new() -> Self {
        Self {
            min_chunk: DEFAULT_MIN_CHUNK,
        }
    }

    /// Create a scheduler that never splits below `min_chunk` items.
    pub fn with_min_chunk(min_chunk: usize) -> Self {
        Self {
            min_chunk: min_chunk.max(1),
        }
    }
}

impl Scheduler for RayonScheduler {
    fn parallel_map<T, U, F>(&self, items: Vec<T>, f: F) -> Vec<U>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> U + Send + Sync,
    {
        items
            .into_par_iter()
            .with_min_len(self.min_chunk)
            .map(f)
            .collect()
    }
}

/// Single-threaded scheduler: maps in place, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialScheduler;

impl Scheduler for SerialScheduler {
    fn parallel_map<T, U, F>(&self, items: Vec<T>, f: F) -> Vec<U>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> U + Send + Sync,
    {
        items.into_iter().map(f).collect()
    }
}

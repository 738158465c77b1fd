//! Reuse pools for handles and entries.
//!
//! Every request opens a handle and usually materializes a batch of
//! entries. Pools keep released instances (and the allocations inside
//! them) for the next request. An instance is reset both when it is
//! released and when it is handed out again, so nothing from a previous
//! request is observable after `acquire`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::entry::Entry;
use super::handle::Node;

/// Types that can be returned to a [`Pool`]
pub trait Recycle: Default {
    /// Drop all request-specific state, keeping allocations where possible
    fn reset(&mut self);
}

/// Pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Instances handed out
    pub acquired: u64,
    /// Instances given back
    pub released: u64,
    /// Instances created because the pool was empty
    pub allocated: u64,
    /// Instances currently waiting for reuse
    pub idle: usize,
}

impl PoolStats {
    /// Instances acquired and not yet released
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Thread-safe free list of reusable instances
#[derive(Debug)]
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    capacity: usize,
    acquired: AtomicU64,
    released: AtomicU64,
    allocated: AtomicU64,
}

impl<T: Recycle> Pool<T> {
    /// Create a pool keeping at most `capacity` idle instances
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// Take an instance out of the pool, allocating one if none is idle
    pub fn acquire(&self) -> T {
        let reused = self.lock().pop();
        let mut item = match reused {
            Some(item) => item,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        };
        item.reset();
        self.acquired.fetch_add(1, Ordering::Relaxed);
        item
    }

    /// Give an instance back. Past `capacity` idle instances it is dropped.
    pub fn release(&self, mut item: T) {
        item.reset();
        self.released.fetch_add(1, Ordering::Relaxed);
        let mut free = self.lock();
        if free.len() < self.capacity {
            free.push(item);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            idle: self.lock().len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        // Items are reset on both sides, so a poisoned list is still usable
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The pools shared by every handle of one filesystem
#[derive(Debug)]
pub struct FsPools {
    pub(crate) nodes: Pool<Node>,
    pub(crate) entries: Pool<Entry>,
}

impl FsPools {
    /// Create node and entry pools with the same idle capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: Pool::new(capacity),
            entries: Pool::new(capacity),
        }
    }

    pub fn node_stats(&self) -> PoolStats {
        self.nodes.stats()
    }

    pub fn entry_stats(&self) -> PoolStats {
        self.entries.stats()
    }
}

//! Object Pool
//!
//! Free-list of reusable buffers so the orderbook hot path does not allocate
//! fresh level vectors for every message. A buffer is acquired before
//! parsing and released once every callback for the event has returned.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::domain::PriceLevel;

/// Pool of orderbook level buffers.
pub type LevelPool = ObjectPool<Vec<PriceLevel>>;

/// Default number of idle buffers kept per pool.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Buffers larger than this are dropped on release instead of retained.
const MAX_RETAINED_CAPACITY: usize = 8_192;

/// A value that can be cleared and handed out again.
pub trait Poolable: Default + Send {
    /// Clear contents. Returns `false` if the value should not be retained.
    fn reset(&mut self) -> bool;
}

impl<T: Send> Poolable for Vec<T> {
    fn reset(&mut self) -> bool {
        self.clear();
        self.capacity() <= MAX_RETAINED_CAPACITY
    }
}

/// Counters describing pool effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Values handed out from the free list.
    pub reused: u64,
    /// Values freshly allocated because the free list was empty.
    pub allocated: u64,
    /// Values currently idle in the free list.
    pub idle: usize,
}

/// Explicit free-list keyed by value shape.
#[derive(Debug)]
pub struct ObjectPool<T: Poolable> {
    free: Mutex<Vec<T>>,
    max_idle: usize,
    reused: AtomicU64,
    allocated: AtomicU64,
}

impl<T: Poolable> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool keeping at most `max_idle` free values.
    #[must_use]
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// Take a cleared value.
    pub fn acquire(&self) -> T {
        if let Some(value) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return value;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        T::default()
    }

    /// Return a value to the free list.
    pub fn release(&self, mut value: T) {
        if !value.reset() {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(value);
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            reused: self.reused.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            idle: self.free.lock().len(),
        }
    }
}

//! Bounded Message Queue
//!
//! Single hand-off point between the socket reader and the message
//! processor. Pushing never blocks: when the queue is full the oldest entry
//! is evicted, since the freshest market data is the most valuable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Entry queued without eviction.
    Accepted,
    /// Entry queued after evicting the oldest one.
    DroppedOldest,
    /// Queue is closed; entry discarded.
    Closed,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries currently queued.
    pub depth: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Entries evicted because the queue was full.
    pub dropped: u64,
    /// Entries accepted since creation.
    pub enqueued: u64,
}

/// Bounded FIFO with drop-oldest overflow.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    entries: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    enqueued: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking, evicting the oldest entry when full.
    pub fn push(&self, entry: T) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut entries = self.entries.lock();
            let outcome = if entries.len() >= self.capacity {
                entries.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Accepted
            };
            entries.push_back(entry);
            outcome
        };

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        outcome
    }

    /// Dequeue if anything is available.
    pub fn try_pop(&self) -> Option<T> {
        self.entries.lock().pop_front()
    }

    /// Wait for the next entry. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<T> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }
            self.notify.notified().await;
        }
    }

    /// Discard everything queued. Returns how many entries were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Close the queue, discarding queued entries and waking the consumer.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let discarded = self.clear();
        self.notify.notify_one();
        discarded
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Entries currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.capacity,
            dropped: self.dropped.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
        }
    }
}

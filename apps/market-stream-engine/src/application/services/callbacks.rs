//! Callback Registry
//!
//! Explicit subscriber list per event type. Dispatch works on a snapshot of
//! the list, so callbacks may register or unregister (including themselves)
//! while being invoked. Each callback is isolated: an error or a panic in
//! one does not prevent the others from running.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Process-wide id source so ids never collide across registries.
static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl CallbackId {
    fn next() -> Self {
        Self(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// A subscriber. Receives a borrow of the event and must clone anything it
/// wants to keep.
pub type Callback<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

type Entries<E> = Arc<Vec<(CallbackId, Callback<E>)>>;

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Callbacks invoked.
    pub invoked: usize,
    /// Callbacks that returned an error or panicked.
    pub failed: usize,
}

/// Subscribers for one event type.
pub struct CallbackRegistry<E> {
    name: &'static str,
    entries: RwLock<Entries<E>>,
}

impl<E> std::fmt::Debug for CallbackRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

impl<E> CallbackRegistry<E> {
    /// Create an empty registry. `name` labels log lines.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Add a subscriber.
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = CallbackId::next();
        let callback: Callback<E> = Arc::new(callback);
        let mut entries = self.entries.write();
        let mut next: Vec<_> = entries.iter().cloned().collect();
        next.push((id, callback));
        *entries = Arc::new(next);
        id
    }

    /// Remove a subscriber. Returns `false` if the id is not registered here.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = entries
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every subscriber with `event`.
    pub fn dispatch(&self, event: &E) -> DispatchOutcome {
        let snapshot = Arc::clone(&self.entries.read());
        let mut outcome = DispatchOutcome::default();

        for (id, callback) in snapshot.iter() {
            outcome.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        registry = self.name,
                        callback_id = id.value(),
                        error = %e,
                        "Callback returned error"
                    );
                }
                Err(_) => {
                    outcome.failed += 1;
                    tracing::error!(
                        registry = self.name,
                        callback_id = id.value(),
                        "Callback panicked"
                    );
                }
            }
        }

        outcome
    }
}

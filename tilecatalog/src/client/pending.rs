//! Registry of a client's outstanding requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::cancellation::CancellationContext;

/// Outstanding requests of one client instance, keyed by an opaque id.
///
/// Supports bulk cancellation and "cancel all and wait" for clean shutdown.
#[derive(Default)]
pub struct PendingRequests {
    requests: DashMap<u64, CancellationContext>,
    next_id: AtomicU64,
    drained_lock: Mutex<()>,
    drained: Condvar,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request and returns its id.
    pub fn insert(&self, context: CancellationContext) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.requests.insert(id, context);
        id
    }

    /// Unregisters a finished request. Returns `false` if unknown.
    pub fn remove(&self, id: u64) -> bool {
        let removed = self.requests.remove(&id).is_some();
        if removed {
            let _guard = self.drained_lock.lock();
            self.drained.notify_all();
        }
        removed
    }

    /// Cancels every outstanding request.
    pub fn cancel_all(&self) -> bool {
        // Snapshot first: cancellation may complete a request, which calls
        // `remove` on this map.
        let contexts: Vec<CancellationContext> =
            self.requests.iter().map(|entry| entry.value().clone()).collect();
        if !contexts.is_empty() {
            debug!(count = contexts.len(), "Cancelling pending requests");
        }
        for context in contexts {
            context.cancel();
        }
        true
    }

    /// Cancels every outstanding request and waits until all have finished.
    ///
    /// Returns `false` if requests were still registered after `timeout`.
    pub fn cancel_all_and_wait(&self, timeout: Duration) -> bool {
        self.cancel_all();

        let deadline = Instant::now() + timeout;
        let mut guard = self.drained_lock.lock();
        while !self.requests.is_empty() {
            if self.drained.wait_until(&mut guard, deadline).timed_out() {
                return self.requests.is_empty();
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("len", &self.requests.len())
            .finish()
    }
}

//! Single-flight coordination of identical in-flight requests.
//!
//! # Architecture
//!
//! ```text
//! caller A ─┐  execute_or_associate(key)
//!           │                                   CatalogApi
//! caller B ─┼──► SingleFlight ──── execute ───► (one call)
//!           │        │                              │
//! caller C ─┘        ▼                              ▼
//!              [A, B, C callbacks] ◄──── completion(result)
//! ```
//!
//! The first caller for a key runs `execute`; later callers attach their
//! callback to the operation already in flight. Completion fans the same
//! result out to every attached callback and unregisters the key.
//!
//! Each caller gets its own [`CancellationToken`]. Cancelling it detaches
//! only that caller, who receives a `Cancelled` error. When the last caller
//! detaches, the underlying operation is cancelled and any late result is
//! discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::cancellation::CancellationToken;
use super::Callback;
use crate::error::{ApiError, ApiResponse};

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Total requests received
    pub total_requests: u64,
    /// Requests that attached to an operation already in flight
    pub coalesced_requests: u64,
    /// Requests that started a new operation
    pub new_requests: u64,
}

struct Flight<T> {
    generation: u64,
    callbacks: HashMap<u64, Callback<T>>,
    token: CancellationToken,
}

struct Inner<T> {
    flights: Mutex<HashMap<String, Flight<T>>>,
    stats: Mutex<CoalescerStats>,
    next_id: AtomicU64,
}

impl<T> Inner<T> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Completion handle passed to the function that performs the real work.
///
/// Calling it more than once has no effect beyond the first call.
pub type Completion<T> = Box<dyn FnOnce(ApiResponse<T>) + Send + 'static>;

/// Deduplicates concurrent operations sharing a key.
pub struct SingleFlight<T> {
    inner: Arc<Inner<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flights: Mutex::new(HashMap::new()),
                stats: Mutex::new(CoalescerStats::default()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Runs `execute` for `key` unless an operation for `key` is already in
    /// flight, in which case `callback` is attached to that operation.
    ///
    /// `execute` receives the completion handle and returns the cancel hook
    /// of the operation it started. It runs on the calling thread, outside
    /// of any internal lock.
    pub fn execute_or_associate<E>(
        &self,
        key: &str,
        execute: E,
        callback: Callback<T>,
    ) -> CancellationToken
    where
        E: FnOnce(Completion<T>) -> CancellationToken,
    {
        let caller_id = self.inner.next_id();
        let generation = {
            let mut flights = self.inner.flights.lock();
            let mut stats = self.inner.stats.lock();
            stats.total_requests += 1;

            if let Some(flight) = flights.get_mut(key) {
                flight.callbacks.insert(caller_id, callback);
                stats.coalesced_requests += 1;
                debug!(
                    key = %key,
                    waiters = flight.callbacks.len(),
                    "Coalescing request with in-flight operation"
                );
                return self.detach_token(key, flight.generation, caller_id);
            }

            let generation = self.inner.next_id();
            let mut callbacks = HashMap::new();
            callbacks.insert(caller_id, callback);
            flights.insert(
                key.to_string(),
                Flight {
                    generation,
                    callbacks,
                    token: CancellationToken::none(),
                },
            );
            stats.new_requests += 1;
            debug!(key = %key, in_flight = flights.len(), "Starting new operation");
            generation
        };

        let completed = Arc::new(AtomicBool::new(false));
        let completion = {
            let inner = Arc::downgrade(&self.inner);
            let key = key.to_string();
            let completed = Arc::clone(&completed);
            Box::new(move |result: ApiResponse<T>| {
                completed.store(true, Ordering::Release);
                complete(&inner, &key, generation, result);
            })
        };

        let token = execute(completion);

        let mut flights = self.inner.flights.lock();
        match flights.get_mut(key) {
            Some(flight) if flight.generation == generation => {
                flight.token = token;
            }
            _ => {
                drop(flights);
                // Every caller detached while `execute` was still running.
                if !completed.load(Ordering::Acquire) {
                    token.cancel();
                }
            }
        }

        self.detach_token(key, generation, caller_id)
    }

    fn detach_token(&self, key: &str, generation: u64, caller_id: u64) -> CancellationToken {
        let inner = Arc::downgrade(&self.inner);
        let key = key.to_string();
        CancellationToken::new(move || detach(&inner, &key, generation, caller_id))
    }

    /// Cancels every in-flight operation; every attached caller receives a
    /// `Cancelled` error.
    pub fn cancel_all(&self) {
        let flights: Vec<Flight<T>> = self.inner.flights.lock().drain().map(|(_, f)| f).collect();
        if flights.is_empty() {
            return;
        }
        debug!(operations = flights.len(), "Cancelling all in-flight operations");
        for flight in flights {
            flight.token.cancel();
            for (_, callback) in flight.callbacks {
                callback(Err(ApiError::cancelled()));
            }
        }
    }

    /// Number of distinct operations currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.flights.lock().len()
    }

    pub fn stats(&self) -> CoalescerStats {
        *self.inner.stats.lock()
    }
}

fn complete<T: Clone>(inner: &Weak<Inner<T>>, key: &str, generation: u64, result: ApiResponse<T>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let flight = {
        let mut flights = inner.flights.lock();
        match flights.get(key) {
            Some(flight) if flight.generation == generation => flights.remove(key),
            _ => None,
        }
    };
    let Some(flight) = flight else {
        debug!(key = %key, "Discarding result of detached operation");
        return;
    };
    for (_, callback) in flight.callbacks {
        callback(result.clone());
    }
}

fn detach<T>(inner: &Weak<Inner<T>>, key: &str, generation: u64, caller_id: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let (callback, abandoned) = {
        let mut flights = inner.flights.lock();
        let Some(flight) = flights.get_mut(key) else {
            return;
        };
        if flight.generation != generation {
            return;
        }
        let Some(callback) = flight.callbacks.remove(&caller_id) else {
            return;
        };
        let abandoned = if flight.callbacks.is_empty() {
            flights.remove(key).map(|flight| flight.token)
        } else {
            None
        };
        (callback, abandoned)
    };

    callback(Err(ApiError::cancelled()));
    if let Some(token) = abandoned {
        debug!(key = %key, "Last caller detached, cancelling operation");
        token.cancel();
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SingleFlight<T> {
    fn drop(&mut self) {
        let flights: Vec<Flight<T>> = self.inner.flights.lock().drain().map(|(_, f)| f).collect();
        for flight in flights {
            flight.token.cancel();
            for (_, callback) in flight.callbacks {
                callback(Err(ApiError::cancelled()));
            }
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.inner.flights.lock().len())
            .finish()
    }
}

//! Synchronous bridge over the callback-based backend.
//!
//! Repositories run on scheduler threads and are written as straight-line
//! code; every network call goes through [`blocking_call`], which starts the
//! call through a [`SingleFlight`] and waits for its result on a
//! [`Condition`], bounded by the configured timeout.
//!
//! Cancellation, timeout and completion can race. The [`DeliveryFlag`]
//! decides which of them owns the outcome. Side effects attached to the
//! shared completion (cache writes) are not suppressed: an operation that
//! outlives a timed-out waiter still writes its result when it finishes.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::client::{
    Callback, CancellationContext, CancellationToken, ClientSettings, Completion, DeliveryFlag,
    SingleFlight,
};
use crate::error::{ApiError, ApiResponse};
use crate::thread::Condition;

/// Runs `start` for `key` (or joins the identical in-flight call) and blocks
/// until it resolves, `context` is cancelled or the timeout elapses.
///
/// On timeout `context` is cancelled, which detaches this caller from the
/// shared operation, and `RequestTimeout` is returned.
pub fn blocking_call<T, S>(
    settings: &ClientSettings,
    coalescer: &SingleFlight<T>,
    key: &str,
    context: &CancellationContext,
    start: S,
) -> ApiResponse<T>
where
    T: Clone + Send + 'static,
    S: FnOnce(Completion<T>) -> CancellationToken,
{
    let flag = DeliveryFlag::new();
    let slot: Arc<Mutex<Option<ApiResponse<T>>>> = Arc::new(Mutex::new(None));
    let condition = Arc::new(Condition::new());

    context.execute_or_cancelled(
        || {
            let callback: Callback<T> = {
                let slot = Arc::clone(&slot);
                let condition = Arc::clone(&condition);
                Box::new(move |response| {
                    *slot.lock() = Some(response);
                    condition.notify();
                })
            };
            let token = coalescer.execute_or_associate(key, start, callback);

            let flag = flag.clone();
            let condition = Arc::clone(&condition);
            CancellationToken::new(move || {
                if flag.claim() {
                    token.cancel();
                    condition.notify();
                }
            })
        },
        || condition.notify(),
    );

    if !condition.wait(settings.timeout) {
        debug!(key = %key, timeout_ms = settings.timeout.as_millis() as u64, "Request timed out");
        context.cancel();
        return Err(ApiError::timeout());
    }

    // Disarm the cancel hook; the context may be reused for the next call.
    flag.claim();

    if context.is_cancelled() {
        return Err(ApiError::cancelled());
    }

    let response = slot.lock().take();
    response.unwrap_or_else(|| Err(ApiError::cancelled()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::testing::MockCatalogApi;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn settings(timeout: Duration) -> ClientSettings {
        ClientSettings::new(Arc::new(MockCatalogApi::new())).with_timeout(timeout)
    }

    #[test]
    fn test_inline_completion() {
        let settings = settings(Duration::from_secs(5));
        let coalescer = SingleFlight::<u32>::new();
        let context = CancellationContext::new();

        let result = blocking_call(&settings, &coalescer, "k", &context, |completion| {
            completion(Ok(5));
            CancellationToken::none()
        });

        assert_eq!(result, Ok(5));
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[test]
    fn test_completion_from_another_thread() {
        let settings = settings(Duration::from_secs(5));
        let coalescer = SingleFlight::<u32>::new();
        let context = CancellationContext::new();

        let result = blocking_call(&settings, &coalescer, "k", &context, |completion| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                completion(Err(ApiError::not_found("gone")));
            });
            CancellationToken::none()
        });

        assert_eq!(result.unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_cancelled_context_never_starts() {
        let settings = settings(Duration::from_secs(5));
        let coalescer = SingleFlight::<u32>::new();
        let context = CancellationContext::new();
        context.cancel();

        let result = blocking_call(&settings, &coalescer, "k", &context, |_completion| {
            panic!("must not start")
        });

        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_timeout_cancels_operation() {
        let settings = settings(Duration::from_millis(30));
        let coalescer = SingleFlight::<u32>::new();
        let context = CancellationContext::new();
        let cancelled = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancelled);
        let result = blocking_call(&settings, &coalescer, "k", &context, move |_completion| {
            CancellationToken::new(move || flag.store(true, Ordering::SeqCst))
        });

        assert_eq!(result.unwrap_err().code(), ErrorCode::RequestTimeout);
        assert!(context.is_cancelled());
        assert!(cancelled.load(Ordering::SeqCst));
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[test]
    fn test_cancel_from_other_thread_while_waiting() {
        let settings = settings(Duration::from_secs(5));
        let coalescer = SingleFlight::<u32>::new();
        let context = CancellationContext::new();

        let canceller = context.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let result = blocking_call(&settings, &coalescer, "k", &context, |_completion| {
            CancellationToken::none()
        });
        handle.join().unwrap();

        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_concurrent_callers_share_one_start() {
        let settings = Arc::new(settings(Duration::from_secs(5)));
        let coalescer = Arc::new(SingleFlight::<u32>::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let completion_slot: Arc<Mutex<Option<Completion<u32>>>> = Arc::new(Mutex::new(None));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let settings = Arc::clone(&settings);
                let coalescer = Arc::clone(&coalescer);
                let starts = Arc::clone(&starts);
                let completion_slot = Arc::clone(&completion_slot);
                thread::spawn(move || {
                    let context = CancellationContext::new();
                    blocking_call(&settings, &coalescer, "shared", &context, move |completion| {
                        starts.fetch_add(1, Ordering::SeqCst);
                        *completion_slot.lock() = Some(completion);
                        CancellationToken::none()
                    })
                })
            })
            .collect();

        // Wait for every caller to attach, then complete once.
        while coalescer.stats().total_requests < 4 || completion_slot.lock().is_none() {
            thread::sleep(Duration::from_millis(1));
        }
        let completion = completion_slot.lock().take().unwrap();
        completion(Ok(42));

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(42));
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }
}

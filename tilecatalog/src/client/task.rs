//! Running one client request on the scheduler.
//!
//! [`add_task`] is the single entry path for asynchronous client
//! operations: it registers the request with [`PendingRequests`], runs the
//! task body under a fresh [`CancellationContext`] and guarantees the
//! caller's callback fires exactly once.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::cancellation::{CancellationContext, CancellationToken};
use super::delivery::DeliveryFlag;
use super::pending::PendingRequests;
use super::settings::ClientSettings;
use super::Callback;
use crate::error::{ApiError, ApiResponse, ErrorCode};
use crate::thread::{execute_or_schedule, Priority};

/// State shared between a scheduled request and its cancel token.
pub struct TaskContext<T> {
    context: CancellationContext,
    delivered: DeliveryFlag,
    callback: Mutex<Option<Callback<T>>>,
}

impl<T> TaskContext<T> {
    pub fn new(callback: Callback<T>) -> Self {
        Self::with_context(callback, CancellationContext::new())
    }

    /// Runs under an existing context, so cancelling `context` cancels the task.
    pub fn with_context(callback: Callback<T>, context: CancellationContext) -> Self {
        Self {
            context,
            delivered: DeliveryFlag::new(),
            callback: Mutex::new(Some(callback)),
        }
    }

    pub fn context(&self) -> &CancellationContext {
        &self.context
    }

    /// Runs `task` unless already cancelled, then delivers the outcome.
    ///
    /// A request cancelled while `task` was running resolves to `Cancelled`
    /// regardless of what `task` returned.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce(&CancellationContext) -> ApiResponse<T>,
    {
        let result = if self.context.is_cancelled() {
            Err(ApiError::cancelled())
        } else {
            task(&self.context)
        };
        let result = if self.context.is_cancelled() {
            Err(ApiError::cancelled())
        } else {
            result
        };
        self.deliver(result);
    }

    /// Hands `result` to the callback if nothing was delivered yet.
    pub fn deliver(&self, result: ApiResponse<T>) -> bool {
        if !self.delivered.claim() {
            return false;
        }
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback(result);
        }
        true
    }
}

/// Schedules `task` and delivers its result to `callback`.
///
/// The returned token cancels the request: if the task has not started it
/// resolves to `Cancelled` when dequeued, otherwise the operation currently
/// registered with its context is cancelled.
pub fn add_task<T, F>(
    settings: &ClientSettings,
    pending: &Arc<PendingRequests>,
    task: F,
    callback: Callback<T>,
    priority: Priority,
) -> CancellationToken
where
    T: Send + 'static,
    F: FnOnce(&CancellationContext) -> ApiResponse<T> + Send + 'static,
{
    add_task_with_context(
        settings,
        pending,
        task,
        callback,
        priority,
        CancellationContext::new(),
    )
}

/// Like [`add_task`], but the task runs under `context`.
///
/// Used when a parent operation owns the contexts of its children and
/// cancels them together.
pub fn add_task_with_context<T, F>(
    settings: &ClientSettings,
    pending: &Arc<PendingRequests>,
    task: F,
    callback: Callback<T>,
    priority: Priority,
    context: CancellationContext,
) -> CancellationToken
where
    T: Send + 'static,
    F: FnOnce(&CancellationContext) -> ApiResponse<T> + Send + 'static,
{
    let task_context = Arc::new(TaskContext::with_context(callback, context));
    let id = pending.insert(task_context.context().clone());

    let scheduled = {
        let task_context = Arc::clone(&task_context);
        let pending = Arc::clone(pending);
        execute_or_schedule(
            settings.task_scheduler.as_ref(),
            move || {
                task_context.execute(task);
                pending.remove(id);
            },
            priority,
        )
    };

    if let Err(e) = scheduled {
        warn!(error = %e, "Request rejected by task scheduler");
        task_context.deliver(Err(ApiError::new(ErrorCode::Cancelled, e.to_string())));
        pending.remove(id);
        return CancellationToken::none();
    }

    debug!(request = id, priority = %priority, "Request scheduled");
    let context = task_context.context().clone();
    CancellationToken::new(move || context.cancel())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{TaskScheduler, ThreadPoolTaskScheduler};
    use crate::testing::MockCatalogApi;
    use std::sync::mpsc;
    use std::time::Duration;

    fn settings_with_pool(threads: usize) -> ClientSettings {
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadPoolTaskScheduler::new(threads).unwrap());
        ClientSettings::new(Arc::new(MockCatalogApi::new())).with_task_scheduler(scheduler)
    }

    #[test]
    fn test_inline_task_delivers_result() {
        let settings = ClientSettings::new(Arc::new(MockCatalogApi::new()));
        let pending = Arc::new(PendingRequests::new());
        let (tx, rx) = mpsc::channel();

        add_task(
            &settings,
            &pending,
            |_context| Ok(3u32),
            Box::new(move |r| tx.send(r).unwrap()),
            Priority::Normal,
        );

        assert_eq!(rx.recv().unwrap(), Ok(3));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_cancel_before_dequeue_delivers_cancelled() {
        let settings = settings_with_pool(1);
        let pending = Arc::new(PendingRequests::new());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        add_task(
            &settings,
            &pending,
            move |_context| {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(0u32)
            },
            Box::new(|_| {}),
            Priority::High,
        );
        started_rx.recv().unwrap();

        let (tx, rx) = mpsc::channel();
        let token = add_task(
            &settings,
            &pending,
            |_context| -> ApiResponse<u32> { panic!("must not run") },
            Box::new(move |r| tx.send(r).unwrap()),
            Priority::Normal,
        );
        token.cancel();
        release_tx.send(()).unwrap();

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_cancel_while_running_overrides_result() {
        let settings = settings_with_pool(1);
        let pending = Arc::new(PendingRequests::new());
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel();

        let token = add_task(
            &settings,
            &pending,
            move |_context| {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(1u32)
            },
            Box::new(move |r| tx.send(r).unwrap()),
            Priority::Normal,
        );
        started_rx.recv().unwrap();
        token.cancel();
        release_tx.send(()).unwrap();

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_rejected_after_shutdown_still_delivers() {
        let pool = Arc::new(ThreadPoolTaskScheduler::new(1).unwrap());
        pool.shutdown();
        let scheduler: Arc<dyn TaskScheduler> = pool;
        let settings =
            ClientSettings::new(Arc::new(MockCatalogApi::new())).with_task_scheduler(scheduler);
        let pending = Arc::new(PendingRequests::new());
        let (tx, rx) = mpsc::channel();

        add_task(
            &settings,
            &pending,
            |_context| Ok(1u32),
            Box::new(move |r| tx.send(r).unwrap()),
            Priority::Normal,
        );

        assert!(rx.recv().unwrap().is_err());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_shared_context_cancels_task() {
        let settings = ClientSettings::new(Arc::new(MockCatalogApi::new()));
        let pending = Arc::new(PendingRequests::new());
        let context = CancellationContext::new();
        context.cancel();
        let (tx, rx) = mpsc::channel();

        add_task_with_context(
            &settings,
            &pending,
            |_context| Ok(1u32),
            Box::new(move |r| tx.send(r).unwrap()),
            Priority::Normal,
            context,
        );

        assert!(rx.recv().unwrap().unwrap_err().is_cancelled());
    }
}

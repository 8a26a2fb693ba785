//! Priority task scheduler backed by a fixed pool of worker threads.
//!
//! # Architecture
//!
//! ```text
//! schedule_task(High) ──┐
//! schedule_task(Low)  ──┼──► PriorityQueue ──► worker 0..N ──► job()
//! enqueue(Normal)     ──┘     (mutex+condvar)
//! ```
//!
//! Workers pop the highest-priority task available. A task that has been
//! dequeued runs to completion; it is never preempted by higher-priority
//! work that arrives later.
//!
//! # Shutdown
//!
//! [`ThreadPoolTaskScheduler::shutdown`] closes the scheduler to new work
//! (subsequent submissions fail with [`SchedulerError::ShutDown`]), lets the
//! workers drain every task that was already accepted, and joins them.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, trace};

use super::priority::Priority;
use super::queue::{Job, PriorityQueue, QueuedTask};
use crate::client::CancellationContext;

/// Errors returned when submitting work.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler no longer accepts tasks.
    #[error("task scheduler is shut down")]
    ShutDown,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Terminal failure of a scheduled task, observed through its handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task body panicked. The worker thread survives.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before its body ran.
    #[error("task cancelled")]
    Cancelled,

    /// The task was dropped without producing a result.
    #[error("task dropped before completion")]
    Dropped,
}

/// Anything that can run jobs in priority order.
///
/// Object safe, so schedulers are shared as `Arc<dyn TaskScheduler>`.
pub trait TaskScheduler: Send + Sync {
    /// Queues a type-erased job.
    fn enqueue(&self, job: Job, priority: Priority) -> Result<(), SchedulerError>;
}

/// Typed helpers available on every [`TaskScheduler`].
pub trait TaskSchedulerExt: TaskScheduler {
    /// Schedules `work` and returns a handle to its result.
    fn schedule_task<T, F>(&self, work: F, priority: Priority) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        self.enqueue(
            Box::new(move || {
                let result = run_guarded(work);
                let _ = sender.send(result);
            }),
            priority,
        )?;
        Ok(TaskHandle { receiver })
    }

    /// Schedules cancellation-aware `work`.
    ///
    /// If the returned handle is cancelled before a worker dequeues the task,
    /// the body never runs and the handle resolves to [`TaskError::Cancelled`].
    fn schedule_cancellable_task<T, F>(
        &self,
        work: F,
        priority: Priority,
    ) -> Result<CancellableTaskHandle<T>, SchedulerError>
    where
        F: FnOnce(&CancellationContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        let context = CancellationContext::new();
        let task_context = context.clone();
        let (sender, receiver) = mpsc::sync_channel(1);
        self.enqueue(
            Box::new(move || {
                let result = if task_context.is_cancelled() {
                    Err(TaskError::Cancelled)
                } else {
                    run_guarded(|| work(&task_context))
                };
                let _ = sender.send(result);
            }),
            priority,
        )?;
        Ok(CancellableTaskHandle {
            handle: TaskHandle { receiver },
            context,
        })
    }
}

impl<S: TaskScheduler + ?Sized> TaskSchedulerExt for S {}

fn run_guarded<T, F: FnOnce() -> T>(work: F) -> Result<T, TaskError> {
    panic::catch_unwind(AssertUnwindSafe(work))
        .map_err(|payload| TaskError::Panicked(panic_message(&*payload)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to the result of a scheduled task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: mpsc::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes.
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().unwrap_or(Err(TaskError::Dropped))
    }

    /// Blocks for at most `timeout`; `None` if the task has not finished.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(TaskError::Dropped)),
        }
    }
}

/// Handle to a cancellation-aware task.
#[derive(Debug)]
pub struct CancellableTaskHandle<T> {
    handle: TaskHandle<T>,
    context: CancellationContext,
}

impl<T> CancellableTaskHandle<T> {
    pub fn cancel(&self) {
        self.context.cancel();
    }

    pub fn context(&self) -> &CancellationContext {
        &self.context
    }

    pub fn wait(self) -> Result<T, TaskError> {
        self.handle.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        self.handle.wait_timeout(timeout)
    }
}

/// Runs `job` on `scheduler` when one is configured, inline otherwise.
pub fn execute_or_schedule<F>(
    scheduler: Option<&Arc<dyn TaskScheduler>>,
    job: F,
    priority: Priority,
) -> Result<(), SchedulerError>
where
    F: FnOnce() + Send + 'static,
{
    match scheduler {
        Some(scheduler) => scheduler.enqueue(Box::new(job), priority),
        None => {
            job();
            Ok(())
        }
    }
}

// =============================================================================
// Thread pool
// =============================================================================

struct PoolState {
    queue: PriorityQueue,
    shutting_down: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Fixed-size worker pool executing tasks by priority.
pub struct ThreadPoolTaskScheduler {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl ThreadPoolTaskScheduler {
    /// Spawns `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self, SchedulerError> {
        let thread_count = threads.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: PriorityQueue::new(),
                shutting_down: false,
            }),
            available: Condvar::new(),
        });

        let scheduler = Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(thread_count)),
            thread_count,
        };

        for id in 0..thread_count {
            let shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("tilecatalog-worker-{}", id))
                .spawn(move || worker_loop(id, shared));
            match spawned {
                Ok(handle) => scheduler.workers.lock().push(handle),
                Err(e) => {
                    error!(error = %e, worker = id, "Failed to spawn scheduler worker");
                    // Dropping `scheduler` joins whatever was spawned.
                    return Err(SchedulerError::Spawn(e));
                }
            }
        }

        info!(threads = thread_count, "Task scheduler started");
        Ok(scheduler)
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Number of tasks accepted but not yet dequeued.
    pub fn queued_tasks(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    /// Stops accepting work, drains the queue and joins the workers.
    ///
    /// Idempotent. When called from one of the pool's own workers that
    /// worker is not joined.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.shutting_down {
                state.shutting_down = true;
                debug!(queued = state.queue.len(), "Task scheduler shutting down");
            }
        }
        self.shared.available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("Scheduler worker terminated abnormally");
            }
        }
        info!("Task scheduler stopped");
    }
}

impl TaskScheduler for ThreadPoolTaskScheduler {
    fn enqueue(&self, job: Job, priority: Priority) -> Result<(), SchedulerError> {
        {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                debug!(priority = %priority, "Rejecting task after shutdown");
                return Err(SchedulerError::ShutDown);
            }
            state.queue.push(QueuedTask::new(job, priority));
        }
        self.shared.available.notify_one();
        Ok(())
    }
}

impl Drop for ThreadPoolTaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPoolTaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolTaskScheduler")
            .field("thread_count", &self.thread_count)
            .field("queued_tasks", &self.queued_tasks())
            .finish()
    }
}

fn worker_loop(id: usize, shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.queue.pop() {
                    break Some(task);
                }
                if state.shutting_down {
                    break None;
                }
                shared.available.wait(&mut state);
            }
        };

        let Some(task) = task else {
            trace!(worker = id, "Scheduler worker exiting");
            return;
        };

        trace!(
            worker = id,
            priority = %task.priority,
            wait_ms = task.wait_time().as_millis() as u64,
            "Running task"
        );
        // Typed helpers already catch panics; this guards raw `enqueue` jobs.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            error!(worker = id, panic = %panic_message(&*payload), "Scheduled task panicked");
        }
    }
}

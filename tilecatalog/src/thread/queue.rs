//! Priority queue for task scheduling.
//!
//! Tasks are ordered by priority (higher first), then by enqueue order
//! (FIFO within the same priority level). This ensures:
//!
//! 1. `High` requests are dequeued before `Normal` and `Low` work queued earlier
//! 2. Tasks at the same priority are processed in submission order
//!
//! # Example
//!
//! ```ignore
//! use tilecatalog::thread::{Priority, PriorityQueue, QueuedTask};
//!
//! let mut queue = PriorityQueue::new();
//!
//! queue.push(QueuedTask::new(Box::new(|| prefetch()), Priority::Low));
//! queue.push(QueuedTask::new(Box::new(|| lookup()), Priority::High));
//!
//! // High task comes out first despite being pushed second
//! let next = queue.pop();
//! assert_eq!(next.unwrap().priority, Priority::High);
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use super::priority::Priority;

/// A type-erased unit of work accepted by a scheduler.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

// =============================================================================
// Sequence Number Generator
// =============================================================================

/// Global sequence counter for FIFO ordering within priority levels.
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

// =============================================================================
// Queued Task
// =============================================================================

/// A job waiting to be executed, with its scheduling metadata.
pub struct QueuedTask {
    /// The work to run.
    pub job: Job,

    /// Task priority.
    pub priority: Priority,

    /// Sequence number for FIFO ordering within priority level.
    sequence: u64,

    /// When the task was enqueued (for wait time logging).
    pub enqueued_at: Instant,
}

impl QueuedTask {
    /// Creates a new queued task.
    ///
    /// The sequence number is automatically assigned for FIFO ordering.
    pub fn new(job: Job, priority: Priority) -> Self {
        Self {
            job,
            priority,
            sequence: next_sequence(),
            enqueued_at: Instant::now(),
        }
    }

    /// Returns how long this task has been waiting in the queue.
    pub fn wait_time(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Consumes the wrapper and runs the job on the current thread.
    pub fn run(self) {
        (self.job)()
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish()
    }
}

// Ordering for BinaryHeap: higher priority first, then lower sequence (older) first
impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // Max-heap: older (lower sequence) must compare greater
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other_ordering => other_ordering,
        }
    }
}

// =============================================================================
// Priority Queue
// =============================================================================

/// Priority queue of pending tasks.
///
/// The queue is not thread-safe; the thread pool wraps it in a mutex.
pub struct PriorityQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl PriorityQueue {
    /// Creates a new empty priority queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Adds a task to the queue.
    pub fn push(&mut self, task: QueuedTask) {
        self.heap.push(task);
    }

    /// Removes and returns the highest-priority task.
    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Builds a task that records `name` into `log` when run.
    fn make_task(log: &Arc<Mutex<Vec<String>>>, name: &str, priority: Priority) -> QueuedTask {
        let log = Arc::clone(log);
        let name = name.to_string();
        QueuedTask::new(Box::new(move || log.lock().unwrap().push(name)), priority)
    }

    fn drain(queue: &mut PriorityQueue) {
        while let Some(task) = queue.pop() {
            task.run();
        }
    }

    #[test]
    fn test_priority_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = PriorityQueue::new();

        queue.push(make_task(&log, "low", Priority::Low));
        queue.push(make_task(&log, "high", Priority::High));
        queue.push(make_task(&log, "normal", Priority::Normal));

        drain(&mut queue);
        assert_eq!(*log.lock().unwrap(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = PriorityQueue::new();

        queue.push(make_task(&log, "first", Priority::Normal));
        queue.push(make_task(&log, "second", Priority::Normal));
        queue.push(make_task(&log, "third", Priority::Normal));

        drain(&mut queue);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_mixed_priority_and_fifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = PriorityQueue::new();

        queue.push(make_task(&log, "normal1", Priority::Normal));
        queue.push(make_task(&log, "high1", Priority::High));
        queue.push(make_task(&log, "normal2", Priority::Normal));
        queue.push(make_task(&log, "high2", Priority::High));
        queue.push(make_task(&log, "low1", Priority::Low));

        drain(&mut queue);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["high1", "high2", "normal1", "normal2", "low1"]
        );
    }

    #[test]
    fn test_queue_operations() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = PriorityQueue::new();

        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);

        queue.push(make_task(&log, "task1", Priority::Low));
        queue.push(make_task(&log, "task2", Priority::High));

        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().unwrap().priority, Priority::High);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queued_task_wait_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let task = make_task(&log, "test", Priority::Normal);
        std::thread::sleep(Duration::from_millis(10));
        assert!(task.wait_time() >= Duration::from_millis(10));
    }
}

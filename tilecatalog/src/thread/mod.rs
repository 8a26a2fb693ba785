//! Task scheduling: priorities, the priority queue, and the worker pool.

mod condition;
mod priority;
mod queue;
mod scheduler;

pub use condition::Condition;
pub use priority::Priority;
pub use queue::{Job, PriorityQueue, QueuedTask};
pub use scheduler::{
    execute_or_schedule, CancellableTaskHandle, SchedulerError, TaskError, TaskHandle,
    TaskScheduler, TaskSchedulerExt, ThreadPoolTaskScheduler,
};

//! Request plumbing shared by every client operation.
//!
//! - [`CancellationToken`] / [`CancellationContext`]: cooperative cancellation
//! - [`DeliveryFlag`]: exactly-once result delivery
//! - [`PendingRequests`]: outstanding requests of one client
//! - [`SingleFlight`]: coalescing of identical in-flight requests
//! - [`add_task`]: scheduling a request with guaranteed delivery
//! - [`CancellableFuture`]: blocking or awaitable result handle
//! - [`ClientSettings`]: the shared configuration snapshot

mod cancellation;
mod delivery;
mod future;
mod pending;
mod settings;
mod single_flight;
mod task;

use crate::error::ApiResponse;

/// Receives the single terminal result of an operation.
pub type Callback<T> = Box<dyn FnOnce(ApiResponse<T>) + Send + 'static>;

pub use cancellation::{CancellationContext, CancellationToken};
pub use delivery::DeliveryFlag;
pub use future::CancellableFuture;
pub use pending::PendingRequests;
pub use settings::{ClientSettings, Coalescers, DEFAULT_TIMEOUT};
pub use single_flight::{CoalescerStats, Completion, SingleFlight};
pub use task::{add_task, add_task_with_context, TaskContext};

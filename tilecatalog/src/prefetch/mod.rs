//! Bulk tile prefetch bookkeeping.

mod job;
mod types;

pub use job::PrefetchJob;
pub use types::{PrefetchStatus, PrefetchSummary, PrefetchTileResult, StatusCallback};

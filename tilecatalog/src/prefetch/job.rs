//! Aggregation of the per-tile tasks of one prefetch.

use parking_lot::Mutex;
use tracing::{debug, info};

use super::types::{PrefetchStatus, PrefetchSummary, PrefetchTileResult, StatusCallback};
use crate::client::{Callback, CancellationContext};
use crate::error::{ApiError, ApiResponse};
use crate::geo::TileKey;

#[derive(Default)]
struct JobState {
    contexts: Vec<CancellationContext>,
    results: Vec<PrefetchTileResult>,
    completed: usize,
    failed: usize,
    bytes_transferred: u64,
    cancelled: bool,
}

/// Tracks the child tasks of a prefetch and fires the aggregate callback
/// once, after the last of `total` tasks completes.
pub struct PrefetchJob {
    state: Mutex<JobState>,
    callback: Mutex<Option<Callback<PrefetchSummary>>>,
    status_callback: Option<StatusCallback>,
    total: usize,
}

impl PrefetchJob {
    pub fn new(
        callback: Callback<PrefetchSummary>,
        status_callback: Option<StatusCallback>,
        total: usize,
    ) -> Self {
        Self {
            state: Mutex::new(JobState::default()),
            callback: Mutex::new(Some(callback)),
            status_callback,
            total,
        }
    }

    /// Registers a child task and returns the context it must run under.
    ///
    /// A job that is already cancelled hands out cancelled contexts.
    pub fn add_task(&self) -> CancellationContext {
        let context = CancellationContext::new();
        let mut state = self.state.lock();
        if state.cancelled {
            context.cancel();
        } else {
            state.contexts.push(context.clone());
        }
        context
    }

    /// Records the outcome of one child task.
    pub fn complete_task(&self, tile: TileKey, result: ApiResponse<()>, bytes: u64) {
        let (status, finished) = {
            let mut state = self.state.lock();
            if result.is_err() {
                state.failed += 1;
            }
            state.completed += 1;
            state.bytes_transferred += bytes;
            state.results.push(PrefetchTileResult { tile, result });

            let status = PrefetchStatus {
                prefetched_tiles: state.completed,
                total_tiles_to_prefetch: self.total,
                bytes_transferred: state.bytes_transferred,
            };
            let finished = (state.completed == self.total).then(|| {
                (
                    std::mem::take(&mut state.results),
                    state.cancelled,
                    state.failed,
                )
            });
            (status, finished)
        };

        if let Some(status_callback) = &self.status_callback {
            status_callback(status);
        }

        let Some((tiles, cancelled, failed)) = finished else {
            return;
        };
        let Some(callback) = self.callback.lock().take() else {
            return;
        };
        if cancelled {
            debug!(total = self.total, "Prefetch finished after cancellation");
            callback(Err(ApiError::cancelled()));
        } else {
            info!(
                total = self.total,
                failed,
                bytes = status.bytes_transferred,
                "Prefetch finished"
            );
            callback(Ok(PrefetchSummary { tiles }));
        }
    }

    /// Cancels every registered child task.
    ///
    /// Each child still completes (with `Cancelled`), so the aggregate
    /// callback fires once the last one reports in.
    pub fn cancel_operation(&self) {
        let contexts = {
            let mut state = self.state.lock();
            state.cancelled = true;
            std::mem::take(&mut state.contexts)
        };
        debug!(tasks = contexts.len(), "Cancelling prefetch");
        for context in contexts {
            context.cancel();
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl std::fmt::Debug for PrefetchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PrefetchJob")
            .field("total", &self.total)
            .field("completed", &state.completed)
            .field("failed", &state.failed)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;

    fn tile(index: u8) -> TileKey {
        TileKey::root().child(index).unwrap()
    }

    #[test]
    fn test_callback_fires_after_last_task() {
        let (tx, rx) = mpsc::channel();
        let job = PrefetchJob::new(Box::new(move |r| tx.send(r).unwrap()), None, 2);

        job.complete_task(tile(0), Ok(()), 10);
        assert!(rx.try_recv().is_err());

        job.complete_task(tile(1), Err(ApiError::not_found("Not found")), 0);
        let summary = rx.try_recv().unwrap().unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.failed_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_status_reports_each_task() {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let job = PrefetchJob::new(
            Box::new(|_| {}),
            Some(Box::new(move |status| sink.lock().push(status))),
            2,
        );

        job.complete_task(tile(0), Ok(()), 5);
        job.complete_task(tile(1), Ok(()), 7);

        let statuses = statuses.lock();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1].prefetched_tiles, 2);
        assert_eq!(statuses[1].total_tiles_to_prefetch, 2);
        assert_eq!(statuses[1].bytes_transferred, 12);
    }

    #[test]
    fn test_cancel_operation_cancels_children() {
        let (tx, rx) = mpsc::channel();
        let job = PrefetchJob::new(Box::new(move |r| tx.send(r).unwrap()), None, 2);
        let first = job.add_task();
        let second = job.add_task();

        job.cancel_operation();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(job.add_task().is_cancelled());

        job.complete_task(tile(0), Err(ApiError::cancelled()), 0);
        job.complete_task(tile(1), Err(ApiError::cancelled()), 0);
        assert!(rx.try_recv().unwrap().unwrap_err().is_cancelled());
    }
}

//! Prefetch progress and results.

use crate::error::ApiError;
use crate::geo::TileKey;

/// Outcome of prefetching one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchTileResult {
    pub tile: TileKey,
    pub result: Result<(), ApiError>,
}

impl PrefetchTileResult {
    pub fn is_successful(&self) -> bool {
        self.result.is_ok()
    }
}

/// Progress reported after every completed tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStatus {
    /// Tiles finished so far, failed ones included.
    pub prefetched_tiles: usize,
    pub total_tiles_to_prefetch: usize,
    /// Bytes downloaded; cache hits count nothing.
    pub bytes_transferred: u64,
}

impl PrefetchStatus {
    /// Completed fraction in `[0, 1]`; an empty prefetch is complete.
    pub fn progress(&self) -> f64 {
        if self.total_tiles_to_prefetch == 0 {
            return 1.0;
        }
        self.prefetched_tiles as f64 / self.total_tiles_to_prefetch as f64
    }
}

/// Per-tile results of a finished prefetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchSummary {
    pub tiles: Vec<PrefetchTileResult>,
}

impl PrefetchSummary {
    pub fn successful_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_successful()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.tiles.len() - self.successful_count()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Receives a [`PrefetchStatus`] after each tile.
pub type StatusCallback = Box<dyn Fn(PrefetchStatus) + Send + Sync + 'static>;

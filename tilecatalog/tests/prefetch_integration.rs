//! Integration tests for tile prefetch.
//!
//! These tests verify the complete prefetch flow:
//! - decomposition → quad tree queries → per-tile blob downloads
//! - per-tile failures reported in the summary without failing the job
//! - status reporting and whole-job cancellation
//!
//! Run with: `cargo test --test prefetch_integration`

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use tilecatalog::client::{CancellableFuture, ClientSettings};
use tilecatalog::model::{LayerType, Partition};
use tilecatalog::prefetch::{PrefetchStatus, PrefetchSummary, StatusCallback};
use tilecatalog::request::PrefetchTilesRequest;
use tilecatalog::testing::MockCatalogApi;
use tilecatalog::thread::{TaskScheduler, ThreadPoolTaskScheduler};
use tilecatalog::{ErrorCode, LayerClient, TileKey};

// ============================================================================
// Helper Functions
// ============================================================================

const HRN: &str = "hrn:here:data::olp-here:prefetch";

fn root_tile() -> TileKey {
    TileKey::from_row_column_level(1, 2, 2).unwrap()
}

fn handle(tile: &TileKey) -> String {
    format!("h-{}", tile.to_here_tile())
}

/// A backend holding `root_tile()` and its four children. Every tile has a
/// blob except the last child, whose download answers 404.
fn backend() -> (Arc<MockCatalogApi>, Vec<TileKey>) {
    let api = Arc::new(MockCatalogApi::new());
    let mut tiles = vec![root_tile()];
    tiles.extend(root_tile().children());

    api.set_partitions(tiles.iter().map(|t| Partition::new(t.to_here_tile(), handle(t))).collect());
    for tile in &tiles[..4] {
        api.add_blob(&handle(tile), Bytes::from(vec![7u8; 10]));
    }
    (api, tiles)
}

fn client(api: &Arc<MockCatalogApi>, layer: &str, layer_type: LayerType, threads: usize) -> LayerClient {
    let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadPoolTaskScheduler::new(threads).unwrap());
    LayerClient::new(
        HRN,
        layer,
        layer_type,
        ClientSettings::new(api.clone()).with_task_scheduler(scheduler),
    )
}

fn status_recorder() -> (Arc<Mutex<Vec<PrefetchStatus>>>, StatusCallback) {
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    let callback: StatusCallback = Box::new(move |status| sink.lock().unwrap().push(status));
    (statuses, callback)
}

fn failed_tiles(summary: &PrefetchSummary) -> Vec<TileKey> {
    summary
        .tiles
        .iter()
        .filter(|t| !t.is_successful())
        .map(|t| t.tile)
        .collect()
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_prefetch_versioned_layer_with_tile_failure() {
    let (api, tiles) = backend();
    // one worker runs tile tasks in order, so status reports arrive in order
    let client = client(&api, MockCatalogApi::VERSIONED_LAYER, LayerType::Versioned, 1);
    let (statuses, status_callback) = status_recorder();

    let summary = client
        .prefetch_tiles_future(
            PrefetchTilesRequest::new(vec![root_tile()], 2, 3),
            Some(status_callback),
        )
        .wait()
        .unwrap();

    assert_eq!(summary.len(), 5);
    assert_eq!(summary.successful_count(), 4);
    assert_eq!(summary.failed_count(), 1);
    assert_eq!(failed_tiles(&summary), vec![tiles[4]]);
    let failure = summary.tiles.iter().find(|t| t.tile == tiles[4]).unwrap();
    assert_eq!(failure.result.as_ref().unwrap_err().code(), ErrorCode::NotFound);

    let statuses = statuses.lock().unwrap();
    assert_eq!(statuses.len(), 5);
    assert!(statuses.iter().all(|s| s.total_tiles_to_prefetch == 5));
    let last = statuses.last().unwrap();
    assert_eq!(last.prefetched_tiles, 5);
    assert_eq!(last.bytes_transferred, 40);

    assert_eq!(api.calls().latest_version, 1);
    assert_eq!(api.calls().blob, 5);
    for tile in &tiles[..4] {
        assert!(client.is_tile_cached(tile), "tile {} should be cached", tile);
    }
    assert!(!client.is_tile_cached(&tiles[4]));
}

#[test]
fn test_second_prefetch_is_served_from_cache() {
    let (api, _) = backend();
    let client = client(&api, MockCatalogApi::VOLATILE_LAYER, LayerType::Volatile, 2);
    let request = PrefetchTilesRequest::new(vec![root_tile()], 2, 3);

    client.prefetch_tiles_future(request.clone(), None).wait().unwrap();
    let calls = api.calls();

    let summary = client.prefetch_tiles_future(request, None).wait().unwrap();
    assert_eq!(summary.successful_count(), 4);
    assert_eq!(api.calls().quad_tree, calls.quad_tree);
    // only the tile without a blob is asked for again
    assert_eq!(api.calls().blob, calls.blob + 1);
}

#[test]
fn test_prefetch_level_range_filters_tiles() {
    let (api, tiles) = backend();
    let client = client(&api, MockCatalogApi::VOLATILE_LAYER, LayerType::Volatile, 2);

    let summary = client
        .prefetch_tiles_future(PrefetchTilesRequest::new(vec![root_tile()], 3, 3), None)
        .wait()
        .unwrap();

    let mut fetched: Vec<TileKey> = summary.tiles.iter().map(|t| t.tile).collect();
    fetched.sort();
    let mut expected = tiles[1..].to_vec();
    expected.sort();
    assert_eq!(fetched, expected);
}

#[test]
fn test_prefetch_cancellation_delivers_cancelled_once() {
    let (api, _) = backend();
    api.set_delay(Duration::from_millis(100));
    let client = client(&api, MockCatalogApi::VOLATILE_LAYER, LayerType::Volatile, 2);
    let deliveries = Arc::new(Mutex::new(0usize));

    let counter = Arc::clone(&deliveries);
    let future = CancellableFuture::from_callback(|callback| {
        client.prefetch_tiles(
            PrefetchTilesRequest::new(vec![root_tile()], 2, 3),
            Box::new(move |response| {
                *counter.lock().unwrap() += 1;
                callback(response);
            }),
            None,
        )
    });

    thread::sleep(Duration::from_millis(250));
    future.cancel();

    let error = future.wait().unwrap_err();
    assert!(error.is_cancelled());

    // give straggling tile tasks time to report in
    thread::sleep(Duration::from_millis(300));
    assert_eq!(*deliveries.lock().unwrap(), 1);
}

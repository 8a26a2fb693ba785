//! Scripted in-process backend for tests.
//!
//! [`MockCatalogApi`] answers every [`CatalogApi`] call from in-memory
//! state, counts calls per endpoint and can be told to fail, to answer
//! after a delay, or to keep answering after being cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::api::{CatalogApi, RequestContext};
use crate::client::{Callback, CancellationToken};
use crate::error::{ApiError, ApiResponse};
use crate::geo::TileKey;
use crate::model::{Catalog, Layer, LayerType, ParentQuad, Partition, Partitions, QuadTreeIndex, SubQuad};

/// Number of calls received per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub catalog: usize,
    pub latest_version: usize,
    pub partitions: usize,
    pub partitions_by_id: usize,
    pub blob: usize,
    pub quad_tree: usize,
}

#[derive(Debug)]
struct MockState {
    catalog: Catalog,
    latest_version: i64,
    partitions: Vec<Partition>,
    blobs: HashMap<String, Bytes>,
    failure: Option<u16>,
    blob_failures: HashMap<String, u16>,
    delay: Option<Duration>,
    ignore_cancel: bool,
    calls: MockCalls,
    last_partitions_version: Option<Option<i64>>,
}

#[derive(Debug)]
pub struct MockCatalogApi {
    state: Mutex<MockState>,
}

impl MockCatalogApi {
    pub const VERSIONED_LAYER: &'static str = "versioned";
    pub const VOLATILE_LAYER: &'static str = "volatile";
    pub const VOLATILE_TTL_SECONDS: u64 = 3600;

    /// A catalog at version 1 with one versioned and one volatile layer,
    /// no partitions and no blobs.
    pub fn new() -> Self {
        let catalog = Catalog {
            hrn: "hrn:mock".to_string(),
            version: 1,
            layers: vec![
                Layer {
                    id: Self::VERSIONED_LAYER.to_string(),
                    layer_type: LayerType::Versioned,
                    ttl_seconds: None,
                },
                Layer {
                    id: Self::VOLATILE_LAYER.to_string(),
                    layer_type: LayerType::Volatile,
                    ttl_seconds: Some(Self::VOLATILE_TTL_SECONDS),
                },
            ],
        };
        Self {
            state: Mutex::new(MockState {
                catalog,
                latest_version: 1,
                partitions: Vec::new(),
                blobs: HashMap::new(),
                failure: None,
                blob_failures: HashMap::new(),
                delay: None,
                ignore_cancel: false,
                calls: MockCalls::default(),
                last_partitions_version: None,
            }),
        }
    }

    pub fn set_latest_version(&self, version: i64) {
        self.state.lock().latest_version = version;
    }

    /// Partitions of every layer; tile-addressed ones also feed quad trees.
    pub fn set_partitions(&self, partitions: Vec<Partition>) {
        self.state.lock().partitions = partitions;
    }

    pub fn add_blob(&self, data_handle: &str, data: Bytes) {
        self.state.lock().blobs.insert(data_handle.to_string(), data);
    }

    /// Every call fails with `status` until [`clear_failure`](Self::clear_failure).
    pub fn fail_with(&self, status: u16) {
        self.state.lock().failure = Some(status);
    }

    pub fn clear_failure(&self) {
        self.state.lock().failure = None;
    }

    /// Blob requests for `data_handle` fail with `status`.
    pub fn fail_blob(&self, data_handle: &str, status: u16) {
        self.state
            .lock()
            .blob_failures
            .insert(data_handle.to_string(), status);
    }

    /// Answers from a background thread after `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// Keeps answering delayed calls after they were cancelled.
    pub fn set_ignore_cancel(&self, ignore: bool) {
        self.state.lock().ignore_cancel = ignore;
    }

    pub fn calls(&self) -> MockCalls {
        self.state.lock().calls
    }

    /// Version argument of the last partitions call, if any.
    pub fn last_partitions_version(&self) -> Option<Option<i64>> {
        self.state.lock().last_partitions_version
    }

    fn respond<T: Send + 'static>(
        &self,
        response: ApiResponse<T>,
        callback: Callback<T>,
    ) -> CancellationToken {
        let (delay, ignore_cancel) = {
            let state = self.state.lock();
            (state.delay, state.ignore_cancel)
        };
        let Some(delay) = delay else {
            callback(response);
            return CancellationToken::none();
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        thread::spawn(move || {
            thread::sleep(delay);
            if ignore_cancel || !flag.load(Ordering::SeqCst) {
                callback(response);
            }
        });
        CancellationToken::new(move || cancelled.store(true, Ordering::SeqCst))
    }

    fn failure(state: &MockState) -> Option<ApiError> {
        state
            .failure
            .map(|status| ApiError::from_http_status(status, format!("HTTP {}", status)))
    }

    fn build_quad_tree(partitions: &[Partition], root: TileKey, depth: u32) -> QuadTreeIndex {
        let mut index = QuadTreeIndex::new(root, depth);
        for partition in partitions {
            let Some(tile) = TileKey::from_here_tile(&partition.partition) else {
                continue;
            };
            let data_handle = partition.data_handle.clone().unwrap_or_default();
            if tile.ancestor_at(root.level()) == Some(root) && tile.level() <= root.level() + depth {
                let d = tile.level() - root.level();
                let relative = TileKey::from_row_column_level(
                    tile.row() - (root.row() << d),
                    tile.column() - (root.column() << d),
                    d,
                );
                if let Some(relative) = relative {
                    index.sub_quads.push(SubQuad {
                        sub_quad_key: relative.to_here_tile(),
                        data_handle,
                        version: partition.version,
                        data_size: partition.data_size,
                    });
                }
            } else if tile.is_parent_of(&root) {
                index.parent_quads.push(ParentQuad {
                    partition: partition.partition.clone(),
                    data_handle,
                    version: partition.version,
                    data_size: partition.data_size,
                });
            }
        }
        index
    }
}

impl Default for MockCatalogApi {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogApi for MockCatalogApi {
    fn get_catalog(
        &self,
        _catalog: &str,
        _context: &RequestContext,
        callback: Callback<Catalog>,
    ) -> CancellationToken {
        let response = {
            let mut state = self.state.lock();
            state.calls.catalog += 1;
            match Self::failure(&state) {
                Some(error) => Err(error),
                None => Ok(state.catalog.clone()),
            }
        };
        self.respond(response, callback)
    }

    fn get_latest_version(
        &self,
        _catalog: &str,
        _context: &RequestContext,
        callback: Callback<i64>,
    ) -> CancellationToken {
        let response = {
            let mut state = self.state.lock();
            state.calls.latest_version += 1;
            match Self::failure(&state) {
                Some(error) => Err(error),
                None => Ok(state.latest_version),
            }
        };
        self.respond(response, callback)
    }

    fn get_partitions(
        &self,
        _catalog: &str,
        _layer: &str,
        version: Option<i64>,
        _context: &RequestContext,
        callback: Callback<Partitions>,
    ) -> CancellationToken {
        let response = {
            let mut state = self.state.lock();
            state.calls.partitions += 1;
            state.last_partitions_version = Some(version);
            match Self::failure(&state) {
                Some(error) => Err(error),
                None => Ok(Partitions::new(state.partitions.clone())),
            }
        };
        self.respond(response, callback)
    }

    fn get_partitions_by_id(
        &self,
        _catalog: &str,
        _layer: &str,
        partition_ids: &[String],
        version: Option<i64>,
        _context: &RequestContext,
        callback: Callback<Partitions>,
    ) -> CancellationToken {
        let response = {
            let mut state = self.state.lock();
            state.calls.partitions_by_id += 1;
            state.last_partitions_version = Some(version);
            match Self::failure(&state) {
                Some(error) => Err(error),
                None => Ok(state
                    .partitions
                    .iter()
                    .filter(|p| partition_ids.contains(&p.partition))
                    .cloned()
                    .collect::<Vec<_>>()
                    .into()),
            }
        };
        self.respond(response, callback)
    }

    fn get_blob(
        &self,
        _catalog: &str,
        _layer: &str,
        data_handle: &str,
        _context: &RequestContext,
        callback: Callback<Bytes>,
    ) -> CancellationToken {
        let response = {
            let mut state = self.state.lock();
            state.calls.blob += 1;
            let failure = Self::failure(&state).or_else(|| {
                state
                    .blob_failures
                    .get(data_handle)
                    .map(|status| ApiError::from_http_status(*status, format!("HTTP {}", status)))
            });
            match failure {
                Some(error) => Err(error),
                None => state
                    .blobs
                    .get(data_handle)
                    .cloned()
                    .ok_or_else(|| ApiError::from_http_status(404, "Blob not found")),
            }
        };
        self.respond(response, callback)
    }

    fn quad_tree_index(
        &self,
        _catalog: &str,
        _layer: &str,
        root: TileKey,
        depth: u32,
        _version: Option<i64>,
        _context: &RequestContext,
        callback: Callback<QuadTreeIndex>,
    ) -> CancellationToken {
        let response = {
            let mut state = self.state.lock();
            state.calls.quad_tree += 1;
            match Self::failure(&state) {
                Some(error) => Err(error),
                None => Ok(Self::build_quad_tree(&state.partitions, root, depth)),
            }
        };
        self.respond(response, callback)
    }
}

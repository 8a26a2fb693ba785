//! Client for one layer of a catalog.
//!
//! Every operation is scheduled through [`add_task`] and delivers exactly
//! one result, either to a callback (returning a [`CancellationToken`]) or
//! through a [`CancellableFuture`].

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::{
    add_task, add_task_with_context, Callback, CancellableFuture, CancellationContext,
    CancellationToken, ClientSettings, PendingRequests,
};
use crate::error::{ApiError, ApiResponse};
use crate::geo::TileKey;
use crate::model::{LayerType, Partitions};
use crate::prefetch::{PrefetchJob, PrefetchSummary, StatusCallback};
use crate::repository::{
    effective_tile_keys, filter_skipped_tiles, CatalogCacheRepository, CatalogRepository,
    DataCacheRepository, DataRepository, PartitionsCacheRepository, PartitionsRepository,
    PrefetchTilesRepository,
};
use crate::request::{CatalogVersionRequest, DataRequest, FetchOption, PartitionsRequest, PrefetchTilesRequest};

/// A callback that several completion paths race to deliver.
struct SharedCallback<T> {
    callback: Arc<Mutex<Option<Callback<T>>>>,
}

impl<T> Clone for SharedCallback<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> SharedCallback<T> {
    fn new(callback: Callback<T>) -> Self {
        Self {
            callback: Arc::new(Mutex::new(Some(callback))),
        }
    }

    fn deliver(&self, response: ApiResponse<T>) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback(response);
        }
    }
}

/// Reads data, partitions and tile trees of one layer.
///
/// Dropping the client cancels its outstanding requests and waits for them
/// to resolve.
pub struct LayerClient {
    catalog: String,
    layer_id: String,
    layer_type: LayerType,
    settings: Arc<ClientSettings>,
    pending: Arc<PendingRequests>,
}

impl LayerClient {
    pub fn new(
        catalog: impl Into<String>,
        layer_id: impl Into<String>,
        layer_type: LayerType,
        settings: ClientSettings,
    ) -> Self {
        let client = Self {
            catalog: catalog.into(),
            layer_id: layer_id.into(),
            layer_type,
            settings: Arc::new(settings),
            pending: Arc::new(PendingRequests::new()),
        };
        debug!(catalog = %client.catalog, layer = %client.layer_id, layer_type = %layer_type, "Layer client created");
        client
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    /// Fetches the blob of a partition or data handle.
    pub fn get_data(&self, request: DataRequest, callback: Callback<Bytes>) -> CancellationToken {
        let repository = DataRepository::new(
            self.catalog.clone(),
            self.layer_id.clone(),
            self.layer_type,
            Arc::clone(&self.settings),
        );
        let priority = request.priority;
        debug!(key = %request.create_key(&self.layer_id), "get_data");

        add_task(
            &self.settings,
            &self.pending,
            move |context| repository.get_data(&request, context),
            callback,
            priority,
        )
    }

    pub fn get_data_future(&self, request: DataRequest) -> CancellableFuture<Bytes> {
        CancellableFuture::from_callback(|callback| self.get_data(request, callback))
    }

    /// Fetches partition metadata: the listed ids, or the whole layer.
    pub fn get_partitions(
        &self,
        request: PartitionsRequest,
        callback: Callback<Partitions>,
    ) -> CancellationToken {
        let repository = PartitionsRepository::new(
            self.catalog.clone(),
            self.layer_id.clone(),
            Arc::clone(&self.settings),
        );
        let layer_type = self.layer_type;
        let priority = request.priority;
        debug!(key = %request.create_key(&self.layer_id), "get_partitions");

        add_task(
            &self.settings,
            &self.pending,
            move |context| match layer_type {
                LayerType::Versioned => repository.get_versioned_partitions(&request, context),
                LayerType::Volatile => repository.get_volatile_partitions(&request, context),
            },
            callback,
            priority,
        )
    }

    pub fn get_partitions_future(&self, request: PartitionsRequest) -> CancellableFuture<Partitions> {
        CancellableFuture::from_callback(|callback| self.get_partitions(request, callback))
    }

    /// Loads every tile below `request.tile_keys` in the requested level
    /// range into the cache.
    ///
    /// `callback` receives the per-tile summary once every tile has been
    /// handled, or the first error that prevented the prefetch from starting.
    /// Cancelling the token cancels every outstanding tile.
    pub fn prefetch_tiles(
        &self,
        request: PrefetchTilesRequest,
        callback: Callback<PrefetchSummary>,
        status_callback: Option<StatusCallback>,
    ) -> CancellationToken {
        let priority = request.priority;
        let callback = SharedCallback::new(callback);
        let outer_callback: Callback<()> = {
            let callback = callback.clone();
            // Success is reported by the prefetch job.
            Box::new(move |response| {
                if let Err(e) = response {
                    callback.deliver(Err(e));
                }
            })
        };

        let prefetch = Prefetch {
            catalog: self.catalog.clone(),
            layer_id: self.layer_id.clone(),
            layer_type: self.layer_type,
            settings: Arc::clone(&self.settings),
            pending: Arc::clone(&self.pending),
        };

        add_task(
            &self.settings,
            &self.pending,
            move |context| prefetch.run(request, callback, status_callback, context),
            outer_callback,
            priority,
        )
    }

    pub fn prefetch_tiles_future(
        &self,
        request: PrefetchTilesRequest,
        status_callback: Option<StatusCallback>,
    ) -> CancellableFuture<PrefetchSummary> {
        CancellableFuture::from_callback(|callback| self.prefetch_tiles(request, callback, status_callback))
    }

    /// Cancels every outstanding request of this client.
    pub fn cancel_pending_requests(&self) -> bool {
        debug!(layer = %self.layer_id, pending = self.pending.len(), "Cancelling pending requests");
        self.pending.cancel_all()
    }

    /// Removes the cached metadata of a partition and the blob it references.
    pub fn remove_from_cache(&self, partition_id: &str) -> Result<(), ApiError> {
        let version = self.cached_version();
        let partitions = self.partitions_cache();
        let Some(partition) = partitions.clear_partition_metadata(&self.layer_id, version, partition_id)? else {
            return Ok(());
        };
        if let Some(handle) = partition.data_handle {
            self.data_cache().clear(&self.layer_id, &handle)?;
        }
        Ok(())
    }

    pub fn remove_tile_from_cache(&self, tile: &TileKey) -> Result<(), ApiError> {
        self.remove_from_cache(&tile.to_here_tile())
    }

    /// True when both the metadata and the blob of a partition are cached.
    pub fn is_cached(&self, partition_id: &str) -> bool {
        let version = self.cached_version();
        let ids = [partition_id.to_string()];
        self.partitions_cache()
            .get_by_ids(&self.layer_id, version, &ids)
            .partitions
            .first()
            .and_then(|partition| partition.data_handle.as_deref())
            .is_some_and(|handle| self.data_cache().is_cached(&self.layer_id, handle))
    }

    pub fn is_tile_cached(&self, tile: &TileKey) -> bool {
        self.is_cached(&tile.to_here_tile())
    }

    /// Version under which partition metadata is cached: the cached latest
    /// version for versioned layers, none for volatile ones.
    fn cached_version(&self) -> Option<i64> {
        match self.layer_type {
            LayerType::Versioned => CatalogCacheRepository::new(
                self.catalog.clone(),
                self.settings.cache.clone(),
                self.settings.default_cache_expiration,
            )
            .get_version(),
            LayerType::Volatile => None,
        }
    }

    fn partitions_cache(&self) -> PartitionsCacheRepository {
        PartitionsCacheRepository::new(
            self.catalog.clone(),
            self.settings.cache.clone(),
            self.settings.default_cache_expiration,
        )
    }

    fn data_cache(&self) -> DataCacheRepository {
        DataCacheRepository::new(
            self.catalog.clone(),
            self.settings.cache.clone(),
            self.settings.default_cache_expiration,
        )
    }
}

impl Drop for LayerClient {
    fn drop(&mut self) {
        if !self.pending.cancel_all_and_wait(self.settings.timeout) {
            warn!(layer = %self.layer_id, pending = self.pending.len(), "Requests still pending at drop");
        }
    }
}

impl std::fmt::Debug for LayerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerClient")
            .field("catalog", &self.catalog)
            .field("layer_id", &self.layer_id)
            .field("layer_type", &self.layer_type)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Everything the prefetch task needs, moved onto the scheduler.
struct Prefetch {
    catalog: String,
    layer_id: String,
    layer_type: LayerType,
    settings: Arc<ClientSettings>,
    pending: Arc<PendingRequests>,
}

impl Prefetch {
    fn run(
        self,
        mut request: PrefetchTilesRequest,
        callback: SharedCallback<PrefetchSummary>,
        status_callback: Option<StatusCallback>,
        context: &CancellationContext,
    ) -> ApiResponse<()> {
        request.validate()?;
        let key = request.create_key(&self.layer_id);

        let queries = effective_tile_keys(&request.tile_keys, request.min_level, request.max_level);
        if queries.is_empty() {
            warn!(key = %key, "Tile/level mismatch");
            return Err(ApiError::invalid_argument("TileKeys/levels mismatch"));
        }
        debug!(key = %key, queries = queries.len(), "Prefetch decomposed");

        let expiry = match self.layer_type {
            LayerType::Versioned => {
                if request.version.is_none() {
                    let mut version_request = CatalogVersionRequest::default();
                    version_request.billing_tag = request.billing_tag.clone();
                    let version = CatalogRepository::new(self.catalog.clone(), Arc::clone(&self.settings))
                        .get_latest_version(&version_request, context)?;
                    request.version = Some(version);
                }
                None
            }
            LayerType::Volatile => {
                request.version = None;
                CatalogRepository::new(self.catalog.clone(), Arc::clone(&self.settings)).layer_expiry(
                    &self.layer_id,
                    FetchOption::Default,
                    request.billing_tag.as_deref(),
                    context,
                )?
            }
        };

        let repository = PrefetchTilesRepository::new(
            self.catalog.clone(),
            self.layer_id.clone(),
            self.layer_type,
            Arc::clone(&self.settings),
        );
        let sub_tiles = repository.get_sub_tiles(&request, &queries, expiry, context)?;
        let tiles = filter_skipped_tiles(&request, sub_tiles);
        info!(key = %key, tiles = tiles.len(), "Prefetch start");

        if tiles.is_empty() {
            callback.deliver(Ok(PrefetchSummary::default()));
            return Ok(());
        }

        let job = {
            let callback = callback.clone();
            Arc::new(PrefetchJob::new(
                Box::new(move |response| callback.deliver(response)),
                status_callback,
                tiles.len(),
            ))
        };

        for (tile, data_handle) in tiles {
            let data = DataRepository::new(
                self.catalog.clone(),
                self.layer_id.clone(),
                self.layer_type,
                Arc::clone(&self.settings),
            );
            let data_cache = DataCacheRepository::new(
                self.catalog.clone(),
                self.settings.cache.clone(),
                self.settings.default_cache_expiration,
            );
            let layer_id = self.layer_id.clone();
            let billing_tag = request.billing_tag.clone();
            let tile_job = Arc::clone(&job);

            add_task_with_context(
                &self.settings,
                &self.pending,
                move |inner_context| -> ApiResponse<u64> {
                    if data_handle.is_empty() {
                        return Err(ApiError::not_found("Not found"));
                    }
                    if data_cache.is_cached(&layer_id, &data_handle) {
                        return Ok(0);
                    }
                    let blob = data.get_blob_data(
                        &data_handle,
                        FetchOption::Default,
                        billing_tag.as_deref(),
                        expiry,
                        inner_context,
                    )?;
                    Ok(blob.len() as u64)
                },
                Box::new(move |response: ApiResponse<u64>| {
                    let bytes = response.as_ref().map_or(0, |bytes| *bytes);
                    tile_job.complete_task(tile, response.map(|_| ()), bytes);
                }),
                request.priority,
                job.add_task(),
            );
        }

        let cancel_job = Arc::clone(&job);
        context.execute_or_cancelled(
            move || CancellationToken::new(move || cancel_job.cancel_operation()),
            || job.cancel_operation(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::model::Partition;
    use crate::testing::MockCatalogApi;
    use crate::thread::{TaskScheduler, ThreadPoolTaskScheduler};
    use std::sync::mpsc;
    use std::time::Duration;

    const HRN: &str = "hrn:here:data::olp-here:test";

    fn client(api: &Arc<MockCatalogApi>, layer: &str, layer_type: LayerType) -> LayerClient {
        LayerClient::new(HRN, layer, layer_type, ClientSettings::new(api.clone()))
    }

    fn pooled_client(api: &Arc<MockCatalogApi>, layer: &str, layer_type: LayerType) -> LayerClient {
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadPoolTaskScheduler::new(2).unwrap());
        let settings = ClientSettings::new(api.clone()).with_task_scheduler(scheduler);
        LayerClient::new(HRN, layer, layer_type, settings)
    }

    fn api_with_partition() -> Arc<MockCatalogApi> {
        let api = Arc::new(MockCatalogApi::new());
        api.set_partitions(vec![Partition::new("100", "h100")]);
        api.add_blob("h100", Bytes::from_static(b"payload"));
        api
    }

    #[test]
    fn test_get_data_future() {
        let api = api_with_partition();
        let client = pooled_client(&api, MockCatalogApi::VERSIONED_LAYER, LayerType::Versioned);

        let data = client
            .get_data_future(DataRequest::default().with_partition_id("100"))
            .wait()
            .unwrap();
        assert_eq!(data, Bytes::from_static(b"payload"));
        assert!(client.is_cached("100"));
    }

    #[test]
    fn test_get_partitions_callback() {
        let api = api_with_partition();
        let client = client(&api, MockCatalogApi::VOLATILE_LAYER, LayerType::Volatile);
        let (tx, rx) = mpsc::channel();

        client.get_partitions(PartitionsRequest::default(), Box::new(move |r| tx.send(r).unwrap()));

        let partitions = rx.recv().unwrap().unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(api.calls().latest_version, 0);
    }

    #[test]
    fn test_remove_from_cache() {
        let api = api_with_partition();
        let client = client(&api, MockCatalogApi::VOLATILE_LAYER, LayerType::Volatile);
        client
            .get_data_future(DataRequest::default().with_partition_id("100"))
            .wait()
            .unwrap();
        assert!(client.is_cached("100"));

        client.remove_from_cache("100").unwrap();
        assert!(!client.is_cached("100"));
        // removing twice is not an error
        client.remove_from_cache("100").unwrap();
    }

    #[test]
    fn test_cancel_pending_requests() {
        let api = api_with_partition();
        api.set_delay(Duration::from_millis(200));
        let client = pooled_client(&api, MockCatalogApi::VERSIONED_LAYER, LayerType::Versioned);

        let future = client.get_data_future(DataRequest::default().with_data_handle("h100"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(client.cancel_pending_requests());

        assert!(future.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_prefetch_invalid_request() {
        let api = api_with_partition();
        let client = client(&api, MockCatalogApi::VERSIONED_LAYER, LayerType::Versioned);

        let error = client
            .prefetch_tiles_future(PrefetchTilesRequest::new(Vec::new(), 1, 2), None)
            .wait()
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidArgument);

        let error = client
            .prefetch_tiles_future(PrefetchTilesRequest::new(vec![TileKey::root()], 3, 2), None)
            .wait()
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_prefetch_without_tiles_is_empty_summary() {
        let api = Arc::new(MockCatalogApi::new());
        let client = client(&api, MockCatalogApi::VOLATILE_LAYER, LayerType::Volatile);

        let summary = client
            .prefetch_tiles_future(PrefetchTilesRequest::new(vec![TileKey::root()], 0, 1), None)
            .wait()
            .unwrap();
        assert!(summary.is_empty());
    }
}

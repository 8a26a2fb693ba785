//! Data blob reads.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::blocking::blocking_call;
use super::catalog::CatalogRepository;
use super::data_cache::DataCacheRepository;
use super::keys;
use super::partitions::{resolve_latest_version, PartitionsRepository};
use crate::client::{CancellationContext, ClientSettings};
use crate::error::{ApiError, ApiResponse};
use crate::model::LayerType;
use crate::request::{DataRequest, FetchOption};

pub struct DataRepository {
    hrn: String,
    layer: String,
    layer_type: LayerType,
    settings: Arc<ClientSettings>,
    cache: DataCacheRepository,
}

impl DataRepository {
    pub fn new(
        hrn: impl Into<String>,
        layer: impl Into<String>,
        layer_type: LayerType,
        settings: Arc<ClientSettings>,
    ) -> Self {
        let hrn = hrn.into();
        let cache = DataCacheRepository::new(
            hrn.clone(),
            settings.cache.clone(),
            settings.default_cache_expiration,
        );
        Self {
            hrn,
            layer: layer.into(),
            layer_type,
            settings,
            cache,
        }
    }

    /// Reads the blob a request addresses, by data handle or by partition id.
    pub fn get_data(&self, request: &DataRequest, context: &CancellationContext) -> ApiResponse<Bytes> {
        if request.data_handle.is_none() && request.partition_id.is_none() {
            return Err(ApiError::invalid_argument(
                "A data handle or a partition id must be specified",
            ));
        }

        let mut request = request.clone();
        let expiry = match self.layer_type {
            LayerType::Volatile => {
                request.version = None;
                CatalogRepository::new(self.hrn.clone(), self.settings.clone()).layer_expiry(
                    &self.layer,
                    request.fetch_option,
                    request.billing_tag.as_deref(),
                    context,
                )?
            }
            LayerType::Versioned => None,
        };

        let data_handle = match &request.data_handle {
            Some(handle) => handle.clone(),
            None => {
                if self.layer_type == LayerType::Versioned && request.version.is_none() {
                    request.version = Some(resolve_latest_version(
                        &self.hrn,
                        &self.settings,
                        request.fetch_option,
                        request.billing_tag.as_deref(),
                        context,
                    )?);
                }
                let partitions = PartitionsRepository::new(
                    self.hrn.clone(),
                    self.layer.clone(),
                    self.settings.clone(),
                )
                .get_partition_by_id(&request, expiry, context)?;
                partitions
                    .partitions
                    .into_iter()
                    .next()
                    .and_then(|partition| partition.data_handle)
                    .ok_or_else(|| {
                        debug!(layer = %self.layer, partition = ?request.partition_id, "Partition not found");
                        ApiError::not_found("Partition not found")
                    })?
            }
        };

        self.get_blob_data(
            &data_handle,
            request.fetch_option,
            request.billing_tag.as_deref(),
            expiry,
            context,
        )
    }

    /// Cache-or-network read of one blob.
    pub fn get_blob_data(
        &self,
        data_handle: &str,
        fetch_option: FetchOption,
        billing_tag: Option<&str>,
        expiry: Option<Duration>,
        context: &CancellationContext,
    ) -> ApiResponse<Bytes> {
        if fetch_option.reads_cache() {
            if let Some(data) = self.cache.get(&self.layer, data_handle) {
                debug!(layer = %self.layer, data_handle = %data_handle, "Data cache hit");
                return Ok(data);
            }
            if fetch_option == FetchOption::CacheOnly {
                return Err(ApiError::not_found(
                    "Cache only resource not found in cache (data).",
                ));
            }
        }

        let request_context = self.settings.request_context(billing_tag)?;
        let key = keys::data_key(&self.hrn, &self.layer, data_handle);
        let api = self.settings.api.clone();
        let cache = self.cache.clone();
        let hrn = self.hrn.clone();
        let layer = self.layer.clone();
        let handle = data_handle.to_string();

        blocking_call(
            &self.settings,
            &self.settings.coalescers.data,
            &key,
            context,
            move |completion| {
                let layer_id = layer.clone();
                let data_handle = handle.clone();
                api.get_blob(
                    &hrn,
                    &layer_id,
                    &data_handle,
                    &request_context,
                    Box::new(move |response| {
                        match &response {
                            Ok(data) => cache.put(&layer, &handle, data.clone(), expiry),
                            Err(e) if e.is_forbidden() => {
                                info!(layer = %layer, data_handle = %handle, "Data access forbidden, clearing blob");
                                if let Err(e) = cache.clear(&layer, &handle) {
                                    warn!(layer = %layer, error = %e, "Failed to clear data cache");
                                }
                            }
                            Err(_) => {}
                        }
                        completion(response);
                    }),
                )
            },
        )
    }
}

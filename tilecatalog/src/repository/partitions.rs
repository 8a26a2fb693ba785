//! Partition metadata reads.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::blocking::blocking_call;
use super::catalog::CatalogRepository;
use super::partitions_cache::PartitionsCacheRepository;
use crate::client::{CancellationContext, ClientSettings};
use crate::error::{ApiError, ApiResponse};
use crate::model::Partitions;
use crate::request::{CatalogVersionRequest, DataRequest, FetchOption, PartitionsRequest};

pub struct PartitionsRepository {
    hrn: String,
    layer: String,
    settings: Arc<ClientSettings>,
    cache: PartitionsCacheRepository,
}

impl PartitionsRepository {
    pub fn new(hrn: impl Into<String>, layer: impl Into<String>, settings: Arc<ClientSettings>) -> Self {
        let hrn = hrn.into();
        let cache = PartitionsCacheRepository::new(
            hrn.clone(),
            settings.cache.clone(),
            settings.default_cache_expiration,
        );
        Self {
            hrn,
            layer: layer.into(),
            settings,
            cache,
        }
    }

    /// Partitions of a versioned layer; an unset version resolves to the
    /// latest catalog version first.
    pub fn get_versioned_partitions(
        &self,
        request: &PartitionsRequest,
        context: &CancellationContext,
    ) -> ApiResponse<Partitions> {
        let mut request = request.clone();
        if request.version.is_none() {
            let version = resolve_latest_version(
                &self.hrn,
                &self.settings,
                request.fetch_option,
                request.billing_tag.as_deref(),
                context,
            )?;
            request.version = Some(version);
        }
        self.get_partitions(&request, None, context)
    }

    /// Partitions of a volatile layer, cached with the layer's TTL.
    pub fn get_volatile_partitions(
        &self,
        request: &PartitionsRequest,
        context: &CancellationContext,
    ) -> ApiResponse<Partitions> {
        let expiry = CatalogRepository::new(self.hrn.clone(), self.settings.clone()).layer_expiry(
            &self.layer,
            request.fetch_option,
            request.billing_tag.as_deref(),
            context,
        )?;
        let request = request.clone().with_version(None);
        self.get_partitions(&request, expiry, context)
    }

    /// Cache-or-network read of the partitions `request` names, or of the
    /// whole layer when it names none.
    pub fn get_partitions(
        &self,
        request: &PartitionsRequest,
        expiry: Option<Duration>,
        context: &CancellationContext,
    ) -> ApiResponse<Partitions> {
        let fetch_option = request.fetch_option;
        let version = request.version;
        let ids = request.partition_ids.clone();
        let by_ids = !ids.is_empty();

        if fetch_option.reads_cache() {
            let cached = if by_ids {
                Some(self.cache.get_by_ids(&self.layer, version, &ids)).filter(|found| found.len() == ids.len())
            } else {
                self.cache.get(&self.layer, version)
            };
            if let Some(partitions) = cached {
                debug!(layer = %self.layer, count = partitions.len(), "Partitions cache hit");
                return Ok(partitions);
            }
            if fetch_option == FetchOption::CacheOnly {
                return Err(ApiError::not_found(
                    "Cache only resource not found in cache (partition).",
                ));
            }
        }

        let request_context = self.settings.request_context(request.billing_tag.as_deref())?;
        let key = format!("{}::{}", self.hrn, request.create_key(&self.layer));
        let api = self.settings.api.clone();
        let cache = self.cache.clone();
        let hrn = self.hrn.clone();
        let layer = self.layer.clone();

        blocking_call(
            &self.settings,
            &self.settings.coalescers.partitions,
            &key,
            context,
            move |completion| {
                let requested = ids.clone();
                let layer_id = layer.clone();
                let callback = Box::new(move |response: ApiResponse<Partitions>| {
                    match &response {
                        Ok(partitions) => cache.put(&layer, version, partitions, expiry, !by_ids),
                        Err(e) if e.is_forbidden() => {
                            info!(layer = %layer, "Partitions access forbidden, clearing cache");
                            let cleared = if by_ids {
                                cache.clear_partitions(&layer, version, &requested)
                            } else {
                                cache.clear(&layer)
                            };
                            if let Err(e) = cleared {
                                warn!(layer = %layer, error = %e, "Failed to clear partitions cache");
                            }
                        }
                        Err(_) => {}
                    }
                    completion(response);
                });
                if by_ids {
                    api.get_partitions_by_id(&hrn, &layer_id, &ids, version, &request_context, callback)
                } else {
                    api.get_partitions(&hrn, &layer_id, version, &request_context, callback)
                }
            },
        )
    }

    /// Metadata of the single partition `request.partition_id` names.
    pub fn get_partition_by_id(
        &self,
        request: &DataRequest,
        expiry: Option<Duration>,
        context: &CancellationContext,
    ) -> ApiResponse<Partitions> {
        let Some(partition_id) = &request.partition_id else {
            return Err(ApiError::invalid_argument("Partition Id is missing"));
        };

        let mut partitions_request = PartitionsRequest::default()
            .with_partition_ids([partition_id.as_str()])
            .with_version(request.version)
            .with_fetch_option(request.fetch_option)
            .with_priority(request.priority);
        partitions_request.billing_tag = request.billing_tag.clone();

        self.get_partitions(&partitions_request, expiry, context)
    }
}

/// Latest catalog version, honouring the caller's fetch option.
pub(crate) fn resolve_latest_version(
    hrn: &str,
    settings: &Arc<ClientSettings>,
    fetch_option: FetchOption,
    billing_tag: Option<&str>,
    context: &CancellationContext,
) -> ApiResponse<i64> {
    let mut request = CatalogVersionRequest::default().with_fetch_option(fetch_option);
    request.billing_tag = billing_tag.map(str::to_string);
    CatalogRepository::new(hrn, settings.clone()).get_latest_version(&request, context)
}

//! Catalog metadata and version resolution.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::blocking::blocking_call;
use super::catalog_cache::CatalogCacheRepository;
use crate::client::{CancellationContext, ClientSettings};
use crate::error::{ApiError, ApiResponse};
use crate::model::Catalog;
use crate::request::{CatalogRequest, CatalogVersionRequest, FetchOption};

pub struct CatalogRepository {
    hrn: String,
    settings: Arc<ClientSettings>,
    cache: CatalogCacheRepository,
}

impl CatalogRepository {
    pub fn new(hrn: impl Into<String>, settings: Arc<ClientSettings>) -> Self {
        let hrn = hrn.into();
        let cache = CatalogCacheRepository::new(
            hrn.clone(),
            settings.cache.clone(),
            settings.default_cache_expiration,
        );
        Self { hrn, settings, cache }
    }

    pub fn get_catalog(&self, request: &CatalogRequest, context: &CancellationContext) -> ApiResponse<Catalog> {
        let fetch_option = request.fetch_option;
        if fetch_option.reads_cache() {
            if let Some(catalog) = self.cache.get() {
                debug!(catalog = %self.hrn, "Catalog cache hit");
                return Ok(catalog);
            }
            if fetch_option == FetchOption::CacheOnly {
                return Err(ApiError::not_found(
                    "Cache only resource not found in cache (catalog).",
                ));
            }
        }

        let request_context = self.settings.request_context(request.billing_tag.as_deref())?;
        let key = request.create_key(&self.hrn);
        let api = self.settings.api.clone();
        let cache = self.cache.clone();
        let hrn = self.hrn.clone();

        blocking_call(
            &self.settings,
            &self.settings.coalescers.catalog,
            &key,
            context,
            move |completion| {
                let catalog_hrn = hrn.clone();
                api.get_catalog(
                    &catalog_hrn,
                    &request_context,
                    Box::new(move |response| {
                        match &response {
                            Ok(catalog) => cache.put(catalog),
                            Err(e) if e.is_forbidden() => {
                                info!(catalog = %hrn, "Catalog access forbidden, clearing cache");
                                if let Err(e) = cache.clear() {
                                    warn!(catalog = %hrn, error = %e, "Failed to clear catalog cache");
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

    /// Resolves the latest catalog version.
    ///
    /// `CacheOnly` reads the cache, `OnlineIfNotFound` reads the cache and
    /// falls back to the network. `OnlineOnly` always asks the network and
    /// `Default` does too, but answers from the cache when the network fails.
    pub fn get_latest_version(
        &self,
        request: &CatalogVersionRequest,
        context: &CancellationContext,
    ) -> ApiResponse<i64> {
        let fetch_option = request.fetch_option;
        let cached = match fetch_option {
            FetchOption::OnlineOnly => None,
            _ => self.cache.get_version(),
        };

        match (fetch_option, cached) {
            (FetchOption::CacheOnly, Some(version)) | (FetchOption::OnlineIfNotFound, Some(version)) => {
                debug!(catalog = %self.hrn, version, "Latest version cache hit");
                return Ok(version);
            }
            (FetchOption::CacheOnly, None) => {
                return Err(ApiError::not_found(
                    "Cache only resource not found in cache (catalog version).",
                ));
            }
            _ => {}
        }

        let response = self.fetch_latest_version(request, context);
        match (response, cached) {
            (Err(e), Some(version)) if fetch_option == FetchOption::Default && !e.is_cancelled() => {
                warn!(
                    catalog = %self.hrn,
                    error = %e,
                    version,
                    "Latest version request failed, using cached version"
                );
                Ok(version)
            }
            (response, _) => response,
        }
    }

    fn fetch_latest_version(
        &self,
        request: &CatalogVersionRequest,
        context: &CancellationContext,
    ) -> ApiResponse<i64> {
        let request_context = self.settings.request_context(request.billing_tag.as_deref())?;
        let key = request.create_key(&self.hrn);
        let api = self.settings.api.clone();
        let cache = self.cache.clone();
        let hrn = self.hrn.clone();

        blocking_call(
            &self.settings,
            &self.settings.coalescers.latest_version,
            &key,
            context,
            move |completion| {
                let catalog_hrn = hrn.clone();
                api.get_latest_version(
                    &catalog_hrn,
                    &request_context,
                    Box::new(move |response| {
                        match &response {
                            Ok(version) => cache.put_version(*version),
                            Err(e) if e.is_forbidden() => {
                                if let Err(e) = cache.clear() {
                                    warn!(catalog = %hrn, error = %e, "Failed to clear catalog cache");
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

    /// Cache expiry of `layer`: its TTL if it has one.
    ///
    /// Fails with `NotFound` when the catalog has no such layer.
    pub fn layer_expiry(
        &self,
        layer: &str,
        fetch_option: FetchOption,
        billing_tag: Option<&str>,
        context: &CancellationContext,
    ) -> ApiResponse<Option<Duration>> {
        let mut request = CatalogRequest::default().with_fetch_option(fetch_option);
        request.billing_tag = billing_tag.map(str::to_string);
        let catalog = self.get_catalog(&request, context)?;
        match catalog.layer(layer) {
            Some(layer) => Ok(layer.ttl().or(self.settings.default_cache_expiration)),
            None => Err(ApiError::not_found("Layer specified doesn't exist.")),
        }
    }
}

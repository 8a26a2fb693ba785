//! Shared, immutable client configuration.
//!
//! A [`ClientSettings`] is built once and then shared as an
//! `Arc<ClientSettings>` snapshot by every task a client spawns.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::single_flight::SingleFlight;
use crate::api::{CatalogApi, RequestContext, TokenProvider};
use crate::cache::{DefaultCache, KeyValueCache, DEFAULT_MEMORY_CACHE_SIZE};
use crate::error::{ApiError, ApiResponse, ErrorCode};
use crate::model::{Catalog, Partitions, QuadTreeIndex};
use crate::thread::TaskScheduler;

/// Default wait bound of synchronous network calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Single-flight coordinators, one per response type.
///
/// Shared by every repository of clients built from the same settings, so
/// identical requests coalesce across clients.
#[derive(Debug, Default)]
pub struct Coalescers {
    pub catalog: SingleFlight<Catalog>,
    pub latest_version: SingleFlight<i64>,
    pub partitions: SingleFlight<Partitions>,
    pub data: SingleFlight<Bytes>,
    pub quad_tree: SingleFlight<QuadTreeIndex>,
}

impl Coalescers {
    /// Cancels every coalesced operation.
    pub fn cancel_all(&self) {
        self.catalog.cancel_all();
        self.latest_version.cancel_all();
        self.partitions.cancel_all();
        self.data.cancel_all();
        self.quad_tree.cancel_all();
    }
}

/// Collaborators and tunables of a client.
#[derive(Clone)]
pub struct ClientSettings {
    pub api: Arc<dyn CatalogApi>,
    /// Runs requests; `None` runs them inline on the calling thread.
    pub task_scheduler: Option<Arc<dyn TaskScheduler>>,
    pub cache: Arc<dyn KeyValueCache>,
    pub timeout: Duration,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
    /// Expiry of cached entries for layers without their own TTL.
    pub default_cache_expiration: Option<Duration>,
    pub coalescers: Arc<Coalescers>,
}

impl ClientSettings {
    /// Settings with an in-memory cache, no scheduler and default timeout.
    pub fn new(api: Arc<dyn CatalogApi>) -> Self {
        Self {
            api,
            task_scheduler: None,
            cache: Arc::new(DefaultCache::in_memory(DEFAULT_MEMORY_CACHE_SIZE)),
            timeout: DEFAULT_TIMEOUT,
            token_provider: None,
            default_cache_expiration: None,
            coalescers: Arc::new(Coalescers::default()),
        }
    }

    pub fn with_task_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.task_scheduler = Some(scheduler);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn KeyValueCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn with_default_cache_expiration(mut self, expiration: Duration) -> Self {
        self.default_cache_expiration = Some(expiration);
        self
    }

    /// Builds the per-call context, fetching a bearer token if configured.
    pub fn request_context(&self, billing_tag: Option<&str>) -> ApiResponse<RequestContext> {
        let bearer_token = match &self.token_provider {
            Some(provider) => Some(provider.token().map_err(|e| {
                ApiError::new(ErrorCode::AuthenticationError, e.message().to_string())
            })?),
            None => None,
        };
        Ok(RequestContext {
            billing_tag: billing_tag.map(str::to_string),
            bearer_token,
        })
    }
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("has_task_scheduler", &self.task_scheduler.is_some())
            .field("timeout", &self.timeout)
            .field("has_token_provider", &self.token_provider.is_some())
            .field("default_cache_expiration", &self.default_cache_expiration)
            .finish()
    }
}

//! Cached catalog metadata and latest-version numbers.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use super::keys;
use crate::cache::{CacheError, KeyValueCache};
use crate::model::Catalog;

/// Reads and writes the catalog-level entries of one catalog.
#[derive(Clone)]
pub struct CatalogCacheRepository {
    hrn: String,
    cache: Arc<dyn KeyValueCache>,
    default_expiry: Option<Duration>,
}

impl CatalogCacheRepository {
    pub fn new(hrn: impl Into<String>, cache: Arc<dyn KeyValueCache>, default_expiry: Option<Duration>) -> Self {
        Self {
            hrn: hrn.into(),
            cache,
            default_expiry,
        }
    }

    pub fn put(&self, catalog: &Catalog) {
        let key = keys::catalog_key(&self.hrn);
        put_json(self.cache.as_ref(), &key, catalog, self.default_expiry);
    }

    pub fn get(&self) -> Option<Catalog> {
        let key = keys::catalog_key(&self.hrn);
        get_json(self.cache.as_ref(), &key)
    }

    pub fn put_version(&self, version: i64) {
        let key = keys::latest_version_key(&self.hrn);
        put_json(self.cache.as_ref(), &key, &version, self.default_expiry);
    }

    pub fn get_version(&self) -> Option<i64> {
        let key = keys::latest_version_key(&self.hrn);
        get_json(self.cache.as_ref(), &key)
    }

    /// Removes every entry of the catalog, layers included.
    pub fn clear(&self) -> Result<(), CacheError> {
        debug!(catalog = %self.hrn, "Clearing catalog cache");
        self.cache.remove_keys_with_prefix(&keys::catalog_prefix(&self.hrn))
    }
}

/// Serializes `value` as JSON and stores it. Failures are logged, not returned:
/// a failed cache write never fails the request that produced the value.
pub(crate) fn put_json<T: serde::Serialize>(
    cache: &dyn KeyValueCache,
    key: &str,
    value: &T,
    expiry: Option<Duration>,
) {
    let encoded = match serde_json::to_vec(value) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to encode cache value");
            return;
        }
    };
    if let Err(e) = cache.put(key, Bytes::from(encoded), expiry) {
        warn!(key = %key, error = %e, "Cache write failed");
    }
}

/// Reads and decodes a JSON value. Undecodable entries read as misses.
pub(crate) fn get_json<T: serde::de::DeserializeOwned>(cache: &dyn KeyValueCache, key: &str) -> Option<T> {
    let bytes = match cache.get(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            warn!(key = %key, error = %e, "Cache read failed");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, error = %e, "Discarding undecodable cache entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DefaultCache;
    use crate::model::{Layer, LayerType};

    fn repository() -> CatalogCacheRepository {
        CatalogCacheRepository::new("hrn:test", Arc::new(DefaultCache::in_memory(1 << 20)), None)
    }

    #[test]
    fn test_catalog_round_trip() {
        let repository = repository();
        assert!(repository.get().is_none());

        let catalog = Catalog {
            hrn: "hrn:test".to_string(),
            version: 7,
            layers: vec![Layer {
                id: "roads".to_string(),
                layer_type: LayerType::Versioned,
                ttl_seconds: None,
            }],
        };
        repository.put(&catalog);
        assert_eq!(repository.get(), Some(catalog));
    }

    #[test]
    fn test_version_and_clear() {
        let repository = repository();
        repository.put_version(12);
        assert_eq!(repository.get_version(), Some(12));

        repository.clear().unwrap();
        assert_eq!(repository.get_version(), None);
    }

    #[test]
    fn test_undecodable_entry_is_a_miss() {
        let cache = Arc::new(DefaultCache::in_memory(1 << 20));
        cache
            .put(&keys::latest_version_key("hrn:test"), Bytes::from_static(b"not json"), None)
            .unwrap();
        let repository = CatalogCacheRepository::new("hrn:test", cache, None);
        assert_eq!(repository.get_version(), None);
    }
}

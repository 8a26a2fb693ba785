//! Cached data blobs, stored raw.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use super::keys;
use crate::cache::{CacheError, KeyValueCache};

#[derive(Clone)]
pub struct DataCacheRepository {
    hrn: String,
    cache: Arc<dyn KeyValueCache>,
    default_expiry: Option<Duration>,
}

impl DataCacheRepository {
    pub fn new(hrn: impl Into<String>, cache: Arc<dyn KeyValueCache>, default_expiry: Option<Duration>) -> Self {
        Self {
            hrn: hrn.into(),
            cache,
            default_expiry,
        }
    }

    pub fn put(&self, layer: &str, data_handle: &str, data: Bytes, expiry: Option<Duration>) {
        let key = keys::data_key(&self.hrn, layer, data_handle);
        if let Err(e) = self.cache.put(&key, data, expiry.or(self.default_expiry)) {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    pub fn get(&self, layer: &str, data_handle: &str) -> Option<Bytes> {
        let key = keys::data_key(&self.hrn, layer, data_handle);
        match self.cache.get(&key) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    pub fn is_cached(&self, layer: &str, data_handle: &str) -> bool {
        self.cache.contains(&keys::data_key(&self.hrn, layer, data_handle))
    }

    /// Removes one blob. Returns whether it was present.
    pub fn clear(&self, layer: &str, data_handle: &str) -> Result<bool, CacheError> {
        self.cache.remove(&keys::data_key(&self.hrn, layer, data_handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DefaultCache;

    #[test]
    fn test_blob_lifecycle() {
        let repository =
            DataCacheRepository::new("hrn:test", Arc::new(DefaultCache::in_memory(1 << 20)), None);
        assert!(!repository.is_cached("roads", "h"));

        repository.put("roads", "h", Bytes::from_static(b"\0payload\0"), None);
        assert!(repository.is_cached("roads", "h"));
        assert_eq!(repository.get("roads", "h"), Some(Bytes::from_static(b"\0payload\0")));

        assert!(repository.clear("roads", "h").unwrap());
        assert!(!repository.clear("roads", "h").unwrap());
        assert_eq!(repository.get("roads", "h"), None);
    }

    #[test]
    fn test_expired_blob_reads_as_absent() {
        let repository =
            DataCacheRepository::new("hrn:test", Arc::new(DefaultCache::in_memory(1 << 20)), None);
        repository.put("traffic", "h", Bytes::from_static(b"x"), Some(Duration::ZERO));
        assert_eq!(repository.get("traffic", "h"), None);
    }
}

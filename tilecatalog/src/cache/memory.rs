//! In-memory cache tier using moka.
//!
//! Entries are weighted by key plus value size, so the capacity is a byte
//! budget. Moka evicts on its own once the budget is exceeded.

use bytes::Bytes;
use moka::sync::Cache as MokaCache;

/// Size-bounded in-memory tier.
pub struct MemoryCache {
    cache: MokaCache<String, Bytes>,
    max_size_bytes: u64,
}

impl MemoryCache {
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            .weigher(|key: &String, value: &Bytes| -> u32 {
                (key.len() + value.len()).min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();
        Self {
            cache,
            max_size_bytes,
        }
    }

    pub fn put(&self, key: &str, value: Bytes) {
        self.cache.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.cache.remove(key).is_some()
    }

    pub fn remove_keys_with_prefix(&self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        for key in &doomed {
            self.cache.invalidate(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Weighted size in bytes. Moka is eventually consistent, so pending
    /// maintenance is flushed first.
    pub fn size_bytes(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_size_bytes", &self.max_size_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let cache = MemoryCache::new(1024);
        cache.put("k", Bytes::from_static(b"value"));
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"value")));
        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_remove_keys_with_prefix() {
        let cache = MemoryCache::new(1024);
        cache.put("a::1", Bytes::from_static(b"x"));
        cache.put("a::2", Bytes::from_static(b"x"));
        cache.put("b::1", Bytes::from_static(b"x"));

        assert_eq!(cache.remove_keys_with_prefix("a::"), 2);
        assert!(cache.get("a::1").is_none());
        assert!(cache.get("b::1").is_some());
    }

    #[test]
    fn test_size_is_weighted() {
        let cache = MemoryCache::new(1024);
        cache.put("key", Bytes::from(vec![0u8; 100]));
        assert_eq!(cache.size_bytes(), 103);
        assert_eq!(cache.entry_count(), 1);

        cache.clear();
        assert_eq!(cache.entry_count(), 0);
    }
}

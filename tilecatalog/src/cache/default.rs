//! Two-tier cache: memory in front of persistent storage.
//!
//! Reads probe memory, then the protected (read-only) store, then the
//! mutable store; disk hits are promoted into memory. Writes go to memory
//! and the mutable store. Every entry carries the expiry envelope from
//! [`entry`](super::entry); expired entries read as absent and are purged
//! when encountered.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::memory::MemoryCache;
use super::store::{DiskCache, DiskCacheSettings, OpenResult};
use super::traits::{CacheError, KeyValueCache};

/// Default in-memory budget.
pub const DEFAULT_MEMORY_CACHE_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration of a [`DefaultCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Root of the writable cache. `None` keeps the cache in memory only.
    pub disk_path_mutable: Option<PathBuf>,
    /// Cache generation; the store lives in `disk_path_mutable/<version>`
    /// and other generations are removed on open.
    pub cache_version: Option<String>,
    /// Pre-populated read-only store consulted before the mutable one.
    pub disk_path_protected: Option<PathBuf>,
    /// Quota of the mutable store. `None` is unlimited.
    pub max_disk_storage: Option<u64>,
    /// Byte budget of the memory tier; 0 disables it.
    pub max_memory_cache_size: u64,
    /// Explicit LMDB map size.
    pub map_size: Option<usize>,
    /// Open the mutable store read-only; writes then only reach memory.
    pub read_only: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            disk_path_mutable: None,
            cache_version: None,
            disk_path_protected: None,
            max_disk_storage: None,
            max_memory_cache_size: DEFAULT_MEMORY_CACHE_SIZE,
            map_size: None,
            read_only: false,
        }
    }
}

/// Size information for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_bytes: u64,
    pub memory_entries: u64,
    pub disk_bytes: u64,
    pub disk_entries: u64,
    pub disk_max_bytes: Option<u64>,
}

/// Memory plus optional disk cache.
pub struct DefaultCache {
    memory: Option<MemoryCache>,
    mutable: Option<DiskCache>,
    protected: Option<DiskCache>,
    read_only: bool,
    open_result: OpenResult,
}

impl DefaultCache {
    pub fn open(settings: CacheSettings) -> Result<Self, CacheError> {
        let memory = (settings.max_memory_cache_size > 0)
            .then(|| MemoryCache::new(settings.max_memory_cache_size));

        let protected = match &settings.disk_path_protected {
            Some(path) => {
                let disk = DiskCacheSettings {
                    map_size: settings.map_size,
                    ..DiskCacheSettings::new(path).read_only(true)
                };
                Some(DiskCache::open(disk)?.0)
            }
            None => None,
        };

        let (mutable, open_result) = match &settings.disk_path_mutable {
            Some(path) => {
                let mut disk = DiskCacheSettings::new(path)
                    .with_max_disk_storage(settings.max_disk_storage)
                    .read_only(settings.read_only);
                disk.map_size = settings.map_size;
                if let Some(version) = &settings.cache_version {
                    disk = disk.with_versioned_path(path.join(version));
                }
                let (cache, result) = DiskCache::open(disk)?;
                (Some(cache), result)
            }
            None => (None, OpenResult::Success),
        };

        Ok(Self {
            memory,
            mutable,
            protected,
            read_only: settings.read_only,
            open_result,
        })
    }

    /// A cache with only the memory tier.
    pub fn in_memory(max_memory_cache_size: u64) -> Self {
        Self {
            memory: Some(MemoryCache::new(max_memory_cache_size)),
            mutable: None,
            protected: None,
            read_only: false,
            open_result: OpenResult::Success,
        }
    }

    pub fn open_result(&self) -> OpenResult {
        self.open_result
    }

    pub fn disk(&self) -> Option<&DiskCache> {
        self.mutable.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        if let Some(memory) = &self.memory {
            stats.memory_bytes = memory.size_bytes();
            stats.memory_entries = memory.entry_count();
        }
        if let Some(disk) = &self.mutable {
            stats.disk_bytes = disk.size();
            stats.disk_entries = disk.entry_count().unwrap_or(0);
            stats.disk_max_bytes = disk.max_size();
        }
        stats
    }

    /// Closes the disk stores; the memory tier stays usable.
    pub fn close(&self) {
        if let Some(disk) = &self.mutable {
            disk.close();
        }
        if let Some(disk) = &self.protected {
            disk.close();
        }
    }

    fn purge(&self, key: &str) {
        if let Some(memory) = &self.memory {
            memory.remove(key);
        }
        if let Some(disk) = self.mutable.as_ref().filter(|_| !self.read_only) {
            if let Err(e) = disk.remove(key) {
                warn!(key = %key, error = %e, "Failed to purge expired entry");
            }
        }
    }

    fn read_disk(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(protected) = &self.protected {
            if let Some(raw) = protected.get(key)? {
                return Ok(Some(raw));
            }
        }
        match &self.mutable {
            Some(disk) => disk.get(key),
            None => Ok(None),
        }
    }
}

impl KeyValueCache for DefaultCache {
    fn put(&self, key: &str, value: Bytes, expiry: Option<Duration>) -> Result<(), CacheError> {
        // A TTL beyond chrono's range never expires.
        let expires_at = expiry.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        });
        let raw = CacheEntry::new(value, expires_at).encode();

        // A rejected disk write leaves both tiers untouched.
        if let Some(disk) = self.mutable.as_ref().filter(|_| !self.read_only) {
            disk.put(key, &raw)?;
        }
        if let Some(memory) = &self.memory {
            memory.put(key, raw);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        if let Some(raw) = self.memory.as_ref().and_then(|memory| memory.get(key)) {
            let entry = CacheEntry::decode(&raw)?;
            if entry.is_expired() {
                debug!(key = %key, "Cache entry expired");
                self.purge(key);
                return Ok(None);
            }
            return Ok(Some(entry.payload));
        }

        let Some(raw) = self.read_disk(key)? else {
            return Ok(None);
        };
        let entry = CacheEntry::decode(&raw)?;
        if entry.is_expired() {
            debug!(key = %key, "Cache entry expired");
            self.purge(key);
            return Ok(None);
        }
        if let Some(memory) = &self.memory {
            memory.put(key, Bytes::from(raw));
        }
        Ok(Some(entry.payload))
    }

    fn contains(&self, key: &str) -> bool {
        matches!(self.get(key), Ok(Some(_)))
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut removed = self
            .memory
            .as_ref()
            .is_some_and(|memory| memory.remove(key));
        if let Some(disk) = self.mutable.as_ref().filter(|_| !self.read_only) {
            removed |= disk.remove(key)?;
        }
        Ok(removed)
    }

    fn remove_keys_with_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        if let Some(memory) = &self.memory {
            if prefix.is_empty() {
                memory.clear();
            } else {
                memory.remove_keys_with_prefix(prefix);
            }
        }
        if let Some(disk) = self.mutable.as_ref().filter(|_| !self.read_only) {
            disk.remove_keys_with_prefix(prefix)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.remove_keys_with_prefix("")
    }
}

impl std::fmt::Debug for DefaultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCache")
            .field("memory", &self.memory)
            .field("mutable", &self.mutable)
            .field("protected", &self.protected.is_some())
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn disk_settings(dir: &TempDir) -> CacheSettings {
        CacheSettings {
            disk_path_mutable: Some(dir.path().to_path_buf()),
            ..CacheSettings::default()
        }
    }

    #[test]
    fn test_in_memory_roundtrip() {
        let cache = DefaultCache::in_memory(1024);
        cache.put("k", Bytes::from_static(b"v"), None).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(Bytes::from_static(b"v")));
        assert!(cache.contains("k"));
        assert!(cache.remove("k").unwrap());
        assert!(!cache.contains("k"));
    }

    #[test]
    fn test_disk_hit_is_promoted_to_memory() {
        let dir = TempDir::new().unwrap();
        {
            let cache = DefaultCache::open(disk_settings(&dir)).unwrap();
            cache.put("k", Bytes::from_static(b"persisted"), None).unwrap();
        }
        let cache = DefaultCache::open(disk_settings(&dir)).unwrap();
        assert_eq!(cache.stats().memory_entries, 0);
        assert_eq!(cache.get("k").unwrap(), Some(Bytes::from_static(b"persisted")));
        assert_eq!(cache.stats().memory_entries, 1);
    }

    #[test]
    fn test_expired_entry_reads_absent_and_is_purged() {
        let dir = TempDir::new().unwrap();
        let cache = DefaultCache::open(disk_settings(&dir)).unwrap();
        cache
            .put("k", Bytes::from_static(b"v"), Some(Duration::ZERO))
            .unwrap();

        assert_eq!(cache.get("k").unwrap(), None);
        assert!(!cache.contains("k"));
        assert_eq!(cache.disk().unwrap().get("k").unwrap(), None);
    }

    #[test]
    fn test_live_ttl_entry_is_returned() {
        let cache = DefaultCache::in_memory(1024);
        cache
            .put("k", Bytes::from_static(b"v"), Some(Duration::from_secs(3600)))
            .unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn test_prefix_removal_spans_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = DefaultCache::open(disk_settings(&dir)).unwrap();
        cache.put("hrn::layer::1", Bytes::from_static(b"a"), None).unwrap();
        cache.put("hrn::layer::2", Bytes::from_static(b"b"), None).unwrap();
        cache.put("hrn::other::1", Bytes::from_static(b"c"), None).unwrap();

        cache.remove_keys_with_prefix("hrn::layer::").unwrap();
        assert!(!cache.contains("hrn::layer::1"));
        assert!(!cache.contains("hrn::layer::2"));
        assert!(cache.contains("hrn::other::1"));

        cache.clear().unwrap();
        assert_eq!(cache.stats().disk_entries, 0);
    }

    #[test]
    fn test_cache_version_directory() {
        let dir = TempDir::new().unwrap();
        let settings = CacheSettings {
            cache_version: Some("v7".to_string()),
            ..disk_settings(&dir)
        };
        let cache = DefaultCache::open(settings).unwrap();
        assert_eq!(cache.disk().unwrap().path(), dir.path().join("v7"));
    }

    #[test]
    fn test_protected_store_is_consulted() {
        let protected_dir = TempDir::new().unwrap();
        {
            let seed = DefaultCache::open(disk_settings(&protected_dir)).unwrap();
            seed.put("seeded", Bytes::from_static(b"p"), None).unwrap();
        }
        let mutable_dir = TempDir::new().unwrap();
        let settings = CacheSettings {
            disk_path_protected: Some(protected_dir.path().to_path_buf()),
            max_memory_cache_size: 0,
            ..disk_settings(&mutable_dir)
        };
        let cache = DefaultCache::open(settings).unwrap();
        assert_eq!(cache.get("seeded").unwrap(), Some(Bytes::from_static(b"p")));
    }

    #[test]
    fn test_quota_error_surfaces_from_put() {
        let dir = TempDir::new().unwrap();
        let settings = CacheSettings {
            max_disk_storage: Some(8),
            ..disk_settings(&dir)
        };
        let cache = DefaultCache::open(settings).unwrap();
        cache.put("abcd", Bytes::from_static(b"0123"), None).unwrap();
        assert!(matches!(
            cache.put("efgh", Bytes::from_static(b"x"), None),
            Err(CacheError::QuotaExceeded { .. })
        ));
        assert_eq!(cache.get("abcd").unwrap(), Some(Bytes::from_static(b"0123")));
    }

    #[test]
    fn test_rejected_overwrite_keeps_memory_and_disk_value() {
        let dir = TempDir::new().unwrap();
        let settings = CacheSettings {
            max_disk_storage: Some(64),
            ..disk_settings(&dir)
        };
        let cache = DefaultCache::open(settings).unwrap();
        let original = Bytes::from(vec![7u8; 80]);
        cache.put("k", original.clone(), None).unwrap();

        assert!(matches!(
            cache.put("k", Bytes::from_static(b"NEW"), None),
            Err(CacheError::QuotaExceeded { .. })
        ));
        assert_eq!(cache.get("k").unwrap(), Some(original.clone()));
        assert_eq!(cache.stats().memory_entries, 1);

        // Same answer once the memory tier is bypassed.
        let raw = cache.disk().unwrap().get("k").unwrap().unwrap();
        assert_eq!(CacheEntry::decode(&raw).unwrap().payload, original);
    }

    #[test]
    fn test_sub_second_ttl_is_live_right_after_put() {
        let cache = DefaultCache::in_memory(1 << 20);
        cache
            .put("k", Bytes::from_static(b"v"), Some(Duration::from_millis(800)))
            .unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(Bytes::from_static(b"v")));

        std::thread::sleep(Duration::from_millis(900));
        assert_eq!(cache.get("k").unwrap(), None);
    }
}

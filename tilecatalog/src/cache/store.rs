//! Persistent key-value store on LMDB.
//!
//! # Directory layout
//!
//! ```text
//! data_path/
//! ├── v3/              versioned_path: the live store
//! │   ├── data.mdb
//! │   └── lock.mdb
//! └── v2/              stale generation, removed on read-write open
//! ```
//!
//! Opening read-write creates the directories, removes sibling generations,
//! and repairs a store that fails to open: first by dropping the stale lock
//! file, then by destroying and recreating the directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use heed::types::Bytes as RawBytes;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::quota::QuotaEnvironment;
use super::traits::CacheError;

/// Largest key LMDB accepts with its default page configuration.
pub const MAX_KEY_SIZE: usize = 511;

const LOCK_FILE: &str = "lock.mdb";
const MIN_MAP_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
const MAP_SIZE_GRANULARITY: usize = 64 * 1024;

/// How [`DiskCache::open`] obtained a usable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenResult {
    Success,
    /// The store was unreadable and has been repaired or recreated.
    Repaired,
}

/// Settings of one persistent store.
#[derive(Debug, Clone)]
pub struct DiskCacheSettings {
    /// Root of the cache directory.
    pub data_path: PathBuf,
    /// Directory of the current cache generation. Defaults to `data_path`.
    pub versioned_path: Option<PathBuf>,
    /// Quota on payload bytes. `None` is unlimited.
    pub max_disk_storage: Option<u64>,
    /// LMDB map size. Derived from the quota when unset.
    pub map_size: Option<usize>,
    pub read_only: bool,
}

impl DiskCacheSettings {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            versioned_path: None,
            max_disk_storage: None,
            map_size: None,
            read_only: false,
        }
    }

    pub fn with_versioned_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.versioned_path = Some(path.into());
        self
    }

    pub fn with_max_disk_storage(mut self, max: Option<u64>) -> Self {
        self.max_disk_storage = max;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn store_path(&self) -> &Path {
        self.versioned_path.as_deref().unwrap_or(&self.data_path)
    }

    /// Map size large enough to hold the quota plus LMDB overhead.
    pub fn effective_map_size(&self) -> usize {
        let size = match (self.map_size, self.max_disk_storage) {
            (Some(size), _) => size,
            (None, Some(max)) => usize::try_from(max)
                .unwrap_or(usize::MAX / 2)
                .saturating_mul(2)
                .saturating_add(1024 * 1024)
                .max(MIN_MAP_SIZE),
            (None, None) => DEFAULT_MAP_SIZE,
        };
        size.div_ceil(MAP_SIZE_GRANULARITY)
            .saturating_mul(MAP_SIZE_GRANULARITY)
    }
}

struct Store {
    env: Env,
    db: Database<RawBytes, RawBytes>,
}

/// Directory-backed persistent store with quota enforcement.
pub struct DiskCache {
    path: PathBuf,
    read_only: bool,
    store: RwLock<Option<Store>>,
    quota: QuotaEnvironment,
}

impl DiskCache {
    /// Opens (and if needed creates, cleans up or repairs) the store.
    pub fn open(settings: DiskCacheSettings) -> Result<(Self, OpenResult), CacheError> {
        let path = settings.store_path().to_path_buf();
        let map_size = settings.effective_map_size();

        let (store, result) = if settings.read_only {
            (open_read_only(&path, map_size)?, OpenResult::Success)
        } else {
            fs::create_dir_all(&path)?;
            if path != settings.data_path {
                remove_other_generations(&settings.data_path, &path);
            }
            open_read_write_with_repair(&path, map_size)?
        };

        let used = scan_payload_bytes(&store)?;
        info!(
            path = %path.display(),
            read_only = settings.read_only,
            used_bytes = used,
            max_bytes = ?settings.max_disk_storage,
            repaired = result == OpenResult::Repaired,
            "Disk cache opened"
        );

        Ok((
            Self {
                path,
                read_only: settings.read_only,
                store: RwLock::new(Some(store)),
                quota: QuotaEnvironment::new(settings.max_disk_storage, used),
            },
            result,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        check_key(key)?;
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        if let Err(e) = self.quota.check_write() {
            warn!(key = %key, error = %e, "Disk cache write rejected");
            return Err(e);
        }

        let guard = self.store.read();
        let store = guard.as_ref().ok_or(CacheError::NotOpen)?;
        let mut wtxn = store.env.write_txn()?;
        let replaced = store
            .db
            .get(&wtxn, key.as_bytes())?
            .map(|old| (key.len() + old.len()) as u64)
            .unwrap_or(0);
        store.db.put(&mut wtxn, key.as_bytes(), value)?;
        wtxn.commit()?;

        self.quota
            .record_write((key.len() + value.len()) as u64, replaced);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if key.len() > MAX_KEY_SIZE {
            return Ok(None);
        }
        let guard = self.store.read();
        let store = guard.as_ref().ok_or(CacheError::NotOpen)?;
        let rtxn = store.env.read_txn()?;
        let value = store.db.get(&rtxn, key.as_bytes())?.map(<[u8]>::to_vec);
        rtxn.commit()?;
        Ok(value)
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self.get(key), Ok(Some(_)))
    }

    /// Removes `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        if key.len() > MAX_KEY_SIZE {
            return Ok(false);
        }
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let guard = self.store.read();
        let store = guard.as_ref().ok_or(CacheError::NotOpen)?;
        let mut wtxn = store.env.write_txn()?;
        let size = store
            .db
            .get(&wtxn, key.as_bytes())?
            .map(|old| (key.len() + old.len()) as u64);
        let removed = store.db.delete(&mut wtxn, key.as_bytes())?;
        wtxn.commit()?;

        self.quota.record_removed(size.unwrap_or(0));
        Ok(removed)
    }

    /// Removes every key starting with `prefix`; an empty prefix clears the store.
    pub fn remove_keys_with_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        if prefix.is_empty() {
            let count = self.entry_count()?;
            self.clear()?;
            return Ok(count as usize);
        }
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }

        let guard = self.store.read();
        let store = guard.as_ref().ok_or(CacheError::NotOpen)?;
        let mut wtxn = store.env.write_txn()?;
        let mut doomed = Vec::new();
        let mut freed = 0u64;
        for item in store.db.prefix_iter(&wtxn, prefix.as_bytes())? {
            let (key, value) = item?;
            freed += (key.len() + value.len()) as u64;
            doomed.push(key.to_vec());
        }
        for key in &doomed {
            store.db.delete(&mut wtxn, key)?;
        }
        wtxn.commit()?;

        self.quota.record_removed(freed);
        debug!(prefix = %prefix, removed = doomed.len(), "Removed keys by prefix");
        Ok(doomed.len())
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let guard = self.store.read();
        let store = guard.as_ref().ok_or(CacheError::NotOpen)?;
        let mut wtxn = store.env.write_txn()?;
        store.db.clear(&mut wtxn)?;
        wtxn.commit()?;
        self.quota.reset();
        Ok(())
    }

    /// Closes the environment. Further operations fail with `NotOpen`.
    pub fn close(&self) {
        if let Some(store) = self.store.write().take() {
            if !self.read_only {
                if let Err(e) = store.env.force_sync() {
                    warn!(path = %self.path.display(), error = %e, "Failed to sync disk cache on close");
                }
            }
            debug!(path = %self.path.display(), "Disk cache closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.store.read().is_some()
    }

    /// Quota estimate of the stored payload bytes.
    pub fn size(&self) -> u64 {
        self.quota.used_bytes()
    }

    pub fn max_size(&self) -> Option<u64> {
        self.quota.max_bytes()
    }

    pub fn entry_count(&self) -> Result<u64, CacheError> {
        let guard = self.store.read();
        let store = guard.as_ref().ok_or(CacheError::NotOpen)?;
        let rtxn = store.env.read_txn()?;
        let count = store.db.len(&rtxn)?;
        rtxn.commit()?;
        Ok(count)
    }

    /// Keys starting with `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let guard = self.store.read();
        let store = guard.as_ref().ok_or(CacheError::NotOpen)?;
        let rtxn = store.env.read_txn()?;
        let mut keys = Vec::new();
        for item in store.db.prefix_iter(&rtxn, prefix.as_bytes())? {
            let (key, _) = item?;
            keys.push(String::from_utf8_lossy(key).into_owned());
        }
        rtxn.commit()?;
        Ok(keys)
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .field("quota", &self.quota)
            .finish()
    }
}

fn check_key(key: &str) -> Result<(), CacheError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(CacheError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn open_env(path: &Path, map_size: usize, read_only: bool) -> Result<Env, heed::Error> {
    let mut options = EnvOpenOptions::new();
    options.map_size(map_size).max_dbs(1);
    // SAFETY: each store directory is opened by at most one `DiskCache` in
    // this process, and the memory map is never handed out beyond a txn.
    unsafe {
        if read_only {
            options.flags(EnvFlags::READ_ONLY);
        }
        options.open(path)
    }
}

fn open_read_only(path: &Path, map_size: usize) -> Result<Store, CacheError> {
    if !path.is_dir() {
        return Err(CacheError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("cache directory {} does not exist", path.display()),
        )));
    }
    let env = open_env(path, map_size, true)?;
    let rtxn = env.read_txn()?;
    let db = env.open_database::<RawBytes, RawBytes>(&rtxn, None)?;
    rtxn.commit()?;
    let db = db.ok_or_else(|| CacheError::Corrupted("missing main database".to_string()))?;
    Ok(Store { env, db })
}

fn open_read_write(path: &Path, map_size: usize) -> Result<Store, CacheError> {
    let env = open_env(path, map_size, false)?;
    let mut wtxn = env.write_txn()?;
    let db = env.create_database::<RawBytes, RawBytes>(&mut wtxn, None)?;
    wtxn.commit()?;
    Ok(Store { env, db })
}

fn is_repairable(error: &CacheError) -> bool {
    matches!(
        error,
        CacheError::Store(heed::Error::Io(_)) | CacheError::Store(heed::Error::Mdb(_))
    )
}

fn open_read_write_with_repair(path: &Path, map_size: usize) -> Result<(Store, OpenResult), CacheError> {
    let first = match open_read_write(path, map_size) {
        Ok(store) => return Ok((store, OpenResult::Success)),
        Err(e) if is_repairable(&e) => e,
        Err(e) => return Err(e),
    };
    warn!(path = %path.display(), error = %first, "Disk cache failed to open, attempting repair");

    let lock_file = path.join(LOCK_FILE);
    if lock_file.exists() {
        if let Err(e) = fs::remove_file(&lock_file) {
            warn!(path = %lock_file.display(), error = %e, "Failed to remove stale lock file");
        }
        if let Ok(store) = open_read_write(path, map_size) {
            info!(path = %path.display(), "Disk cache repaired");
            return Ok((store, OpenResult::Repaired));
        }
    }

    warn!(path = %path.display(), "Repair failed, recreating disk cache");
    fs::remove_dir_all(path)?;
    fs::create_dir_all(path)?;
    match open_read_write(path, map_size) {
        Ok(store) => {
            info!(path = %path.display(), "Disk cache recreated");
            Ok((store, OpenResult::Repaired))
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Disk cache could not be recreated");
            Err(e)
        }
    }
}

/// Removes every directory in `data_path` other than `keep`.
fn remove_other_generations(data_path: &Path, keep: &Path) {
    let entries = match fs::read_dir(data_path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %data_path.display(), error = %e, "Failed to list cache directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let candidate = entry.path();
        if candidate == keep || !candidate.is_dir() {
            continue;
        }
        match fs::remove_dir_all(&candidate) {
            Ok(()) => info!(path = %candidate.display(), "Removed stale cache generation"),
            Err(e) => warn!(path = %candidate.display(), error = %e, "Failed to remove stale cache generation"),
        }
    }
}

fn scan_payload_bytes(store: &Store) -> Result<u64, CacheError> {
    let rtxn = store.env.read_txn()?;
    let mut total = 0u64;
    for item in store.db.iter(&rtxn)? {
        let (key, value) = item?;
        total += (key.len() + value.len()) as u64;
    }
    rtxn.commit()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir, max: Option<u64>) -> DiskCache {
        let settings = DiskCacheSettings::new(dir.path()).with_max_disk_storage(max);
        DiskCache::open(settings).unwrap().0
    }

    #[test]
    fn test_put_get_remove() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, None);

        cache.put("a", b"one").unwrap();
        assert_eq!(cache.get("a").unwrap(), Some(b"one".to_vec()));
        assert!(cache.contains("a"));

        assert!(cache.remove("a").unwrap());
        assert!(!cache.remove("a").unwrap());
        assert_eq!(cache.get("a").unwrap(), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_remove_keys_with_prefix() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, None);
        for key in ["cat::l1::a", "cat::l1::b", "cat::l2::a", "other"] {
            cache.put(key, b"v").unwrap();
        }

        assert_eq!(cache.remove_keys_with_prefix("cat::l1::").unwrap(), 2);
        assert_eq!(cache.keys_with_prefix("cat::").unwrap(), vec!["cat::l2::a"]);
        assert!(cache.contains("other"));

        cache.remove_keys_with_prefix("").unwrap();
        assert_eq!(cache.entry_count().unwrap(), 0);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_key_too_large() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, None);
        let key = "k".repeat(MAX_KEY_SIZE + 1);
        assert!(matches!(
            cache.put(&key, b"v"),
            Err(CacheError::KeyTooLarge { size: 512, max: 511 })
        ));
        assert_eq!(cache.get(&key).unwrap(), None);
    }

    #[test]
    fn test_quota_rejects_without_corrupting() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Some(16));

        cache.put("key1", b"0123456789ab").unwrap(); // 16 bytes
        assert!(matches!(cache.put("key2", b"x"), Err(CacheError::QuotaExceeded { .. })));
        assert_eq!(cache.get("key1").unwrap(), Some(b"0123456789ab".to_vec()));
        assert_eq!(cache.get("key2").unwrap(), None);

        cache.remove("key1").unwrap();
        cache.put("key2", b"x").unwrap();
    }

    #[test]
    fn test_quota_estimate_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir, None);
            cache.put("abc", b"12345").unwrap();
            cache.put("abc", b"12").unwrap();
            assert_eq!(cache.size(), 5);
        }
        let cache = open(&dir, None);
        assert_eq!(cache.size(), 5);
        assert_eq!(cache.get("abc").unwrap(), Some(b"12".to_vec()));
    }

    #[test]
    fn test_versioned_path_removes_other_generations() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("v1")).unwrap();
        fs::write(dir.path().join("marker.txt"), b"keep").unwrap();

        let settings = DiskCacheSettings::new(dir.path()).with_versioned_path(dir.path().join("v2"));
        let (cache, result) = DiskCache::open(settings).unwrap();

        assert_eq!(result, OpenResult::Success);
        assert_eq!(cache.path(), dir.path().join("v2"));
        assert!(!dir.path().join("v1").exists());
        assert!(dir.path().join("marker.txt").exists());
    }

    #[test]
    fn test_corrupted_store_is_recreated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("data.mdb"), vec![0xAB; 4096]).unwrap();

        let (cache, result) = DiskCache::open(DiskCacheSettings::new(&path)).unwrap();
        assert_eq!(result, OpenResult::Repaired);
        cache.put("k", b"v").unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir, None);
            cache.put("k", b"v").unwrap();
        }
        let settings = DiskCacheSettings::new(dir.path()).read_only(true);
        let (cache, _) = DiskCache::open(settings).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(matches!(cache.put("k", b"w"), Err(CacheError::ReadOnly)));
    }

    #[test]
    fn test_read_only_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let settings = DiskCacheSettings::new(dir.path().join("absent")).read_only(true);
        assert!(DiskCache::open(settings).is_err());
    }

    #[test]
    fn test_closed_store_reports_not_open() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, None);
        cache.close();
        assert!(!cache.is_open());
        assert!(matches!(cache.get("k"), Err(CacheError::NotOpen)));
    }

    #[test]
    fn test_effective_map_size() {
        let settings = DiskCacheSettings::new("/tmp/x").with_max_disk_storage(Some(1));
        assert_eq!(settings.effective_map_size(), MIN_MAP_SIZE);

        let settings = DiskCacheSettings::new("/tmp/x").with_max_disk_storage(Some(100 * 1024 * 1024));
        let size = settings.effective_map_size();
        assert!(size >= 200 * 1024 * 1024);
        assert_eq!(size % MAP_SIZE_GRANULARITY, 0);
    }
}

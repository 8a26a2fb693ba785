//! Configuration structs, one per INI section.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::CatalogApi;
use crate::cache::{CacheSettings, DEFAULT_MEMORY_CACHE_SIZE};
use crate::client::{ClientSettings, DEFAULT_TIMEOUT};
use crate::thread::Priority;

/// Name of the cache directory below the platform cache dir.
pub const DEFAULT_CACHE_DIR_NAME: &str = "tilecatalog";

/// Default `[prefetch] priority`.
pub const DEFAULT_PREFETCH_PRIORITY: Priority = Priority::Low;

/// Default cache root: `<platform cache dir>/tilecatalog`.
pub fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_CACHE_DIR_NAME)
}

/// Default worker count: available parallelism, at least one.
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub directory: PathBuf,
    /// Cache generation; the store lives in `directory/<version>`.
    pub version: Option<String>,
    /// Disk quota in bytes. `None` is unlimited.
    pub disk_size: Option<u64>,
    pub memory_size: u64,
    pub read_only: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
            version: None,
            disk_size: None,
            memory_size: DEFAULT_MEMORY_CACHE_SIZE,
            read_only: false,
        }
    }
}

impl CacheConfig {
    /// Directory holding the active store generation.
    pub fn store_directory(&self) -> PathBuf {
        match &self.version {
            Some(version) => self.directory.join(version),
            None => self.directory.clone(),
        }
    }

    pub fn to_cache_settings(&self) -> CacheSettings {
        CacheSettings {
            disk_path_mutable: Some(self.directory.clone()),
            cache_version: self.version.clone(),
            max_disk_storage: self.disk_size,
            max_memory_cache_size: self.memory_size,
            read_only: self.read_only,
            ..CacheSettings::default()
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: default_thread_count(),
        }
    }
}

/// `[network]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// `[prefetch]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchConfig {
    pub priority: Priority,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PREFETCH_PRIORITY,
        }
    }
}

/// Complete configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub network: NetworkConfig,
    pub prefetch: PrefetchConfig,
}

impl CatalogConfig {
    /// Client settings carrying the configured timeout.
    ///
    /// Cache and scheduler are built separately from [`CacheConfig`] and
    /// [`SchedulerConfig`] and attached by the caller.
    pub fn client_settings(&self, api: Arc<dyn CatalogApi>) -> ClientSettings {
        ClientSettings::new(api).with_timeout(self.network.timeout)
    }
}

//! Two-tier cache with a persistent LMDB store.
//!
//! - [`KeyValueCache`]: the interface repositories use
//! - [`DefaultCache`]: memory tier in front of [`DiskCache`]
//! - [`DiskCache`]: persistent store with repair and generation cleanup
//! - [`QuotaEnvironment`]: byte quota of a persistent store

mod default;
mod entry;
mod memory;
mod quota;
mod store;
mod traits;

pub use default::{CacheSettings, CacheStats, DefaultCache, DEFAULT_MEMORY_CACHE_SIZE};
pub use entry::CacheEntry;
pub use memory::MemoryCache;
pub use quota::QuotaEnvironment;
pub use store::{DiskCache, DiskCacheSettings, OpenResult, MAX_KEY_SIZE};
pub use traits::{CacheError, KeyValueCache};

//! Core cache interface and errors.
//!
//! The repositories speak to the cache through [`KeyValueCache`] only:
//!
//! - **String keys**: deterministic, human-readable, prefix-structured
//!   (`{catalog}::{layer}::...`) so whole subtrees can be removed at once
//! - **Byte values**: the repositories serialize, the cache stores
//! - **Expiry per entry**: expired entries read as absent
//! - **Dyn-compatible**: shared as `Arc<dyn KeyValueCache>`

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::error::{ApiError, ErrorCode};

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The disk quota has been reached; existing entries are untouched.
    #[error("Disk quota exceeded: {used} of {max} bytes used")]
    QuotaExceeded { used: u64, max: u64 },

    /// Key exceeds the storage engine's key size limit.
    #[error("Key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// The store was opened read-only.
    #[error("Cache is read-only")]
    ReadOnly,

    /// The store has been closed.
    #[error("Cache is not open")]
    NotOpen,

    /// Storage engine failure.
    #[error("Store error: {0}")]
    Store(#[from] heed::Error),

    /// I/O error while preparing the store directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored entry could not be decoded.
    #[error("Corrupted entry: {0}")]
    Corrupted(String),
}

impl From<CacheError> for ApiError {
    fn from(error: CacheError) -> Self {
        ApiError::new(ErrorCode::CacheIO, error.to_string())
    }
}

/// Key-value cache shared by all repositories of a client.
///
/// Implementations handle their own locking; callers never synchronise.
pub trait KeyValueCache: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// With `expiry` set, the entry reads as absent once that much time
    /// has passed.
    fn put(&self, key: &str, value: Bytes, expiry: Option<Duration>) -> Result<(), CacheError>;

    /// Returns the value for `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// True if `key` holds a live entry.
    fn contains(&self, key: &str) -> bool;

    /// Removes `key`. Returns whether anything was removed.
    fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every key starting with `prefix`. An empty prefix removes all.
    fn remove_keys_with_prefix(&self, prefix: &str) -> Result<(), CacheError>;

    /// Removes everything.
    fn clear(&self) -> Result<(), CacheError>;
}

//! Disk quota accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use super::traits::CacheError;

/// Running estimate of the payload bytes held by a store.
///
/// The estimate counts key and value bytes. Writes are refused once it has
/// reached the maximum; nothing is evicted implicitly.
#[derive(Debug)]
pub struct QuotaEnvironment {
    max_bytes: Option<u64>,
    used_bytes: AtomicU64,
}

impl QuotaEnvironment {
    /// `max_bytes = None` disables enforcement but keeps the estimate.
    pub fn new(max_bytes: Option<u64>, initial_bytes: u64) -> Self {
        Self {
            max_bytes,
            used_bytes: AtomicU64::new(initial_bytes),
        }
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Acquire)
    }

    /// Fails with `QuotaExceeded` when the estimate has reached the maximum.
    pub fn check_write(&self) -> Result<(), CacheError> {
        match self.max_bytes {
            Some(max) => {
                let used = self.used_bytes();
                if used >= max {
                    Err(CacheError::QuotaExceeded { used, max })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    /// Applies a committed write that added `added` and replaced `removed` bytes.
    pub fn record_write(&self, added: u64, removed: u64) {
        self.used_bytes.fetch_add(added, Ordering::AcqRel);
        self.record_removed(removed);
    }

    pub fn record_removed(&self, removed: u64) {
        if removed == 0 {
            return;
        }
        let _ = self
            .used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(removed))
            });
    }

    pub fn reset(&self) {
        self.used_bytes.store(0, Ordering::Release);
    }
}

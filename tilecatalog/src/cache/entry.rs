//! On-disk envelope of a cache entry.
//!
//! ```text
//! [0x00] payload...                        no expiry
//! [0x01] [expiry: i64 BE unix millis] payload...
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::traits::CacheError;

const TAG_NO_EXPIRY: u8 = 0;
const TAG_EXPIRY: u8 = 1;
const EXPIRY_LEN: usize = 8;

/// A decoded cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Expiry as unix milliseconds.
    pub expires_at: Option<i64>,
    pub payload: Bytes,
}

impl CacheEntry {
    pub fn new(payload: Bytes, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            expires_at: expires_at.map(|at| at.timestamp_millis()),
            payload,
        }
    }

    /// An entry is expired once its expiry is not in the future.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now.timestamp_millis())
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(1 + EXPIRY_LEN + self.payload.len());
        match self.expires_at {
            Some(expires_at) => {
                buffer.put_u8(TAG_EXPIRY);
                buffer.put_i64(expires_at);
            }
            None => buffer.put_u8(TAG_NO_EXPIRY),
        }
        buffer.put_slice(&self.payload);
        buffer.freeze()
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CacheError> {
        match raw.split_first() {
            Some((&TAG_NO_EXPIRY, payload)) => Ok(Self {
                expires_at: None,
                payload: Bytes::copy_from_slice(payload),
            }),
            Some((&TAG_EXPIRY, rest)) if rest.len() >= EXPIRY_LEN => {
                let (expiry, payload) = rest.split_at(EXPIRY_LEN);
                let mut be = [0u8; EXPIRY_LEN];
                be.copy_from_slice(expiry);
                Ok(Self {
                    expires_at: Some(i64::from_be_bytes(be)),
                    payload: Bytes::copy_from_slice(payload),
                })
            }
            Some((tag, _)) => Err(CacheError::Corrupted(format!("unknown entry tag {}", tag))),
            None => Err(CacheError::Corrupted("empty entry".to_string())),
        }
    }
}

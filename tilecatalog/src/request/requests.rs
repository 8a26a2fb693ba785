//! Request types and their deterministic coordination keys.
//!
//! A request key identifies "the same request" for single-flight
//! coalescing: `{layer}[{ids}]@{version}${billing_tag}^{fetch_option}`,
//! with the version and billing parts omitted when unset.

use std::fmt::Write as _;

use super::fetch_option::FetchOption;
use crate::error::{ApiError, ApiResponse};
use crate::geo::{TileKey, MAX_LEVEL};
use crate::thread::Priority;

fn append_common(key: &mut String, version: Option<i64>, billing_tag: Option<&str>, fetch: FetchOption) {
    if let Some(version) = version {
        let _ = write!(key, "@{}", version);
    }
    if let Some(billing_tag) = billing_tag {
        let _ = write!(key, "${}", billing_tag);
    }
    let _ = write!(key, "^{}", fetch);
}

/// Request for the catalog configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRequest {
    pub billing_tag: Option<String>,
    pub fetch_option: FetchOption,
}

impl CatalogRequest {
    pub fn with_fetch_option(mut self, fetch_option: FetchOption) -> Self {
        self.fetch_option = fetch_option;
        self
    }

    pub fn with_billing_tag(mut self, billing_tag: impl Into<String>) -> Self {
        self.billing_tag = Some(billing_tag.into());
        self
    }

    pub fn create_key(&self, catalog: &str) -> String {
        let mut key = format!("{}[catalog]", catalog);
        append_common(&mut key, None, self.billing_tag.as_deref(), self.fetch_option);
        key
    }
}

/// Request for the latest catalog version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogVersionRequest {
    pub billing_tag: Option<String>,
    pub fetch_option: FetchOption,
}

impl CatalogVersionRequest {
    pub fn with_fetch_option(mut self, fetch_option: FetchOption) -> Self {
        self.fetch_option = fetch_option;
        self
    }

    pub fn with_billing_tag(mut self, billing_tag: impl Into<String>) -> Self {
        self.billing_tag = Some(billing_tag.into());
        self
    }

    pub fn create_key(&self, catalog: &str) -> String {
        let mut key = format!("{}[latestVersion]", catalog);
        append_common(&mut key, None, self.billing_tag.as_deref(), self.fetch_option);
        key
    }
}

/// Request for the data of one partition.
///
/// Addressed either by partition id (resolved through partition metadata)
/// or directly by data handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRequest {
    pub partition_id: Option<String>,
    pub data_handle: Option<String>,
    pub version: Option<i64>,
    pub billing_tag: Option<String>,
    pub fetch_option: FetchOption,
    pub priority: Priority,
}

impl DataRequest {
    pub fn with_partition_id(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn with_data_handle(mut self, data_handle: impl Into<String>) -> Self {
        self.data_handle = Some(data_handle.into());
        self
    }

    pub fn with_version(mut self, version: Option<i64>) -> Self {
        self.version = version;
        self
    }

    pub fn with_billing_tag(mut self, billing_tag: impl Into<String>) -> Self {
        self.billing_tag = Some(billing_tag.into());
        self
    }

    pub fn with_fetch_option(mut self, fetch_option: FetchOption) -> Self {
        self.fetch_option = fetch_option;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn create_key(&self, layer: &str) -> String {
        let target = self
            .partition_id
            .as_deref()
            .or(self.data_handle.as_deref())
            .unwrap_or_default();
        let mut key = format!("{}[{}]", layer, target);
        append_common(&mut key, self.version, self.billing_tag.as_deref(), self.fetch_option);
        key
    }
}

/// Request for partition metadata of a layer, optionally restricted to ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionsRequest {
    pub partition_ids: Vec<String>,
    pub version: Option<i64>,
    pub billing_tag: Option<String>,
    pub fetch_option: FetchOption,
    pub priority: Priority,
}

impl PartitionsRequest {
    pub fn with_partition_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: Option<i64>) -> Self {
        self.version = version;
        self
    }

    pub fn with_billing_tag(mut self, billing_tag: impl Into<String>) -> Self {
        self.billing_tag = Some(billing_tag.into());
        self
    }

    pub fn with_fetch_option(mut self, fetch_option: FetchOption) -> Self {
        self.fetch_option = fetch_option;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn create_key(&self, layer: &str) -> String {
        let mut key = format!("{}[{}]", layer, self.partition_ids.join(","));
        append_common(&mut key, self.version, self.billing_tag.as_deref(), self.fetch_option);
        key
    }
}

/// Request to prefetch every tile below `tile_keys` within `[min_level, max_level]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchTilesRequest {
    pub tile_keys: Vec<TileKey>,
    pub min_level: u32,
    pub max_level: u32,
    pub version: Option<i64>,
    pub billing_tag: Option<String>,
    pub priority: Priority,
}

impl PrefetchTilesRequest {
    pub fn new(tile_keys: Vec<TileKey>, min_level: u32, max_level: u32) -> Self {
        Self {
            tile_keys,
            min_level,
            max_level,
            priority: Priority::Low,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: Option<i64>) -> Self {
        self.version = version;
        self
    }

    pub fn with_billing_tag(mut self, billing_tag: impl Into<String>) -> Self {
        self.billing_tag = Some(billing_tag.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Rejects empty tile sets and invalid level ranges.
    pub fn validate(&self) -> ApiResponse<()> {
        if self.tile_keys.is_empty() {
            return Err(ApiError::invalid_argument("Empty tile key list"));
        }
        if self.min_level > self.max_level {
            return Err(ApiError::invalid_argument(format!(
                "Invalid level range: min {} > max {}",
                self.min_level, self.max_level
            )));
        }
        if self.max_level > MAX_LEVEL {
            return Err(ApiError::invalid_argument(format!(
                "Invalid level range: max {} exceeds {}",
                self.max_level, MAX_LEVEL
            )));
        }
        Ok(())
    }

    pub fn create_key(&self, layer: &str) -> String {
        let tiles: Vec<String> = self.tile_keys.iter().map(TileKey::to_here_tile).collect();
        let mut key = format!(
            "{}[{}]<{},{}>",
            layer,
            tiles.join(","),
            self.min_level,
            self.max_level
        );
        append_common(&mut key, self.version, self.billing_tag.as_deref(), FetchOption::Default);
        key
    }
}

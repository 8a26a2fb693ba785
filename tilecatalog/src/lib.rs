//! TileCatalog - cached, cancellable access to tiled geospatial catalogs
//!
//! This library provides the read side of a catalog client: layer data and
//! partition metadata served through a two-tier cache, identical concurrent
//! requests coalesced into one backend call, and bulk quad-tree prefetch
//! running on a priority thread pool.
//!
//! # High-Level API
//!
//! [`layer_client::LayerClient`] is the entry point:
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilecatalog::client::ClientSettings;
//! use tilecatalog::layer_client::LayerClient;
//! use tilecatalog::model::LayerType;
//! use tilecatalog::request::DataRequest;
//!
//! let settings = ClientSettings::new(api).with_task_scheduler(scheduler);
//! let client = LayerClient::new("hrn:catalog", "imagery", LayerType::Versioned, settings);
//!
//! let bytes = client
//!     .get_data_future(DataRequest::default().with_partition_id("23618403"))
//!     .wait()?;
//! ```
//!
//! The backend is any [`api::CatalogApi`] implementation; the `testing`
//! module (behind the `testing` feature) carries a scripted in-process one.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod geo;
pub mod layer_client;
pub mod logging;
pub mod model;
pub mod prefetch;
pub mod repository;
pub mod request;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod thread;

/// Version of the library and CLI, taken from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{ApiError, ApiResponse, ErrorCode};
pub use geo::TileKey;
pub use layer_client::LayerClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}

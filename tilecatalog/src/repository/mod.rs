//! Repositories: the request logic between clients and the backend.
//!
//! Cache repositories map domain objects to cache keys (see [`keys`]).
//! Backend repositories implement the fetch-option policy on top of them:
//! probe the cache, otherwise call the backend through [`blocking_call`],
//! write successful responses back and invalidate on 403.
//!
//! Everything here is synchronous and runs on scheduler threads.

mod blocking;
mod catalog;
mod catalog_cache;
mod data;
mod data_cache;
pub mod keys;
mod partitions;
mod partitions_cache;
mod prefetch_tiles;

pub use blocking::blocking_call;
pub use catalog::CatalogRepository;
pub use catalog_cache::CatalogCacheRepository;
pub use data::DataRepository;
pub use data_cache::DataCacheRepository;
pub use partitions::PartitionsRepository;
pub use partitions_cache::PartitionsCacheRepository;
pub use prefetch_tiles::{
    child_tiles_at_level, effective_tile_keys, filter_skipped_tiles, PrefetchTilesRepository,
    SubQuadsRequest, SubTilesResult, MAX_QUERY_DEPTH,
};

//! Request types accepted by the client layer.

mod fetch_option;
mod requests;

pub use fetch_option::FetchOption;
pub use requests::{
    CatalogRequest, CatalogVersionRequest, DataRequest, PartitionsRequest, PrefetchTilesRequest,
};

//! Geospatial addressing.

mod tile_key;

pub use tile_key::{TileKey, MAX_LEVEL};

//! Domain model of catalog responses.
//!
//! Every type round-trips through `serde_json`, which is also the encoding
//! used for entries in the cache.

mod catalog;
mod partition;
mod quad_tree;

pub use catalog::{Catalog, Layer, LayerType};
pub use partition::{Partition, Partitions};
pub use quad_tree::{ParentQuad, QuadTreeIndex, SubQuad};

//! Cache key layout.
//!
//! ```text
//! {hrn}::catalog
//! {hrn}::latestVersion
//! {hrn}::{layer}::{partition}::{version|none}::partition
//! {hrn}::{layer}::{version|none}::partitions
//! {hrn}::{layer}::{data_handle}::Data
//! {hrn}::{layer}::{tile}::{version|none}::{depth}::quadtree
//! ```
//!
//! Everything of a layer shares the `{hrn}::{layer}::` prefix, so a layer
//! is cleared with a single prefix removal.

use crate::geo::TileKey;

fn version_part(version: Option<i64>) -> String {
    version.map_or_else(|| "none".to_string(), |v| v.to_string())
}

pub fn catalog_prefix(hrn: &str) -> String {
    format!("{}::", hrn)
}

pub fn layer_prefix(hrn: &str, layer: &str) -> String {
    format!("{}::{}::", hrn, layer)
}

pub fn catalog_key(hrn: &str) -> String {
    format!("{}::catalog", hrn)
}

pub fn latest_version_key(hrn: &str) -> String {
    format!("{}::latestVersion", hrn)
}

pub fn partition_key(hrn: &str, layer: &str, partition: &str, version: Option<i64>) -> String {
    format!(
        "{}::{}::{}::{}::partition",
        hrn,
        layer,
        partition,
        version_part(version)
    )
}

pub fn partitions_key(hrn: &str, layer: &str, version: Option<i64>) -> String {
    format!("{}::{}::{}::partitions", hrn, layer, version_part(version))
}

pub fn data_key(hrn: &str, layer: &str, data_handle: &str) -> String {
    format!("{}::{}::{}::Data", hrn, layer, data_handle)
}

pub fn quad_tree_key(hrn: &str, layer: &str, root: &TileKey, version: Option<i64>, depth: u32) -> String {
    format!(
        "{}::{}::{}::{}::{}::quadtree",
        hrn,
        layer,
        root.to_here_tile(),
        version_part(version),
        depth
    )
}

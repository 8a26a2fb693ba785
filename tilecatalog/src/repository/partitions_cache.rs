//! Cached partition metadata and quad-tree indexes.
//!
//! A full partition listing is stored as the list of its partition ids under
//! the layer's partitions key, with every partition stored individually.
//! Reading the list back requires every listed partition to still be present,
//! so clearing a single partition invalidates the listing too.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::catalog_cache::{get_json, put_json};
use super::keys;
use crate::cache::{CacheError, KeyValueCache};
use crate::geo::TileKey;
use crate::model::{Partition, Partitions, QuadTreeIndex};

#[derive(Clone)]
pub struct PartitionsCacheRepository {
    hrn: String,
    cache: Arc<dyn KeyValueCache>,
    default_expiry: Option<Duration>,
}

impl PartitionsCacheRepository {
    pub fn new(hrn: impl Into<String>, cache: Arc<dyn KeyValueCache>, default_expiry: Option<Duration>) -> Self {
        Self {
            hrn: hrn.into(),
            cache,
            default_expiry,
        }
    }

    /// Stores `partitions` individually. With `layer_metadata` set the set is
    /// the complete listing of the layer and is also stored as such.
    pub fn put(
        &self,
        layer: &str,
        version: Option<i64>,
        partitions: &Partitions,
        expiry: Option<Duration>,
        layer_metadata: bool,
    ) {
        let expiry = expiry.or(self.default_expiry);
        for partition in &partitions.partitions {
            let key = keys::partition_key(&self.hrn, layer, &partition.partition, version);
            put_json(self.cache.as_ref(), &key, partition, expiry);
        }
        if layer_metadata {
            let ids: Vec<&str> = partitions.partitions.iter().map(|p| p.partition.as_str()).collect();
            let key = keys::partitions_key(&self.hrn, layer, version);
            put_json(self.cache.as_ref(), &key, &ids, expiry);
        }
        debug!(layer = %layer, count = partitions.len(), listing = layer_metadata, "Cached partitions");
    }

    /// Returns the complete listing of a layer, if cached.
    pub fn get(&self, layer: &str, version: Option<i64>) -> Option<Partitions> {
        let key = keys::partitions_key(&self.hrn, layer, version);
        let ids: Vec<String> = get_json(self.cache.as_ref(), &key)?;
        let mut partitions = Vec::with_capacity(ids.len());
        for id in &ids {
            partitions.push(self.get_partition(layer, id, version)?);
        }
        Some(Partitions::new(partitions))
    }

    /// Returns the cached subset of `ids`, in request order.
    pub fn get_by_ids(&self, layer: &str, version: Option<i64>, ids: &[String]) -> Partitions {
        ids.iter()
            .filter_map(|id| self.get_partition(layer, id, version))
            .collect::<Vec<_>>()
            .into()
    }

    fn get_partition(&self, layer: &str, id: &str, version: Option<i64>) -> Option<Partition> {
        let key = keys::partition_key(&self.hrn, layer, id, version);
        get_json(self.cache.as_ref(), &key)
    }

    /// Removes everything cached for `layer`.
    pub fn clear(&self, layer: &str) -> Result<(), CacheError> {
        debug!(layer = %layer, "Clearing layer cache");
        self.cache.remove_keys_with_prefix(&keys::layer_prefix(&self.hrn, layer))
    }

    /// Removes the metadata of `ids` together with the blobs they reference.
    pub fn clear_partitions(&self, layer: &str, version: Option<i64>, ids: &[String]) -> Result<(), CacheError> {
        for partition in self.get_by_ids(layer, version, ids).partitions {
            if let Some(handle) = &partition.data_handle {
                self.cache.remove(&keys::data_key(&self.hrn, layer, handle))?;
            }
        }
        for id in ids {
            self.cache.remove(&keys::partition_key(&self.hrn, layer, id, version))?;
        }
        Ok(())
    }

    /// Removes one partition's metadata and returns what was stored, if anything.
    pub fn clear_partition_metadata(
        &self,
        layer: &str,
        version: Option<i64>,
        partition_id: &str,
    ) -> Result<Option<Partition>, CacheError> {
        let partition = self.get_partition(layer, partition_id, version);
        self.cache
            .remove(&keys::partition_key(&self.hrn, layer, partition_id, version))?;
        Ok(partition)
    }

    pub fn put_quad_tree(
        &self,
        layer: &str,
        version: Option<i64>,
        index: &QuadTreeIndex,
        expiry: Option<Duration>,
    ) {
        let key = keys::quad_tree_key(&self.hrn, layer, &index.root, version, index.depth);
        put_json(self.cache.as_ref(), &key, index, expiry.or(self.default_expiry));
    }

    pub fn clear_quad_tree(
        &self,
        layer: &str,
        root: &TileKey,
        version: Option<i64>,
        depth: u32,
    ) -> Result<bool, CacheError> {
        self.cache
            .remove(&keys::quad_tree_key(&self.hrn, layer, root, version, depth))
    }

    pub fn get_quad_tree(
        &self,
        layer: &str,
        root: &TileKey,
        version: Option<i64>,
        depth: u32,
    ) -> Option<QuadTreeIndex> {
        let key = keys::quad_tree_key(&self.hrn, layer, root, version, depth);
        get_json(self.cache.as_ref(), &key)
    }
}

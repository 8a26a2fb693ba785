//! Quad-tree index returned by sub-tree metadata queries.

use serde::{Deserialize, Serialize};

use super::partition::Partition;
use crate::geo::TileKey;

/// A tile at or below the queried root, addressed relative to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuad {
    /// Relative quad key: `"1"` is the root, `"4"`..`"7"` its children.
    pub sub_quad_key: String,
    pub data_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_size: Option<u64>,
}

/// An ancestor of the queried root that carries data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentQuad {
    pub partition: String,
    pub data_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_size: Option<u64>,
}

/// Index of a sub-tree of `depth` levels below `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadTreeIndex {
    pub root: TileKey,
    pub depth: u32,
    #[serde(default)]
    pub sub_quads: Vec<SubQuad>,
    #[serde(default)]
    pub parent_quads: Vec<ParentQuad>,
}

impl QuadTreeIndex {
    pub fn new(root: TileKey, depth: u32) -> Self {
        Self {
            root,
            depth,
            sub_quads: Vec::new(),
            parent_quads: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sub_quads.is_empty() && self.parent_quads.is_empty()
    }

    /// Resolves every entry to an absolute partition.
    ///
    /// Sub quads whose relative key does not resolve are skipped.
    pub fn partitions(&self) -> Vec<Partition> {
        let subs = self.sub_quads.iter().filter_map(|quad| {
            let tile = self.root.added_sub_here_tile(&quad.sub_quad_key)?;
            Some(Partition {
                partition: tile.to_here_tile(),
                data_handle: Some(quad.data_handle.clone()),
                version: quad.version,
                data_size: quad.data_size,
                checksum: None,
            })
        });
        let parents = self.parent_quads.iter().map(|quad| Partition {
            partition: quad.partition.clone(),
            data_handle: Some(quad.data_handle.clone()),
            version: quad.version,
            data_size: quad.data_size,
            checksum: None,
        });
        subs.chain(parents).collect()
    }

    /// Looks up the partition for `tile`, which must be inside the index.
    pub fn find(&self, tile: &TileKey) -> Option<Partition> {
        let tile_string = tile.to_here_tile();
        self.partitions()
            .into_iter()
            .find(|partition| partition.partition == tile_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitions_resolve_relative_keys() {
        let root = TileKey::from_row_column_level(0, 1, 1).unwrap();
        let mut index = QuadTreeIndex::new(root, 1);
        index.sub_quads.push(SubQuad {
            sub_quad_key: "1".to_string(),
            data_handle: "h-root".to_string(),
            version: Some(3),
            data_size: Some(10),
        });
        index.sub_quads.push(SubQuad {
            sub_quad_key: "5".to_string(),
            data_handle: "h-child".to_string(),
            version: Some(3),
            data_size: None,
        });
        index.parent_quads.push(ParentQuad {
            partition: "1".to_string(),
            data_handle: "h-world".to_string(),
            version: Some(2),
            data_size: None,
        });

        let partitions = index.partitions();
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].partition, root.to_here_tile());
        assert_eq!(partitions[1].partition, root.child(1).unwrap().to_here_tile());
        assert_eq!(partitions[2].partition, "1");

        let child = root.child(1).unwrap();
        assert_eq!(index.find(&child).unwrap().data_handle.as_deref(), Some("h-child"));
        assert!(index.find(&root.child(2).unwrap()).is_none());
    }
}

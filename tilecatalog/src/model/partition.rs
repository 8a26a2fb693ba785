//! Partition metadata.

use serde::{Deserialize, Serialize};

/// Metadata of one partition: where its data lives and which version wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Partition {
    pub partition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Partition {
    pub fn new(partition: impl Into<String>, data_handle: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            data_handle: Some(data_handle.into()),
            ..Self::default()
        }
    }
}

/// A list of partitions, as returned by metadata queries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Partitions {
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl Partitions {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }

    pub fn find(&self, partition_id: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.partition == partition_id)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl From<Vec<Partition>> for Partitions {
    fn from(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }
}

//! Catalog and layer metadata.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Storage semantics of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    /// Immutable history; every read is pinned to a catalog version.
    #[default]
    Versioned,
    /// Latest value only; reads carry no version and expire by TTL.
    Volatile,
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Versioned => f.write_str("versioned"),
            Self::Volatile => f.write_str("volatile"),
        }
    }
}

impl FromStr for LayerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "versioned" => Ok(Self::Versioned),
            "volatile" => Ok(Self::Volatile),
            other => Err(format!("unknown layer type '{}'", other)),
        }
    }
}

/// Metadata of one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    #[serde(default)]
    pub layer_type: LayerType,
    /// Time-to-live for cached data of volatile layers, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl Layer {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }
}

/// Catalog configuration as returned by the catalog endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub hrn: String,
    pub version: i64,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

impl Catalog {
    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }
}

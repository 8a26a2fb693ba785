//! Cache/network policy of a request.

use std::fmt;
use std::str::FromStr;

/// Selects between cache and network for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchOption {
    /// Cache first, network on miss. For the latest catalog version:
    /// network first, falling back to the cached version on failure.
    #[default]
    Default,
    /// Always the network; the response still updates the cache.
    OnlineOnly,
    /// Never the network; a miss is `NotFound`.
    CacheOnly,
    /// Cache first, network on miss.
    OnlineIfNotFound,
}

impl FetchOption {
    /// True when the cache should be probed before the network.
    pub fn reads_cache(self) -> bool {
        !matches!(self, Self::OnlineOnly)
    }

    /// True when a cache miss may go to the network.
    pub fn allows_network(self) -> bool {
        !matches!(self, Self::CacheOnly)
    }
}

impl fmt::Display for FetchOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Default => "Default",
            Self::OnlineOnly => "OnlineOnly",
            Self::CacheOnly => "CacheOnly",
            Self::OnlineIfNotFound => "OnlineIfNotFound",
        };
        f.write_str(name)
    }
}

impl FromStr for FetchOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "default" => Ok(Self::Default),
            "onlineonly" => Ok(Self::OnlineOnly),
            "cacheonly" => Ok(Self::CacheOnly),
            "onlineifnotfound" => Ok(Self::OnlineIfNotFound),
            other => Err(format!("unknown fetch option '{}'", other)),
        }
    }
}

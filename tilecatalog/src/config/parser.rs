//! INI parsing: `Ini` → [`CatalogConfig`].
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::time::Duration;

use ini::Ini;

use super::file::ConfigFileError;
use super::settings::CatalogConfig;
use super::size::{parse_limit, parse_size};
use crate::thread::Priority;

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Overlays the values found in `ini` on top of the defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<CatalogConfig, ConfigFileError> {
    let mut config = CatalogConfig::default();

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("version") {
            let v = v.trim();
            if v.contains('/') || v.contains('\\') || v == "." || v == ".." {
                return Err(invalid("cache", "version", v, "must be a plain directory name"));
            }
            config.cache.version = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = section.get("disk_size") {
            config.cache.disk_size = parse_limit(v).map_err(|_| {
                invalid(
                    "cache",
                    "disk_size",
                    v,
                    "expected format like '20GB', '512MB' or 'unlimited'",
                )
            })?;
        }
        if let Some(v) = section.get("memory_size") {
            config.cache.memory_size = parse_size(v).map_err(|_| {
                invalid(
                    "cache",
                    "memory_size",
                    v,
                    "expected format like '64MB' or '1GB'",
                )
            })?;
        }
        if let Some(v) = section.get("read_only") {
            config.cache.read_only = parse_bool(v)
                .ok_or_else(|| invalid("cache", "read_only", v, "expected true or false"))?;
        }
    }

    // [scheduler]
    if let Some(section) = ini.section(Some("scheduler")) {
        if let Some(v) = section.get("threads") {
            let threads: usize = v
                .trim()
                .parse()
                .map_err(|_| invalid("scheduler", "threads", v, "expected a positive integer"))?;
            if threads == 0 {
                return Err(invalid("scheduler", "threads", v, "must be at least 1"));
            }
            config.scheduler.threads = threads;
        }
    }

    // [network]
    if let Some(section) = ini.section(Some("network")) {
        if let Some(v) = section.get("timeout") {
            let seconds: u64 = v
                .trim()
                .parse()
                .map_err(|_| invalid("network", "timeout", v, "expected seconds"))?;
            if seconds == 0 {
                return Err(invalid("network", "timeout", v, "must be at least 1 second"));
            }
            config.network.timeout = Duration::from_secs(seconds);
        }
    }

    // [prefetch]
    if let Some(section) = ini.section(Some("prefetch")) {
        if let Some(v) = section.get("priority") {
            config.prefetch.priority = v
                .parse::<Priority>()
                .map_err(|_| invalid("prefetch", "priority", v, "must be one of: high, normal, low"))?;
        }
    }

    Ok(config)
}

pub(super) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expands a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

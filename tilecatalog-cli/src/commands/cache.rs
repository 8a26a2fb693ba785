//! Cache management CLI commands.

use std::path::PathBuf;

use clap::Subcommand;
use tracing::debug;

use tilecatalog::cache::{CacheSettings, DefaultCache, KeyValueCache};
use tilecatalog::config::{format_size, CatalogConfig};

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache size and entry counts
    Stats,
    /// Remove every cache entry
    Clear,
    /// Print the value stored under a key
    Get {
        /// Full cache key, e.g. `hrn:...::layer::handle::Data`
        key: String,
    },
    /// Remove every entry whose key starts with a prefix
    RemovePrefix {
        /// Key prefix, e.g. `hrn:...::layer::`
        prefix: String,
    },
}

/// Run a cache subcommand against the configured cache, or `dir` if given.
pub fn run(action: CacheAction, config: &CatalogConfig, dir: Option<PathBuf>) -> Result<(), CliError> {
    let settings = cache_settings(config, dir);
    let cache_dir = settings.disk_path_mutable.clone().unwrap_or_default();
    debug!(dir = %cache_dir.display(), ?action, "Opening cache");
    let cache = DefaultCache::open(settings)?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats();
            println!("Disk cache: {}", cache_dir.display());
            println!("  Entries: {}", stats.disk_entries);
            println!("  Size:    {}", format_size(stats.disk_bytes));
            match stats.disk_max_bytes {
                Some(max) => println!("  Limit:   {}", format_size(max)),
                None => println!("  Limit:   unlimited"),
            }
        }
        CacheAction::Clear => {
            println!("Clearing cache at: {}", cache_dir.display());
            cache.clear()?;
        }
        CacheAction::Get { key } => {
            let value = cache.get(&key)?.ok_or(CliError::KeyNotFound(key))?;
            println!("{}", render_value(&value));
        }
        CacheAction::RemovePrefix { prefix } => {
            cache.remove_keys_with_prefix(&prefix)?;
            println!("Removed keys with prefix '{}'", prefix);
        }
    }
    cache.close();
    Ok(())
}

/// Cache settings of `config`, with the memory tier off: every command
/// works on what is persisted.
fn cache_settings(config: &CatalogConfig, dir: Option<PathBuf>) -> CacheSettings {
    let mut cache = config.cache.clone();
    if let Some(dir) = dir {
        cache.directory = dir;
    }
    CacheSettings {
        max_memory_cache_size: 0,
        ..cache.to_cache_settings()
    }
}

/// Text values are printed as is, anything else as a hex dump summary.
fn render_value(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(text) if !text.contains('\0') => text.to_string(),
        _ => {
            let preview: Vec<String> = value.iter().take(32).map(|b| format!("{:02x}", b)).collect();
            let ellipsis = if value.len() > 32 { " ..." } else { "" };
            format!("<{} bytes> {}{}", value.len(), preview.join(" "), ellipsis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[test]
    fn test_dir_overrides_config() {
        let mut config = CatalogConfig::default();
        config.cache.version = Some("v2".to_string());
        let settings = cache_settings(&config, Some(PathBuf::from("/tmp/other")));
        assert_eq!(settings.disk_path_mutable, Some(PathBuf::from("/tmp/other")));
        assert_eq!(settings.cache_version.as_deref(), Some("v2"));
        assert_eq!(settings.max_memory_cache_size, 0);
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(b"{\"version\":3}"), "{\"version\":3}");
        assert_eq!(render_value(&[0, 1, 255]), "<3 bytes> 00 01 ff");
        assert!(render_value(&[0u8; 40]).ends_with(" ..."));
    }

    #[test]
    fn test_commands_on_directory() {
        let dir = TempDir::new().unwrap();
        let config = CatalogConfig::default();
        {
            let cache = DefaultCache::open(cache_settings(&config, Some(dir.path().to_path_buf()))).unwrap();
            cache.put("hrn::layer::a", Bytes::from_static(b"a"), None).unwrap();
            cache.put("hrn::layer::b", Bytes::from_static(b"b"), None).unwrap();
            cache.put("hrn::catalog", Bytes::from_static(b"c"), None).unwrap();
        }

        let dir_arg = || Some(dir.path().to_path_buf());
        run(CacheAction::Stats, &config, dir_arg()).unwrap();
        run(CacheAction::Get { key: "hrn::catalog".to_string() }, &config, dir_arg()).unwrap();
        run(
            CacheAction::RemovePrefix { prefix: "hrn::layer::".to_string() },
            &config,
            dir_arg(),
        )
        .unwrap();
        assert!(matches!(
            run(CacheAction::Get { key: "hrn::layer::a".to_string() }, &config, dir_arg()),
            Err(CliError::KeyNotFound(_))
        ));

        run(CacheAction::Clear, &config, dir_arg()).unwrap();
        assert!(matches!(
            run(CacheAction::Get { key: "hrn::catalog".to_string() }, &config, dir_arg()),
            Err(CliError::KeyNotFound(_))
        ));
    }
}

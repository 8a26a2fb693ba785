//! Configuration file support.
//!
//! A `tilecatalog.ini` file has four optional sections; every key falls back
//! to a default when absent:
//!
//! ```ini
//! [cache]
//! directory = ~/.cache/tilecatalog
//! version = v1
//! disk_size = 2GB        ; or "unlimited"
//! memory_size = 64MB
//! read_only = false
//!
//! [scheduler]
//! threads = 4
//!
//! [network]
//! timeout = 60           ; seconds
//!
//! [prefetch]
//! priority = low         ; high | normal | low
//! ```

mod file;
mod parser;
mod settings;
mod size;

pub use file::{config_directory, config_file_path, ConfigFileError, CONFIG_FILE_NAME};
pub use settings::{
    default_cache_directory, default_thread_count, CacheConfig, CatalogConfig, NetworkConfig,
    PrefetchConfig, SchedulerConfig, DEFAULT_CACHE_DIR_NAME, DEFAULT_PREFETCH_PRIORITY,
};
pub use size::{format_size, parse_limit, parse_size, Size, SizeParseError};

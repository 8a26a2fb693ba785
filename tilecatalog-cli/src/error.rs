//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and the exit code.

use std::fmt;
use std::process;

use tilecatalog::cache::CacheError;
use tilecatalog::config::ConfigFileError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be loaded
    Config(ConfigFileError),
    /// Cache could not be opened or modified
    Cache(CacheError),
    /// A tile argument is not a valid quad key
    InvalidTile(String),
    /// Invalid combination of arguments
    InvalidArgument(String),
    /// A cache key has no entry
    KeyNotFound(String),
}

impl CliError {
    /// Exit the process with an error message and code 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Cache(CacheError::Store(_)) = self {
            eprintln!();
            eprintln!("The cache may be in use by another process, or the directory");
            eprintln!("may not be writable. Try --dir to point at another cache.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Cache(e) => write!(f, "Cache error: {}", e),
            CliError::InvalidTile(tile) => write!(f, "Invalid tile '{}': expected a decimal quad key", tile),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::KeyNotFound(key) => write!(f, "No cache entry for key '{}'", key),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}

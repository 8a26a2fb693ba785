//! TileCatalog CLI - Command-line interface
//!
//! Operates on a tile catalog cache directory and inspects tile-tree
//! decompositions. No catalog backend is needed.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilecatalog::config::CatalogConfig;
use tilecatalog::logging::{init_logging, LogConfig};

use commands::cache::CacheAction;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilecatalog")]
#[command(version = tilecatalog::VERSION)]
#[command(about = "Inspect tile catalog caches and tile decompositions", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stdout
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage a persistent cache
    Cache {
        /// Cache directory, overriding `[cache] directory`
        #[arg(long)]
        dir: Option<PathBuf>,

        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the quad tree queries covering tiles over a level range
    Decompose {
        /// Comma-separated tiles (decimal quad keys)
        #[arg(long, value_delimiter = ',', required = true)]
        tiles: Vec<String>,

        /// Lowest level to cover
        #[arg(long)]
        min: u32,

        /// Highest level to cover
        #[arg(long)]
        max: u32,
    },
    /// Show level, row, column, parent and children of a tile
    Tile {
        /// Decimal quad key
        tile: String,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let level = if cli.verbose { "debug" } else { "warn" };
    let _guard = init_logging(LogConfig::default().with_level(level))
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    match cli.command {
        Command::Cache { dir, action } => {
            let config = load_config(cli.config)?;
            commands::cache::run(action, &config, dir)
        }
        Command::Decompose { tiles, min, max } => commands::decompose::run(&tiles, min, max),
        Command::Tile { tile } => commands::tile::run(&tile),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<CatalogConfig, CliError> {
    let config = match path {
        Some(path) => CatalogConfig::load(&path)?,
        None => CatalogConfig::load_default()?,
    };
    Ok(config)
}

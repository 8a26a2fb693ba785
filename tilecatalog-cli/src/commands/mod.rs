//! CLI subcommands.

pub mod cache;
pub mod decompose;
pub mod tile;

use tilecatalog::geo::TileKey;

use crate::error::CliError;

/// Parses a decimal quad key argument.
pub fn parse_tile(value: &str) -> Result<TileKey, CliError> {
    TileKey::from_here_tile(value).ok_or_else(|| CliError::InvalidTile(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tile() {
        assert_eq!(parse_tile("1").unwrap(), TileKey::root());
        assert!(matches!(parse_tile("2"), Err(CliError::InvalidTile(_))));
        assert!(matches!(parse_tile("north"), Err(CliError::InvalidTile(_))));
    }
}

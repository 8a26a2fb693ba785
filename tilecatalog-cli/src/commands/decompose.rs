//! `decompose`: print the quad tree queries a prefetch would issue.

use tilecatalog::geo::MAX_LEVEL;
use tilecatalog::repository::{effective_tile_keys, SubQuadsRequest, MAX_QUERY_DEPTH};

use super::parse_tile;
use crate::error::CliError;

pub fn run(tiles: &[String], min_level: u32, max_level: u32) -> Result<(), CliError> {
    let queries = decompose(tiles, min_level, max_level)?;

    println!(
        "{} queries for levels {}..={} (max depth {})",
        queries.len(),
        min_level,
        max_level,
        MAX_QUERY_DEPTH
    );
    println!("{:<24} {:>5} {:>5}", "TILE", "LEVEL", "DEPTH");
    for (tile_string, (tile, depth)) in &queries {
        println!("{:<24} {:>5} {:>5}", tile_string, tile.level(), depth);
    }
    Ok(())
}

fn decompose(tiles: &[String], min_level: u32, max_level: u32) -> Result<SubQuadsRequest, CliError> {
    if tiles.is_empty() {
        return Err(CliError::InvalidArgument("at least one tile is required".to_string()));
    }
    if min_level > max_level || max_level > MAX_LEVEL {
        return Err(CliError::InvalidArgument(format!(
            "level range {}..={} must be ordered and at most {}",
            min_level, max_level, MAX_LEVEL
        )));
    }
    let tiles = tiles
        .iter()
        .map(|t| parse_tile(t))
        .collect::<Result<Vec<_>, _>>()?;

    let queries = effective_tile_keys(&tiles, min_level, max_level);
    if queries.is_empty() {
        return Err(CliError::InvalidArgument("tiles and levels do not overlap".to_string()));
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilecatalog::geo::TileKey;

    fn args(tiles: &[&str]) -> Vec<String> {
        tiles.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_tile_in_range_is_one_query() {
        let tile = TileKey::from_row_column_level(5, 9, 4).unwrap();
        let queries = decompose(&args(&[&tile.to_here_tile()]), 4, 6).unwrap();
        assert_eq!(queries.get(&tile.to_here_tile()), Some(&(tile, 2)));
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(decompose(&[], 1, 2), Err(CliError::InvalidArgument(_))));
        assert!(matches!(decompose(&args(&["1"]), 3, 2), Err(CliError::InvalidArgument(_))));
        assert!(matches!(decompose(&args(&["1"]), 0, 40), Err(CliError::InvalidArgument(_))));
        assert!(matches!(decompose(&args(&["x"]), 0, 1), Err(CliError::InvalidTile(_))));
    }
}

//! `tile`: show where a quad key sits in the tile tree.

use std::fmt::Write;

use tilecatalog::geo::TileKey;

use super::parse_tile;
use crate::error::CliError;

pub fn run(tile: &str) -> Result<(), CliError> {
    let tile = parse_tile(tile)?;
    print!("{}", describe(&tile));
    Ok(())
}

fn describe(tile: &TileKey) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Tile:     {}", tile);
    let _ = writeln!(out, "  Level:  {}", tile.level());
    let _ = writeln!(out, "  Row:    {}", tile.row());
    let _ = writeln!(out, "  Column: {}", tile.column());
    match tile.parent() {
        Some(parent) => {
            let _ = writeln!(out, "  Parent: {}", parent);
        }
        None => {
            let _ = writeln!(out, "  Parent: -");
        }
    }
    let children: Vec<String> = tile.children().iter().map(TileKey::to_here_tile).collect();
    if children.is_empty() {
        let _ = writeln!(out, "  Children: -");
    } else {
        let _ = writeln!(out, "  Children: {}", children.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_root() {
        let text = describe(&TileKey::root());
        assert!(text.contains("Level:  0"));
        assert!(text.contains("Parent: -"));
        assert!(text.contains("Children: 4, 5, 6, 7"));
    }

    #[test]
    fn test_describe_child() {
        let tile = TileKey::from_row_column_level(1, 0, 1).unwrap();
        let text = describe(&tile);
        assert!(text.starts_with("Tile:     6"));
        assert!(text.contains("Row:    1"));
        assert!(text.contains("Parent: 1"));
    }

    #[test]
    fn test_run_rejects_invalid_tile() {
        assert!(matches!(run("0"), Err(CliError::InvalidTile(_))));
    }
}

//! Quad-tree tile addressing.
//!
//! A tile is identified by `(level, row, column)`. Level 0 is a single
//! tile covering the world; each level splits every tile into four
//! children. Rows grow northward and columns eastward.
//!
//! # Quad keys
//!
//! The 64-bit quad key interleaves row and column bits below a leading
//! sentinel bit, two bits per level:
//!
//! ```text
//! level 0          1
//! level 1      1 r c            (4..=7)
//! level 2      1 r c r c        (16..=31)
//! ```
//!
//! The decimal rendering of the quad key is the canonical tile string used
//! as a partition id ("here tile").

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deepest level a quad key can address.
pub const MAX_LEVEL: u32 = 31;

/// A quad-tree tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    level: u32,
    row: u32,
    column: u32,
}

impl TileKey {
    /// Creates a tile key, or `None` if the address is outside the tree.
    pub fn from_row_column_level(row: u32, column: u32, level: u32) -> Option<Self> {
        if level > MAX_LEVEL {
            return None;
        }
        let size = 1u64 << level;
        if u64::from(row) >= size || u64::from(column) >= size {
            return None;
        }
        Some(Self { level, row, column })
    }

    /// The single level-0 tile.
    pub fn root() -> Self {
        Self {
            level: 0,
            row: 0,
            column: 0,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// Returns the 64-bit quad key.
    pub fn quad_key64(&self) -> u64 {
        let mut key: u64 = 1;
        for bit in (0..self.level).rev() {
            let row_bit = u64::from((self.row >> bit) & 1);
            let column_bit = u64::from((self.column >> bit) & 1);
            key = (key << 2) | (row_bit << 1) | column_bit;
        }
        key
    }

    /// Decodes a quad key. The sentinel bit must be present at an even offset.
    pub fn from_quad_key64(key: u64) -> Option<Self> {
        if key == 0 {
            return None;
        }
        let sentinel = 63 - key.leading_zeros();
        if sentinel % 2 != 0 {
            return None;
        }
        let level = sentinel / 2;
        let mut row = 0u32;
        let mut column = 0u32;
        for bit in 0..level {
            row |= (((key >> (2 * bit + 1)) & 1) as u32) << bit;
            column |= (((key >> (2 * bit)) & 1) as u32) << bit;
        }
        Some(Self { level, row, column })
    }

    /// Canonical tile string: the decimal quad key.
    pub fn to_here_tile(&self) -> String {
        self.quad_key64().to_string()
    }

    pub fn from_here_tile(tile: &str) -> Option<Self> {
        tile.trim().parse::<u64>().ok().and_then(Self::from_quad_key64)
    }

    /// The enclosing tile one level up; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }
        Some(Self {
            level: self.level - 1,
            row: self.row >> 1,
            column: self.column >> 1,
        })
    }

    /// The child in quadrant `index` (0..4), where bit 1 selects the row
    /// and bit 0 the column.
    pub fn child(&self, index: u8) -> Option<Self> {
        if index > 3 || self.level >= MAX_LEVEL {
            return None;
        }
        Some(Self {
            level: self.level + 1,
            row: (self.row << 1) | u32::from(index >> 1),
            column: (self.column << 1) | u32::from(index & 1),
        })
    }

    /// All four children, empty at the deepest level.
    pub fn children(&self) -> Vec<Self> {
        (0..4).filter_map(|index| self.child(index)).collect()
    }

    /// The ancestor (or self) at `level`.
    pub fn ancestor_at(&self, level: u32) -> Option<Self> {
        if level > self.level {
            return None;
        }
        let shift = self.level - level;
        Some(Self {
            level,
            row: self.row >> shift,
            column: self.column >> shift,
        })
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_parent_of(&self, other: &TileKey) -> bool {
        other.level > self.level && other.ancestor_at(self.level) == Some(*self)
    }

    /// Resolves a quad key relative to this tile.
    ///
    /// `"1"` is the tile itself, `"4"`..`"7"` its children, and so on.
    pub fn added_sub_here_tile(&self, sub_here_tile: &str) -> Option<Self> {
        let sub = Self::from_here_tile(sub_here_tile)?;
        let level = self.level + sub.level;
        if level > MAX_LEVEL {
            return None;
        }
        let row = (u64::from(self.row) << sub.level) + u64::from(sub.row);
        let column = (u64::from(self.column) << sub.level) + u64::from(sub.column);
        Self::from_row_column_level(u32::try_from(row).ok()?, u32::try_from(column).ok()?, level)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.quad_key64())
    }
}

impl FromStr for TileKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_here_tile(s).ok_or_else(|| format!("invalid tile '{}'", s))
    }
}

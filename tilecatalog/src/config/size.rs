//! Human-readable size parsing (e.g., "512MB", "1.5GB", "unlimited").

use std::fmt;
use thiserror::Error;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '2GB', '500MB', '1.5GB' or '1024KB'")]
pub struct SizeParseError {
    input: String,
}

impl SizeParseError {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports bare byte counts, `K`/`KB`/`KiB`, `M`/`MB`/`MiB` and
/// `G`/`GB`/`GiB` suffixes (all powers of 1024), decimal fractions such as
/// `1.5GB`, and is case-insensitive and whitespace tolerant.
///
/// # Examples
///
/// ```
/// use tilecatalog::config::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1 KB").unwrap(), 1024);
/// assert_eq!(parse_size("512mib").unwrap(), 512 * 1024 * 1024);
/// assert_eq!(parse_size("0.5GB").unwrap(), 512 * 1024 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<u64, SizeParseError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::new(s));
    }

    let upper = trimmed.to_uppercase();
    let split = upper
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(upper.len());
    let (number, suffix) = upper.split_at(split);

    let multiplier = match suffix.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KB,
        "M" | "MB" | "MIB" => MB,
        "G" | "GB" | "GIB" => GB,
        _ => return Err(SizeParseError::new(trimmed)),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| SizeParseError::new(trimmed));
    }

    let fractional: f64 = number
        .parse()
        .map_err(|_| SizeParseError::new(trimmed))?;
    let bytes = fractional * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(SizeParseError::new(trimmed));
    }
    Ok(bytes.round() as u64)
}

/// Parse a quota: `unlimited`, `none` or `0` mean no limit.
pub fn parse_limit(s: &str) -> Result<Option<u64>, SizeParseError> {
    match s.trim().to_lowercase().as_str() {
        "unlimited" | "none" => Ok(None),
        _ => parse_size(s).map(|bytes| (bytes > 0).then_some(bytes)),
    }
}

/// Format a byte count as a human-readable string.
///
/// ```
/// use tilecatalog::config::format_size;
///
/// assert_eq!(format_size(1024), "1KB");
/// assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3GB");
/// assert_eq!(format_size(1500), "1500");
/// ```
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{}", bytes)
    }
}

/// A byte size that parses from and formats to human-readable strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Size(pub u64);

impl Size {
    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn from_mb(mb: u64) -> Self {
        Self(mb * MB)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_size(self.0))
    }
}

impl std::str::FromStr for Size {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s).map(Size)
    }
}

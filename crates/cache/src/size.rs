//! Payload sizing and human-readable byte sizes

use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;

/// Values that can report how many bytes they occupy in the cache.
///
/// The cache budget is enforced against this number, so implementations
/// should report the size of the payload they own rather than the size of
/// a handle to it.
pub trait SizeBytes {
    /// Number of payload bytes held by this value.
    fn size_bytes(&self) -> usize;
}

impl SizeBytes for Vec<u8> {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

impl SizeBytes for Box<[u8]> {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

impl SizeBytes for Bytes {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

impl<T: SizeBytes + ?Sized> SizeBytes for Arc<T> {
    fn size_bytes(&self) -> usize {
        (**self).size_bytes()
    }
}

const UNITS: &[(&str, f64)] = &[
    ("b", 1.0),
    ("k", 1e3),
    ("kb", 1e3),
    ("kib", 1024.0),
    ("m", 1e6),
    ("mb", 1e6),
    ("mib", 1_048_576.0),
    ("g", 1e9),
    ("gb", 1e9),
    ("gib", 1_073_741_824.0),
    ("t", 1e12),
    ("tb", 1e12),
    ("tib", 1_099_511_627_776.0),
];

/// Parse a byte size such as `1000`, `1e9`, `512MB` or `2GiB`.
///
/// Decimal units (`KB`, `MB`, `GB`, `TB`) are powers of 1000, binary units
/// (`KiB`, `MiB`, `GiB`, `TiB`) powers of 1024. Units are case-insensitive.
///
/// # Errors
///
/// Returns [`Error::InvalidByteSize`] for empty input, negative or
/// non-finite numbers, unknown units, or sizes that do not fit in `usize`.
pub fn parse_byte_size(input: &str) -> Result<usize> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_byte_size(input, "empty value"));
    }

    let (number, multiplier) = if let Ok(number) = trimmed.parse::<f64>() {
        (number, 1.0)
    } else {
        let split = trimmed
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let number: f64 = number
            .trim()
            .parse()
            .map_err(|_| Error::invalid_byte_size(input, "not a number"))?;
        let unit = unit.trim().to_ascii_lowercase();
        let multiplier = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, multiplier)| *multiplier)
            .ok_or_else(|| Error::invalid_byte_size(input, format!("unknown unit '{unit}'")))?;
        (number, multiplier)
    };

    if !number.is_finite() || number < 0.0 {
        return Err(Error::invalid_byte_size(
            input,
            "size must be a finite, non-negative number",
        ));
    }

    let bytes = (number * multiplier).round();
    if bytes > usize::MAX as f64 {
        return Err(Error::invalid_byte_size(input, "size overflows usize"));
    }
    Ok(bytes as usize)
}

/// Render a byte count with a decimal unit, for log output.
#[must_use]
pub fn format_byte_size(bytes: usize) -> String {
    const STEPS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit + 1 < STEPS.len() {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", STEPS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_numbers() {
        assert_eq!(parse_byte_size("1024").unwrap(), 1024);
        assert_eq!(parse_byte_size(" 1e9 ").unwrap(), 1_000_000_000);
        assert_eq!(parse_byte_size("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_byte_size("512MB").unwrap(), 512_000_000);
        assert_eq!(parse_byte_size("2GiB").unwrap(), 2 * 1_073_741_824);
        assert_eq!(parse_byte_size("1.5 kb").unwrap(), 1500);
        assert_eq!(parse_byte_size("64b").unwrap(), 64);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("-5").is_err());
        assert!(parse_byte_size("12XB").is_err());
        assert!(parse_byte_size("lots").is_err());
    }

    #[test]
    fn test_format_byte_size() {
        assert_eq!(format_byte_size(12), "12 B");
        assert_eq!(format_byte_size(1_500), "1.5 KB");
        assert_eq!(format_byte_size(1_000_000_000), "1.0 GB");
    }

    #[test]
    fn test_arc_reports_inner_size() {
        let payload: Arc<Vec<u8>> = Arc::new(vec![0; 40]);
        assert_eq!(payload.size_bytes(), 40);
        assert_eq!(Bytes::from_static(b"abc").size_bytes(), 3);
    }
}

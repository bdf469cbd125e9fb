//! Resource quantity parsing for deploy configs.
//!
//! Deploy configs are written by environment authors, not Kubernetes, so the
//! accepted forms are looser than the apimachinery grammar: `"1C"` means one
//! core and decimal memory suffixes (`G`, `M`) are read as binary (`Gi`, `Mi`).

use std::fmt;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

pub const MIN_MEMORY_BYTES: u64 = 256 * MIB;
pub const MAX_MEMORY_BYTES: u64 = 8 * GIB;
pub const MIN_EPHEMERAL_BYTES: u64 = GIB;
pub const MAX_EPHEMERAL_BYTES: u64 = 50 * GIB;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityError(String);

impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid quantity '{}'", self.0)
    }
}

impl std::error::Error for QuantityError {}

/// `"2"`, `"1.5"`, `"1C"` or `"500m"` to millicores.
pub fn parse_cpu_millis(raw: &str) -> Result<u64, QuantityError> {
    let s = raw.trim();
    let err = || QuantityError(raw.to_string());
    if let Some(millis) = s.strip_suffix('m') {
        return millis.trim().parse::<u64>().map_err(|_| err());
    }
    let cores = s.strip_suffix(['C', 'c']).unwrap_or(s).trim();
    let cores: f64 = cores.parse().map_err(|_| err())?;
    if !cores.is_finite() || cores <= 0.0 {
        return Err(err());
    }
    Ok((cores * 1000.0).round() as u64)
}

/// Memory or storage size to bytes. A bare number is read as MiB.
pub fn parse_size_bytes(raw: &str) -> Result<u64, QuantityError> {
    let s = raw.trim();
    let err = || QuantityError(raw.to_string());
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().map_err(|_| err())?;
    if !value.is_finite() || value <= 0.0 {
        return Err(err());
    }
    let unit = unit.trim();
    let unit = unit
        .strip_suffix(['B', 'b'])
        .filter(|u| !u.is_empty())
        .unwrap_or(unit);
    let multiplier = match unit {
        "" => MIB,
        "K" | "k" | "Ki" => KIB,
        "M" | "Mi" => MIB,
        "G" | "Gi" => GIB,
        "T" | "Ti" => TIB,
        _ => return Err(err()),
    };
    Ok((value * multiplier as f64).round() as u64)
}

pub fn format_cpu(millis: u64) -> String {
    format!("{millis}m")
}

/// Render bytes as the largest exact binary-SI unit.
pub fn format_binary(bytes: u64) -> String {
    for (unit, size) in [("Ti", TIB), ("Gi", GIB), ("Mi", MIB), ("Ki", KIB)] {
        if bytes >= size && bytes % size == 0 {
            return format!("{}{unit}", bytes / size);
        }
    }
    bytes.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_forms() {
        assert_eq!(parse_cpu_millis("2").unwrap(), 2000);
        assert_eq!(parse_cpu_millis("1C").unwrap(), 1000);
        assert_eq!(parse_cpu_millis("0.5").unwrap(), 500);
        assert_eq!(parse_cpu_millis("250m").unwrap(), 250);
        assert!(parse_cpu_millis("two").is_err());
        assert!(parse_cpu_millis("-1").is_err());
    }

    #[test]
    fn memory_forms() {
        assert_eq!(parse_size_bytes("4G").unwrap(), 4 * GIB);
        assert_eq!(parse_size_bytes("4Gi").unwrap(), 4 * GIB);
        assert_eq!(parse_size_bytes("2GB").unwrap(), 2 * GIB);
        assert_eq!(parse_size_bytes("512Mi").unwrap(), 512 * MIB);
        assert_eq!(parse_size_bytes("2048").unwrap(), 2 * GIB);
        assert_eq!(parse_size_bytes("1.5G").unwrap(), 3 * GIB / 2);
        assert!(parse_size_bytes("4X").is_err());
        assert!(parse_size_bytes("G").is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(format_cpu(2000), "2000m");
        assert_eq!(format_binary(4 * GIB), "4Gi");
        assert_eq!(format_binary(1536 * MIB), "1536Mi");
        assert_eq!(format_binary(1000), "1000");
    }
}

//! Utility functions shared by the master and worker binaries
//!
//! Small, dependency-light helpers: wall-clock time as fractional unix
//! seconds (the unit the whole data model uses for timestamps), numeric
//! clamping, and a content hash used to fingerprint the published RTS
//! parameters file for diagnostics.

use blake3::Hasher;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional unix seconds.
///
/// The scheduler's data model (arrival times, deadlines, heartbeats) is
/// expressed in unix seconds throughout; using `f64` keeps sub-second
/// precision without pulling a calendar type into hot-path comparisons.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Clamp `value` into `[min, max]`.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// BLAKE3 checksum of a string, hex-encoded. Used to log a short fingerprint
/// of the params file after each atomic publish, so operators can confirm a
/// reload actually picked up new content without diffing JSON by hand.
pub fn calculate_string_checksum(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_timestamp_is_monotonic_increasing_enough() {
        let a = unix_timestamp();
        let b = unix_timestamp();
        assert!(b >= a);
        assert!(a > 1_700_000_000.0);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(1.0, 1.5, 2.5), 1.5);
        assert_eq!(clamp(3.0, 1.5, 2.5), 2.5);
        assert_eq!(clamp(2.0, 1.5, 2.5), 2.0);
    }

    #[test]
    fn test_checksum_is_deterministic_and_sensitive() {
        let a = calculate_string_checksum("hello");
        let b = calculate_string_checksum("hello");
        let c = calculate_string_checksum("hellp");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}

//! Utility functions and helpers
//!
//! Clock access and log formatting shared by the coordinator and engines.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Get current timestamp in seconds since Unix epoch, saturated to `u32`
pub fn current_timestamp_secs() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// Format hash rate as a human-readable string
pub fn format_hash_rate(hashes_per_sec: f64) -> String {
    const UNITS: &[&str] = &["H/s", "KH/s", "MH/s", "GH/s", "TH/s"];
    let mut rate = hashes_per_sec;
    let mut unit_index = 0;

    while rate >= 1000.0 && unit_index < UNITS.len() - 1 {
        rate /= 1000.0;
        unit_index += 1;
    }

    format!("{:.2} {}", rate, UNITS[unit_index])
}

/// Hash rate over an elapsed interval; zero when no time has passed
pub fn hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        hashes as f64 / secs
    } else {
        0.0
    }
}

/// Treat a zero duration as "no limit"
pub fn non_zero_duration(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hash_rate() {
        assert_eq!(format_hash_rate(500.0), "500.00 H/s");
        assert_eq!(format_hash_rate(1500.0), "1.50 KH/s");
        assert_eq!(format_hash_rate(2_500_000.0), "2.50 MH/s");
    }

    #[test]
    fn test_hash_rate() {
        assert_eq!(hash_rate(1000, Duration::from_secs(2)), 500.0);
        assert_eq!(hash_rate(1000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_non_zero_duration() {
        assert_eq!(non_zero_duration(Duration::ZERO), None);
        assert_eq!(
            non_zero_duration(Duration::from_secs(3)),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_timestamps_are_consistent() {
        let millis = current_timestamp_millis();
        let secs = current_timestamp_secs() as u64;
        assert!(millis / 1000 >= secs.saturating_sub(1));
        assert!(secs > 1_600_000_000);
    }
}

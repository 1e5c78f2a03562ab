//! General time utility functions

use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert seconds from a parameter file into a `std::time::Duration`.
///
/// Negative or non-finite values are treated as zero.
pub fn secs_to_duration(seconds: f64) -> std::time::Duration {
    if seconds.is_finite() && seconds > 0.0 {
        std::time::Duration::from_secs_f64(seconds)
    }
    else {
        std::time::Duration::from_secs(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(
            duration_to_seconds(chrono::Duration::milliseconds(1500)),
            Some(1.5)
        );
    }

    #[test]
    fn test_secs_to_duration() {
        assert_eq!(secs_to_duration(0.05), std::time::Duration::from_millis(50));
        assert_eq!(secs_to_duration(-1.0), std::time::Duration::from_secs(0));
        assert_eq!(secs_to_duration(f64::NAN), std::time::Duration::from_secs(0));
    }
}

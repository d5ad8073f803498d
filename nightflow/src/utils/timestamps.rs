//! Timestamp utilities.

use chrono::{DateTime, SecondsFormat, Utc};

/// Instant used in attempt records, run records and checkpoints.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp as RFC 3339 with a `Z` suffix and second precision.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use nightflow::utils::format_iso8601;
///
/// let ts = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();
/// assert_eq!(format_iso8601(&ts), "2024-03-01T02:00:00Z");
/// ```
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_iso8601_midnight() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(format_iso8601(&ts), "2024-12-31T00:00:00Z");
    }

    #[test]
    fn test_now_utc_is_monotonic_enough() {
        let a = now_utc();
        let b = now_utc();
        assert!(b >= a);
    }
}

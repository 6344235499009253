//! Timestamp formats used in artifact names and notification texts.

use chrono::{DateTime, Local};

/// Timestamp embedded in artifact file names, e.g. `2024-01-31-23-59-07`.
#[must_use]
pub fn archive_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// Human-readable local time for notification messages.
#[must_use]
pub fn local_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S %:z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_archive_timestamp_format() {
        let at = Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 7).unwrap();
        assert_eq!(archive_timestamp(at), "2024-01-31-23-59-07");
    }

    #[test]
    fn test_local_timestamp_contains_offset() {
        let at = Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 7).unwrap();
        assert!(local_timestamp(at).starts_with("2024-01-31 23:59:07 "));
    }
}

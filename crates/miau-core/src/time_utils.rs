use std::time::Duration;

use chrono::{DateTime, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub(crate) fn current_unix_timestamp_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Formats `at` as `YYYYMMDDHHMMSS` in UTC.
pub fn compact_utc_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Saturating conversion used when durations are reported as integer millis.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn unit_compact_utc_stamp_is_fixed_width() {
        let at = Utc
            .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .single()
            .expect("valid timestamp");
        assert_eq!(compact_utc_stamp(at), "20260102030405");
    }

    #[test]
    fn unit_duration_to_millis_saturates() {
        assert_eq!(duration_to_millis(Duration::from_secs(2)), 2_000);
        assert_eq!(duration_to_millis(Duration::MAX), u64::MAX);
    }
}

//! Millisecond-epoch time helpers.
//!
//! All persisted timestamps in Stowage are `i64` milliseconds since the Unix
//! epoch; archives are bucketed by UTC calendar date.

use chrono::{NaiveDate, Utc};

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current UTC date rendered as the archive bucket `YYYYMMDD`.
pub fn today_bucket() -> String {
    Utc::now().format("%Y%m%d").to_string()
}

/// Parse an archive bucket (`YYYYMMDD`) back into a date.
pub fn parse_bucket(bucket: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(bucket, "%Y%m%d").ok()
}

/// Age of an archive bucket in whole days relative to today (UTC).
///
/// Returns `None` for unparseable buckets so callers can skip rather than
/// delete files they do not understand.
pub fn bucket_age_days(bucket: &str) -> Option<i64> {
    let date = parse_bucket(bucket)?;
    Some((Utc::now().date_naive() - date).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_recent() {
        // Sanity: after 2020-01-01 and monotone-ish across two calls.
        let a = now_ms();
        let b = now_ms();
        assert!(a > 1_577_836_800_000);
        assert!(b >= a);
    }

    #[test]
    fn bucket_round_trip() {
        let bucket = today_bucket();
        assert_eq!(bucket.len(), 8);
        assert_eq!(bucket_age_days(&bucket), Some(0));
    }

    #[test]
    fn bad_bucket_is_none() {
        assert_eq!(bucket_age_days("not-a-date"), None);
        assert_eq!(bucket_age_days("20231340"), None);
    }
}

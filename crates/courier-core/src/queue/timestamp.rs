//! Store timestamp encoding.
//!
//! Timestamps are UTC text in a fixed-width format so that SQL string
//! comparison orders them chronologically.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp.
///
/// Accepts the fractional form written by this crate and the plain
/// `YYYY-MM-DD HH:MM:SS` form SQLite's `CURRENT_TIMESTAMP` produces.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Calendar date of a stored timestamp, used for the relocation directory.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_timestamp(raw).map(|ts| ts.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_is_fixed_width_and_parses_back() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let s = format_timestamp(ts);
        assert_eq!(s, "2024-01-02 03:04:05.000");
        assert_eq!(parse_timestamp(&s), Some(ts));
    }

    #[test]
    fn sqlite_current_timestamp_form_parses() {
        let ts = parse_timestamp("2024-05-06 07:08:09").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());
    }

    #[test]
    fn garbage_does_not_parse() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn lexical_order_matches_time_order() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let a = format_timestamp(at);
        let b = format_timestamp(at + chrono::Duration::milliseconds(7));
        let c = format_timestamp(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap());
        assert!(a < b);
        assert!(b < c);
    }
}

//! Lenient date coercion for spreadsheet "last seen" cells.
//!
//! Anything that does not parse becomes `None` ("Not available"); a bad
//! cell never fails the batch.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Rendering of an unknown last-activity date in tabular outputs.
pub const NOT_AVAILABLE: &str = "Not available";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d-%b-%Y", "%d %b %Y"];

/// Serial-number range accepted as an Excel date (1900-03-01 .. 2200-01-01).
const EXCEL_SERIAL_MIN: f64 = 61.0;
const EXCEL_SERIAL_MAX: f64 = 109_575.0;

/// Parse a last-seen cell into a UTC timestamp.
pub fn parse_last_seen(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() || is_null_marker(value) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(ndt.and_utc());
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(value, fmt) {
            return Some(d.and_time(NaiveTime::MIN).and_utc());
        }
    }

    value.parse::<f64>().ok().and_then(excel_serial_to_utc)
}

/// Convert an Excel serial (1900 date system) to a UTC timestamp.
pub fn excel_serial_to_utc(serial: f64) -> Option<DateTime<Utc>> {
    if !serial.is_finite() || !(EXCEL_SERIAL_MIN..EXCEL_SERIAL_MAX).contains(&serial) {
        return None;
    }
    // Serial 60 is the phantom 1900-02-29, so 1899-12-30 is the epoch for serial >= 61.
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(NaiveTime::MIN);
    let millis = (serial * 86_400_000.0).round() as i64;
    Some((epoch + Duration::milliseconds(millis)).and_utc())
}

/// Render an optional timestamp as an ISO date, or the sentinel.
pub fn format_date_or_sentinel(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(ts) => ts.date_naive().to_string(),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Text the original exports used for empty cells.
pub fn is_null_marker(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "nan" | "nat" | "none" | "null" | "n/a" | "not available"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn iso_date_and_datetime() {
        assert_eq!(parse_last_seen("2023-10-12").unwrap().date_naive(), ymd(2023, 10, 12));
        let ts = parse_last_seen("2023-10-12 14:05:09.250").unwrap();
        assert_eq!(ts.date_naive(), ymd(2023, 10, 12));
        assert_eq!(ts.format("%H:%M:%S").to_string(), "14:05:09");
    }

    #[test]
    fn rfc3339_is_normalized_to_utc() {
        let ts = parse_last_seen("2023-10-12T00:30:00+01:00").unwrap();
        assert_eq!(ts.date_naive(), ymd(2023, 10, 11));
    }

    #[test]
    fn day_first_formats() {
        assert_eq!(parse_last_seen("30/09/2023").unwrap().date_naive(), ymd(2023, 9, 30));
        assert_eq!(parse_last_seen("05-Oct-2023").unwrap().date_naive(), ymd(2023, 10, 5));
    }

    #[test]
    fn excel_serial() {
        // 45199 = 2023-09-30
        assert_eq!(parse_last_seen("45199").unwrap().date_naive(), ymd(2023, 9, 30));
        assert_eq!(excel_serial_to_utc(45199.5).unwrap().format("%H").to_string(), "12");
        assert!(excel_serial_to_utc(12.0).is_none());
    }

    #[test]
    fn garbage_coerces_to_none() {
        assert!(parse_last_seen("").is_none());
        assert!(parse_last_seen("NaN").is_none());
        assert!(parse_last_seen("Not available").is_none());
        assert!(parse_last_seen("yesterday").is_none());
        assert!(parse_last_seen("2023-13-45").is_none());
    }

    #[test]
    fn sentinel_rendering() {
        assert_eq!(format_date_or_sentinel(None), NOT_AVAILABLE);
        let ts = parse_last_seen("2024-01-10").unwrap();
        assert_eq!(format_date_or_sentinel(Some(ts)), "2024-01-10");
    }
}

//! Temporal Arithmetic
//!
//! Pure helpers over millisecond epoch instants. Days are UTC days.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Milliseconds in one day
pub const DAY_MS: i64 = 86_400_000;

/// Midnight at the start of the day containing `ms`
pub fn start_of_day(ms: i64) -> i64 {
    ms.div_euclid(DAY_MS) * DAY_MS
}

/// Last millisecond of the day containing `ms`
pub fn end_of_day(ms: i64) -> i64 {
    start_of_day(ms) + DAY_MS - 1
}

/// Nearest day boundary (midnight) to `ms`
pub fn snap_to_day(ms: i64) -> i64 {
    start_of_day(ms + DAY_MS / 2)
}

pub fn add_days(ms: i64, days: i64) -> i64 {
    ms + days * DAY_MS
}

/// `date` moved by `days`, or `None` past the calendar range
pub fn shift_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|delta| date.checked_add_signed(delta))
}

/// Midnight of `date`
pub fn date_to_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// Calendar day containing `ms`
pub fn ms_to_date(ms: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(start_of_day(ms))
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Day-aligned span covering `start..=end` (inclusive calendar days)
pub fn day_span(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    (date_to_ms(start), end_of_day(date_to_ms(end)))
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Parse the date shapes upstream documents use
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()
}

/// Keep a visible window duration within the zoom bounds
pub fn clamp_zoom(duration_ms: i64, min_zoom_ms: i64, max_zoom_ms: i64) -> i64 {
    duration_ms.clamp(min_zoom_ms, max_zoom_ms.max(min_zoom_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_boundaries() {
        let midnight = date_to_ms(date(2024, 1, 5));
        let noon = midnight + DAY_MS / 2;
        assert_eq!(start_of_day(noon), midnight);
        assert_eq!(end_of_day(noon), midnight + DAY_MS - 1);
        assert_eq!(start_of_day(midnight), midnight);
        assert_eq!(end_of_day(end_of_day(noon)), end_of_day(noon));
    }

    #[test]
    fn test_negative_instants_floor() {
        assert_eq!(start_of_day(-1), -DAY_MS);
        assert_eq!(end_of_day(-1), -1);
    }

    #[test]
    fn test_snap_to_nearest_day() {
        let midnight = date_to_ms(date(2024, 3, 1));
        assert_eq!(snap_to_day(midnight + 3 * 3_600_000), midnight);
        assert_eq!(snap_to_day(midnight + 13 * 3_600_000), midnight + DAY_MS);
    }

    #[test]
    fn test_date_conversion() {
        let d = date(2024, 1, 20);
        assert_eq!(ms_to_date(date_to_ms(d)), d);
        assert_eq!(ms_to_date(end_of_day(date_to_ms(d))), d);
        let (start, end) = day_span(date(2024, 1, 1), date(2024, 1, 10));
        assert_eq!(end - start + 1, 10 * DAY_MS);
    }

    #[test]
    fn test_parse_date_shapes() {
        assert_eq!(parse_date("2024-01-05"), Some(date(2024, 1, 5)));
        assert_eq!(parse_date("2024-01-05T10:00:00Z"), Some(date(2024, 1, 5)));
        assert_eq!(parse_date("05/01/2024"), Some(date(2024, 1, 5)));
        assert_eq!(parse_date("soon"), None);
        assert_eq!(parse_date("  "), None);
    }

    #[test]
    fn test_clamp_zoom() {
        assert_eq!(clamp_zoom(1, 10, 100), 10);
        assert_eq!(clamp_zoom(1_000, 10, 100), 100);
        assert_eq!(clamp_zoom(50, 10, 100), 50);
    }
}

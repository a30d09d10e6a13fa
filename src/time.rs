//! Civil-time helpers for the UTC+8 statistics calendar

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Offset of the statistics calendar (UTC+8)
pub const STATISTICS_OFFSET: FixedOffset = match FixedOffset::east_opt(8 * 3600) {
    Some(offset) => offset,
    None => panic!("invalid statistics offset"),
};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const HOUR_MILLIS: i64 = 3_600_000;

fn civil_to_offset(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    let utc = naive - Duration::seconds(i64::from(STATISTICS_OFFSET.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, STATISTICS_OFFSET)
}

/// Midnight of the statistics day containing `now`
pub fn begin_of_day(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    let day = now.with_timezone(&STATISTICS_OFFSET).date_naive();
    civil_to_offset(day.and_time(NaiveTime::MIN))
}

/// Parse `yyyy-MM-dd HH:mm:ss` as UTC+8 civil time
pub fn parse_civil_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT)?;
    Ok(civil_to_offset(naive).with_timezone(&Utc))
}

/// Parse `yyyy-MM-dd` as the start of that UTC+8 day
pub fn parse_civil_date(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let date = NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)?;
    Ok(civil_to_offset(date.and_time(NaiveTime::MIN)).with_timezone(&Utc))
}

/// Render an instant as UTC+8 `yyyy-MM-dd HH:mm:ss`
pub fn format_civil(t: DateTime<Utc>) -> String {
    t.with_timezone(&STATISTICS_OFFSET)
        .format(DATETIME_FORMAT)
        .to_string()
}

/// Truncate an instant to its hour bucket (epoch aligned, like the engine's
/// hourly date histogram)
pub fn hour_bucket_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis().div_euclid(HOUR_MILLIS) * HOUR_MILLIS
}

/// Inclusive `[start, end]` range on the statistics date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl StatisticsWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The whole statistics day containing `now`
    pub fn day_of(now: DateTime<Utc>) -> Self {
        let start = begin_of_day(now).with_timezone(&Utc);
        let end = start + Duration::days(1) - Duration::milliseconds(1);
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_begin_of_day_uses_utc8() {
        // 2024-05-01 17:30 UTC is already 2024-05-02 01:30 in UTC+8
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 17, 30, 0).unwrap();
        let begin = begin_of_day(now);
        assert_eq!(begin.format(DATETIME_FORMAT).to_string(), "2024-05-02 00:00:00");
        assert_eq!(
            begin.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 5, 1, 16, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_window_covers_whole_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap();
        let window = StatisticsWindow::day_of(now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 4, 30, 16, 0, 0).unwrap());
        assert!(window.contains(window.start));
        assert!(window.contains(window.end));
        assert!(!window.contains(window.end + Duration::milliseconds(1)));
    }

    #[test]
    fn test_civil_parsing_round_trips() {
        let t = parse_civil_datetime("2024-05-02 08:15:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 5, 2, 0, 15, 0).unwrap());
        assert_eq!(format_civil(t), "2024-05-02 08:15:00");

        let d = parse_civil_date("2024-05-02").unwrap();
        assert_eq!(d, Utc.with_ymd_and_hms(2024, 5, 1, 16, 0, 0).unwrap());
        assert!(parse_civil_date("02/05/2024").is_err());
    }

    #[test]
    fn test_hour_bucket() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 3, 59, 59).unwrap();
        let bucket = Utc.timestamp_millis_opt(hour_bucket_millis(t)).unwrap();
        assert_eq!(bucket.hour(), 3);
        assert_eq!(bucket.minute(), 0);
    }
}

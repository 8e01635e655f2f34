use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate};

/// The prefix used for bucket keys unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "metrics-distinct";

/// Key of the daily bucket holding all counters of one UTC day.
///
/// Formatted as `{prefix}:{year:04}:{month:02}:{day:02}`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DailyKey {
    prefix: String,
    date: NaiveDate,
}

impl DailyKey {
    /// Creates the key for the given calendar day.
    pub fn new(prefix: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            prefix: prefix.into(),
            date,
        }
    }

    /// Creates the key for the UTC day containing `timestamp`, in seconds since the unix epoch.
    ///
    /// Returns `None` if the timestamp is outside the representable date range.
    pub fn from_timestamp(prefix: impl Into<String>, timestamp: i64) -> Option<Self> {
        let date = DateTime::from_timestamp(timestamp, 0)?.date_naive();
        Some(Self::new(prefix, date))
    }

    /// Returns the day of this bucket.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Returns the key of the monthly bucket this day consolidates into.
    pub fn monthly(&self) -> MonthlyKey {
        MonthlyKey {
            prefix: self.prefix.clone(),
            year: self.date.year(),
            month: self.date.month(),
        }
    }
}

impl fmt::Display for DailyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:04}:{:02}:{:02}",
            self.prefix,
            self.date.year(),
            self.date.month(),
            self.date.day()
        )
    }
}

/// Key of the monthly bucket holding the consolidated counters of one month.
///
/// Formatted as `{prefix}:{year:04}:{month:02}`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MonthlyKey {
    prefix: String,
    year: i32,
    month: u32,
}

impl MonthlyKey {
    /// Returns the year of this bucket.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Returns the month of this bucket, starting at `1`.
    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthlyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:04}:{:02}", self.prefix, self.year, self.month)
    }
}

/// Key of the string holding the last consolidated day.
pub fn watermark_key(prefix: &str) -> String {
    format!("{prefix}:last-merge")
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn daily(timestamp: i64) -> DailyKey {
        DailyKey::from_timestamp(DEFAULT_PREFIX, timestamp).unwrap()
    }

    #[test]
    fn test_daily_key_format() {
        // 2024-03-05T10:00:00Z
        assert_snapshot!(daily(1709632800), @"metrics-distinct:2024:03:05");
    }

    #[test]
    fn test_monthly_key_format() {
        assert_snapshot!(daily(1709632800).monthly(), @"metrics-distinct:2024:03");
    }

    #[test]
    fn test_watermark_key() {
        assert_snapshot!(watermark_key(DEFAULT_PREFIX), @"metrics-distinct:last-merge");
    }

    #[test]
    fn test_day_is_utc() {
        // 2024-03-05T23:59:59Z and 2024-03-06T00:00:00Z
        assert_eq!(daily(1709683199).to_string(), "metrics-distinct:2024:03:05");
        assert_eq!(daily(1709683200).to_string(), "metrics-distinct:2024:03:06");
    }

    #[test]
    fn test_keys_distinct_across_boundaries() {
        let last_of_year = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let first_of_year = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end_of_feb = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let first_of_march = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let keys = [last_of_year, first_of_year, end_of_feb, first_of_march]
            .map(|date| DailyKey::new("p", date).to_string());
        assert_eq!(keys, ["p:2023:12:31", "p:2024:01:01", "p:2024:02:29", "p:2024:03:01"]);

        let months = [last_of_year, first_of_year, end_of_feb, first_of_march]
            .map(|date| DailyKey::new("p", date).monthly().to_string());
        assert_eq!(months, ["p:2023:12", "p:2024:01", "p:2024:02", "p:2024:03"]);
    }

    #[test]
    fn test_year_is_four_digits() {
        let early = DailyKey::new("p", NaiveDate::from_ymd_opt(0, 11, 2).unwrap());
        assert_snapshot!(early, @"p:0000:11:02");
        assert_snapshot!(early.monthly(), @"p:0000:11");

        let medieval = DailyKey::new("p", NaiveDate::from_ymd_opt(999, 1, 31).unwrap());
        assert_snapshot!(medieval, @"p:0999:01:31");
    }

    #[test]
    fn test_monthly_depends_on_year_and_month_only() {
        let first = DailyKey::new("p", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let last = DailyKey::new("p", NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(first.monthly(), last.monthly());
        assert_eq!(first.monthly().year(), 2024);
        assert_eq!(first.monthly().month(), 1);
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(daily(1709632800), daily(1709632800 + 3600));
    }

    #[test]
    fn test_unrepresentable_timestamp() {
        assert!(DailyKey::from_timestamp(DEFAULT_PREFIX, i64::MAX).is_none());
    }
}

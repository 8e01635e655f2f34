use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

const FORMAT: &str = "%Y-%m-%d";

/// The persisted watermark could not be parsed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid watermark {0:?}")]
pub struct InvalidWatermark(pub String);

/// Parses a persisted watermark.
///
/// Accepts `YYYY-MM-DD` as well as RFC 2822 date-times, of which the UTC date is used.
pub fn parse(value: &str) -> Result<NaiveDate, InvalidWatermark> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, FORMAT) {
        return Ok(date);
    }

    DateTime::parse_from_rfc2822(value)
        .map(|datetime| datetime.with_timezone(&Utc).date_naive())
        .map_err(|_| InvalidWatermark(value.to_owned()))
}

/// Formats a watermark for persistence.
pub fn format(date: NaiveDate) -> String {
    date.format(FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_format() {
        assert_eq!(format(date(2024, 1, 5)), "2024-01-05");
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse("2024-01-05"), Ok(date(2024, 1, 5)));
    }

    #[test]
    fn test_parse_rfc2822() {
        assert_eq!(
            parse("Fri, 05 Jan 2024 15:04:05 +0000"),
            Ok(date(2024, 1, 5))
        );
    }

    #[test]
    fn test_parse_rfc2822_uses_utc_date() {
        // 2024-01-05T23:30:00-0700 is already the 6th in UTC.
        assert_eq!(
            parse("Fri, 05 Jan 2024 23:30:00 -0700"),
            Ok(date(2024, 1, 6))
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            parse("yesterday"),
            Err(InvalidWatermark("yesterday".to_owned()))
        );
    }
}

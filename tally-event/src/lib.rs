//! The telemetry event and its wire format.
//!
//! Events travel as JSON objects with the content type [`CONTENT_TYPE`]:
//!
//! ```json
//! {"username": "alice", "metric": "login", "count": 1, "timestamp": 1709640000}
//! ```
//!
//! Decoding happens in two steps so that callers can tell malformed payloads apart from
//! well-formed payloads with missing fields: [`RawEvent::parse`] followed by
//! [`RawEvent::validate`]. [`Event::decode`] combines both.
#![warn(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only content type accepted for events.
pub const CONTENT_TYPE: &str = "application/json";

/// A required field of an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventField {
    /// The user who emitted the event.
    Username,
    /// The time of the event in seconds since the unix epoch.
    Timestamp,
    /// The name of the metric.
    Metric,
    /// The numeric value of the event.
    Count,
}

impl EventField {
    /// Returns the name of the field in the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Timestamp => "timestamp",
            Self::Metric => "metric",
            Self::Count => "count",
        }
    }
}

impl fmt::Display for EventField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event is missing a required field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("required {0} property is not present")]
pub struct ValidationError(pub EventField);

/// Failure to turn a payload into an [`Event`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not a JSON object of the expected shape.
    #[error("malformed event payload")]
    Malformed(#[source] serde_json::Error),
    /// The payload is well-formed but a required field is absent.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// An event as it appears on the wire, before validation.
///
/// Every field is optional here; explicit `null` values are treated as absent.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct RawEvent {
    /// The user who emitted the event.
    #[serde(default)]
    pub username: Option<String>,
    /// Seconds since the unix epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// The name of the metric.
    #[serde(default)]
    pub metric: Option<String>,
    /// The numeric value of the event.
    #[serde(default)]
    pub count: Option<i64>,
}

impl RawEvent {
    /// Parses a JSON payload without checking for required fields.
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Checks that all required fields are present.
    ///
    /// Fields are checked in the order username, timestamp, metric, count and the first absent
    /// one is reported.
    pub fn validate(self) -> Result<Event, ValidationError> {
        let Some(username) = self.username else {
            return Err(ValidationError(EventField::Username));
        };
        let Some(timestamp) = self.timestamp else {
            return Err(ValidationError(EventField::Timestamp));
        };
        let Some(metric) = self.metric else {
            return Err(ValidationError(EventField::Metric));
        };
        let Some(count) = self.count else {
            return Err(ValidationError(EventField::Count));
        };

        Ok(Event {
            username,
            metric,
            count,
            timestamp,
        })
    }
}

/// A validated telemetry event.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Event {
    /// The user who emitted the event.
    pub username: String,
    /// The name of the metric, e.g. `login`.
    pub metric: String,
    /// The numeric value of the event.
    pub count: i64,
    /// Seconds since the unix epoch, interpreted as UTC.
    pub timestamp: i64,
}

impl Event {
    /// Parses and validates a JSON payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let raw = RawEvent::parse(payload).map_err(DecodeError::Malformed)?;
        Ok(raw.validate()?)
    }

    /// Serializes the event into its JSON wire format.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_complete() {
        let event = Event::decode(
            br#"{"username":"alice","metric":"login","count":3,"timestamp":1709640000}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            Event {
                username: "alice".to_owned(),
                metric: "login".to_owned(),
                count: 3,
                timestamp: 1709640000,
            }
        );
    }

    #[test]
    fn test_decode_missing_metric() {
        let error =
            Event::decode(br#"{"username":"alice","count":1,"timestamp":1709640000}"#).unwrap_err();

        assert!(matches!(
            error,
            DecodeError::Invalid(ValidationError(EventField::Metric))
        ));
        assert_eq!(error.to_string(), "required metric property is not present");
    }

    #[test]
    fn test_null_is_absent() {
        let error = Event::decode(
            br#"{"username":null,"metric":"login","count":1,"timestamp":1709640000}"#,
        )
        .unwrap_err();

        assert!(matches!(
            error,
            DecodeError::Invalid(ValidationError(EventField::Username))
        ));
    }

    #[test]
    fn test_first_missing_field_is_reported() {
        let error = RawEvent::default().validate().unwrap_err();
        assert_eq!(error, ValidationError(EventField::Username));

        let raw = RawEvent {
            username: Some("bob".to_owned()),
            metric: Some("login".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            raw.validate().unwrap_err(),
            ValidationError(EventField::Timestamp)
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            Event::decode(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            Event::decode(br#"{"username":"alice","count":"many"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let event = Event::decode(
            br#"{"username":"a","metric":"m","count":0,"timestamp":0,"extra":true}"#,
        )
        .unwrap();
        assert_eq!(event.metric, "m");
    }

    #[test]
    fn test_wire_format() {
        let event = Event {
            username: "alice".to_owned(),
            metric: "login".to_owned(),
            count: 1,
            timestamp: 1709640000,
        };

        let json = String::from_utf8(event.to_json().unwrap()).unwrap();
        insta::assert_snapshot!(json, @r#"{"username":"alice","metric":"login","count":1,"timestamp":1709640000}"#);
    }
}

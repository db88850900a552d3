//! tally.event.v1 record definition
//!
//! The normalized shape importers hand to the core, and the shape the event
//! store persists: one timed occurrence with a start instant, a duration in
//! decimal hours and a category key.

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{duration_to_hours, hours_to_duration, EventRecord};

/// Current schema version
pub const SCHEMA_VERSION: &str = "tally.event.v1";

/// Timestamp layouts accepted besides RFC 3339 (calendar exports use a space separator)
const FALLBACK_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"];

/// Event record as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEventRecord {
    /// Start timestamp with UTC offset (ISO 8601 / RFC 3339)
    #[serde(default)]
    pub start: String,
    /// Duration in decimal hours
    #[serde(default, alias = "duration_hours")]
    pub duration: Option<f64>,
    /// Category key
    #[serde(default)]
    pub category: String,
    /// IANA zone the record belongs to; falls back to the pipeline zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl RawEventRecord {
    pub fn new(start: impl Into<String>, duration_hours: f64, category: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            duration: Some(duration_hours),
            category: category.into(),
            timezone: None,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Validate the record and convert it into an [`EventRecord`]
    pub fn validate(&self, default_tz: Tz) -> Result<EventRecord, ValidationError> {
        let tz = match self.timezone.as_deref() {
            Some(name) => parse_timezone(name)?,
            None => default_tz,
        };

        let start = parse_start(&self.start)?.with_timezone(&tz);

        let hours = self
            .duration
            .ok_or_else(|| ValidationError::Malformed("missing duration".to_string()))?;
        if !hours.is_finite() {
            return Err(ValidationError::NonFiniteDuration);
        }
        if hours < 0.0 {
            return Err(ValidationError::NegativeDuration(hours.to_string()));
        }

        EventRecord::new(start, hours_to_duration(hours), self.category.trim())
    }
}

impl From<&EventRecord> for RawEventRecord {
    fn from(record: &EventRecord) -> Self {
        Self {
            start: record.start.to_rfc3339(),
            duration: Some(duration_to_hours(record.duration)),
            category: record.category.clone(),
            timezone: Some(record.timezone().name().to_string()),
        }
    }
}

/// Parse an IANA zone name
pub fn parse_timezone(name: &str) -> Result<Tz, ValidationError> {
    name.parse::<Tz>()
        .map_err(|_| ValidationError::UnknownTimezone(name.to_string()))
}

fn parse_start(value: &str) -> Result<DateTime<FixedOffset>, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidStart {
            value: value.to_string(),
            reason: "missing start".to_string(),
        });
    }

    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(parsed) => Ok(parsed),
        Err(rfc_err) => FALLBACK_FORMATS
            .iter()
            .find_map(|format| DateTime::parse_from_str(trimmed, format).ok())
            .ok_or_else(|| ValidationError::InvalidStart {
                value: value.to_string(),
                reason: rfc_err.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Europe::London;

    #[test]
    fn test_validate_converts_to_zone() {
        let raw = RawEventRecord::new("2024-07-01T08:00:00+00:00", 1.5, "work");
        let record = raw.validate(London).unwrap();

        assert_eq!(record.start, London.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap());
        assert_eq!(record.duration, Duration::minutes(90));
        assert_eq!(record.timezone(), London);
    }

    #[test]
    fn test_explicit_timezone_overrides_default() {
        let raw = RawEventRecord::new("2024-01-01T10:00:00+01:00", 1.0, "work")
            .with_timezone("Europe/Paris");
        let record = raw.validate(London).unwrap();
        assert_eq!(record.timezone(), chrono_tz::Europe::Paris);
    }

    #[test]
    fn test_space_separated_timestamp() {
        let raw = RawEventRecord::new("2024-01-01 23:30:00+0000", 2.0, "sleep");
        assert!(raw.validate(Tz::UTC).is_ok());
    }

    #[test]
    fn test_rejections() {
        let bad_start = RawEventRecord::new("yesterday", 1.0, "work");
        assert!(matches!(
            bad_start.validate(Tz::UTC),
            Err(ValidationError::InvalidStart { .. })
        ));

        let negative = RawEventRecord::new("2024-01-01T10:00:00Z", -0.5, "work");
        assert!(matches!(
            negative.validate(Tz::UTC),
            Err(ValidationError::NegativeDuration(_))
        ));

        let nan = RawEventRecord::new("2024-01-01T10:00:00Z", f64::NAN, "work");
        assert_eq!(nan.validate(Tz::UTC), Err(ValidationError::NonFiniteDuration));

        let no_category = RawEventRecord::new("2024-01-01T10:00:00Z", 1.0, "");
        assert_eq!(no_category.validate(Tz::UTC), Err(ValidationError::MissingCategory));

        let bad_zone =
            RawEventRecord::new("2024-01-01T10:00:00Z", 1.0, "work").with_timezone("Mars/Olympus");
        assert!(matches!(
            bad_zone.validate(Tz::UTC),
            Err(ValidationError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_record_survives_persistence_shape() {
        let record = RawEventRecord::new("2024-03-31T00:30:00+00:00", 2.25, "sleep")
            .validate(London)
            .unwrap();
        let raw = RawEventRecord::from(&record);
        assert_eq!(raw.timezone.as_deref(), Some("Europe/London"));
        assert_eq!(raw.validate(Tz::UTC).unwrap(), record);
    }
}

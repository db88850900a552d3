//! Adapter for turning importer output into validated event records
//!
//! Syntax errors in the document as a whole are fatal; everything that can be
//! attributed to a single record is collected and reported next to its index so
//! one bad line never sinks the batch.

use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::error::{ComputeError, ValidationError};
use crate::schema::raw_record::RawEventRecord;
use crate::types::EventRecord;

/// A record that was rejected, with its position in the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// Zero-based position in the input (array index or line number)
    pub index: usize,
    pub error: ValidationError,
}

/// Parsed importer output
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    /// Structurally valid records with their input position
    pub records: Vec<(usize, RawEventRecord)>,
    /// Records that could not be decoded
    pub rejected: Vec<RejectedRecord>,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adapter for parsing and validating raw records
pub struct RecordAdapter;

impl RecordAdapter {
    /// Parse a JSON array of records
    pub fn parse_array(json: &str) -> Result<RecordBatch, ComputeError> {
        let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let mut batch = RecordBatch::default();
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<RawEventRecord>(value) {
                Ok(record) => batch.records.push((index, record)),
                Err(e) => batch.rejected.push(RejectedRecord {
                    index,
                    error: ValidationError::Malformed(e.to_string()),
                }),
            }
        }
        Ok(batch)
    }

    /// Parse NDJSON (newline-delimited JSON), one record per line.
    ///
    /// Blank lines are skipped but still counted, so indices are file lines.
    pub fn parse_ndjson(ndjson: &str) -> RecordBatch {
        let mut batch = RecordBatch::default();
        let lines = ndjson
            .lines()
            .map(str::trim)
            .enumerate()
            .filter(|(_, line)| !line.is_empty());
        for (index, line) in lines {
            match serde_json::from_str::<RawEventRecord>(line) {
                Ok(record) => batch.records.push((index, record)),
                Err(e) => batch.rejected.push(RejectedRecord {
                    index,
                    error: ValidationError::Malformed(e.to_string()),
                }),
            }
        }
        batch
    }

    /// Validate decoded records, splitting them into events and rejections
    pub fn to_events(batch: RecordBatch, default_tz: Tz) -> (Vec<EventRecord>, Vec<RejectedRecord>) {
        let mut events = Vec::with_capacity(batch.records.len());
        let mut rejected = batch.rejected;

        for (index, raw) in batch.records {
            match raw.validate(default_tz) {
                Ok(event) => events.push(event),
                Err(error) => {
                    debug!(index, %error, "rejecting record");
                    rejected.push(RejectedRecord { index, error });
                }
            }
        }

        rejected.sort_by_key(|r| r.index);
        if !rejected.is_empty() {
            warn!(count = rejected.len(), "rejected malformed records");
        }
        (events, rejected)
    }

    /// Validate a batch without converting, reporting only failures
    pub fn validate_records(batch: &RecordBatch, default_tz: Tz) -> Vec<RejectedRecord> {
        let mut failures: Vec<RejectedRecord> = batch
            .records
            .iter()
            .filter_map(|(index, raw)| {
                raw.validate(default_tz).err().map(|error| RejectedRecord {
                    index: *index,
                    error,
                })
            })
            .chain(batch.rejected.iter().cloned())
            .collect();
        failures.sort_by_key(|r| r.index);
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ndjson_collects_bad_lines() {
        let input = r#"
{"start": "2024-01-01T10:00:00Z", "duration": 1.0, "category": "work"}
not json at all
{"start": "2024-01-01T12:00:00Z", "duration": -1.0, "category": "work"}

{"start": "2024-01-01T14:00:00Z", "duration_hours": 0.5, "category": "reading"}
"#;
        let batch = RecordAdapter::parse_ndjson(input);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].index, 2);

        let (events, rejected) = RecordAdapter::to_events(batch, Tz::UTC);
        assert_eq!(events.len(), 2);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[1].index, 3);
        assert_eq!(batch_indices(RecordAdapter::parse_ndjson(input)), vec![1, 5]);
        assert!(matches!(rejected[1].error, ValidationError::NegativeDuration(_)));
    }

    fn batch_indices(batch: RecordBatch) -> Vec<usize> {
        batch.records.iter().map(|(index, _)| *index).collect()
    }

    #[test]
    fn test_parse_array() {
        let input = r#"[
            {"start": "2024-01-01T10:00:00Z", "duration": 1.0, "category": "work"},
            {"start": 17, "duration": 1.0, "category": "work"}
        ]"#;
        let batch = RecordAdapter::parse_array(input).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].index, 1);
    }

    #[test]
    fn test_parse_array_rejects_broken_document() {
        assert!(RecordAdapter::parse_array("[{").is_err());
    }

    #[test]
    fn test_validate_records_reports_only_failures() {
        let input = r#"[
            {"start": "2024-01-01T10:00:00Z", "duration": 1.0, "category": "work"},
            {"start": "2024-01-01T10:00:00Z", "duration": 1.0}
        ]"#;
        let batch = RecordAdapter::parse_array(input).unwrap();
        let failures = RecordAdapter::validate_records(&batch, Tz::UTC);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error, ValidationError::MissingCategory);
    }
}

//! Pre-merge corrections
//!
//! Imported records are immutable. Known problems in a source (a renamed
//! category, a category that should never be tracked, a sensor that over-reported
//! for a few weeks) are fixed by mapping incoming records to new records before
//! they reach the merger.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ComputeError;
use crate::types::EventRecord;

/// A correction applied to incoming records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correction {
    /// Re-key a category (e.g. "side project" -> "project")
    RenameCategory { from: String, to: String },
    /// Discard a category entirely
    DropCategory { category: String },
    /// Multiply durations of a category within an inclusive local date range
    ScaleDuration {
        category: String,
        from: NaiveDate,
        to: NaiveDate,
        factor: f64,
    },
}

impl Correction {
    pub fn validate(&self) -> Result<(), ComputeError> {
        match self {
            Correction::RenameCategory { from, to } => {
                if from.trim().is_empty() || to.trim().is_empty() {
                    return Err(ComputeError::InvalidConfig(
                        "rename_category needs non-empty 'from' and 'to'".to_string(),
                    ));
                }
            }
            Correction::DropCategory { category } => {
                if category.trim().is_empty() {
                    return Err(ComputeError::InvalidConfig(
                        "drop_category needs a category".to_string(),
                    ));
                }
            }
            Correction::ScaleDuration {
                from, to, factor, ..
            } => {
                if from > to {
                    return Err(ComputeError::InvalidConfig(format!(
                        "scale_duration range is reversed: {from} > {to}"
                    )));
                }
                if !factor.is_finite() || *factor < 0.0 {
                    return Err(ComputeError::InvalidConfig(format!(
                        "scale_duration factor must be a non-negative number, got {factor}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply to one record; `None` drops it
    fn apply(&self, mut record: EventRecord) -> Option<EventRecord> {
        match self {
            Correction::RenameCategory { from, to } => {
                if record.category == *from {
                    record.category = to.clone();
                }
                Some(record)
            }
            Correction::DropCategory { category } => {
                (record.category != *category).then_some(record)
            }
            Correction::ScaleDuration {
                category,
                from,
                to,
                factor,
            } => {
                let date = record.start.date_naive();
                if record.category == *category && date >= *from && date <= *to {
                    let millis = record.duration.num_milliseconds() as f64 * factor;
                    record.duration = Duration::milliseconds(millis.round() as i64);
                }
                Some(record)
            }
        }
    }
}

/// Apply corrections in order, returning the corrected records
pub fn apply_corrections(records: Vec<EventRecord>, corrections: &[Correction]) -> Vec<EventRecord> {
    if corrections.is_empty() {
        return records;
    }

    let before = records.len();
    let corrected: Vec<EventRecord> = records
        .into_iter()
        .filter_map(|record| {
            corrections
                .iter()
                .try_fold(record, |record, correction| correction.apply(record))
        })
        .collect();

    debug!(
        dropped = before - corrected.len(),
        corrections = corrections.len(),
        "applied corrections"
    );
    corrected
}

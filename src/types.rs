//! Core types for the Synheart Tally pipeline
//!
//! This module defines the data structures shared by every stage: timed event
//! records, the open category catalog, and the three-state daily cell used to
//! keep "no activity" apart from "not tracked yet".

use chrono::{DateTime, Duration, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{ComputeError, ValidationError};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Color used for categories missing from the catalog
pub const DEFAULT_CATEGORY_COLOR: &str = "#9e9e9e";

/// Convert decimal hours to a duration with millisecond precision
pub fn hours_to_duration(hours: f64) -> Duration {
    Duration::milliseconds((hours * MILLIS_PER_HOUR).round() as i64)
}

/// Convert a duration to decimal hours
pub fn duration_to_hours(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / MILLIS_PER_HOUR
}

/// Logical date of an instant for a day starting `day_offset` after local midnight
pub fn logical_date_of(instant: &DateTime<Tz>, day_offset: Duration) -> NaiveDate {
    (instant.naive_local() - day_offset).date()
}

/// Audit flags attached to records produced by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Record is one piece of an event cut at a logical-day boundary
    SplitAtDayBoundary,
    /// Split piece ended up with no length
    ZeroDurationAfterSplit,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::SplitAtDayBoundary => "split_at_day_boundary",
            QualityFlag::ZeroDurationAfterSplit => "zero_duration_after_split",
        }
    }
}

/// A single timed occurrence.
///
/// Records are never mutated in place once imported; corrections and splits
/// build new records.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Start instant, always zone-aware
    pub start: DateTime<Tz>,
    /// Elapsed time, never negative
    pub duration: Duration,
    /// Key into the open category catalog
    pub category: String,
    /// Flags added by pipeline stages (not part of record identity)
    pub quality_flags: Vec<QualityFlag>,
}

impl EventRecord {
    /// Create a record, rejecting negative durations and empty categories
    pub fn new(
        start: DateTime<Tz>,
        duration: Duration,
        category: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let category = category.into();
        if duration < Duration::zero() {
            return Err(ValidationError::NegativeDuration(format!(
                "{}",
                duration_to_hours(duration)
            )));
        }
        if category.trim().is_empty() {
            return Err(ValidationError::MissingCategory);
        }
        Ok(Self {
            start,
            duration,
            category,
            quality_flags: Vec::new(),
        })
    }

    /// End instant (exclusive)
    pub fn end(&self) -> DateTime<Tz> {
        self.start + self.duration
    }

    /// Zone the record was captured in
    pub fn timezone(&self) -> Tz {
        self.start.timezone()
    }

    /// Logical day the record starts on, for a day that begins `day_offset` after local midnight.
    ///
    /// Computed on the wall clock so that DST transitions do not move the boundary.
    pub fn logical_date(&self, day_offset: Duration) -> NaiveDate {
        logical_date_of(&self.start, day_offset)
    }

    pub fn duration_hours(&self) -> f64 {
        duration_to_hours(self.duration)
    }

    /// Instantaneous marker (zero duration)
    pub fn is_marker(&self) -> bool {
        self.duration == Duration::zero()
    }

    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.quality_flags.contains(&flag)
    }

    /// Copy of this record with a different start and duration, flags preserved
    pub(crate) fn reshaped(&self, start: DateTime<Tz>, duration: Duration) -> Self {
        Self {
            start,
            duration,
            category: self.category.clone(),
            quality_flags: self.quality_flags.clone(),
        }
    }

    pub(crate) fn push_flag(&mut self, flag: QualityFlag) {
        if !self.quality_flags.contains(&flag) {
            self.quality_flags.push(flag);
        }
    }
}

/// Cosmetic metadata for a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMeta {
    /// Display name
    pub name: String,
    /// Display color (CSS notation)
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    DEFAULT_CATEGORY_COLOR.to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    category: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

/// Ordered, open mapping from category key to display metadata.
///
/// Only the key takes part in aggregation. Categories that are not listed are
/// still valid and get default metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryCatalog {
    entries: Vec<(String, CategoryMeta)>,
}

impl CategoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from JSON.
    ///
    /// Accepts either an ordered array of `{category, name, color}` entries or an
    /// object keyed by category (which loses ordering and is sorted by key).
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        match value {
            serde_json::Value::Array(_) => {
                let entries: Vec<CatalogEntry> = serde_json::from_value(value)?;
                for entry in entries {
                    let name = entry.name.unwrap_or_else(|| entry.category.clone());
                    let color = entry.color.unwrap_or_else(default_color);
                    catalog.insert(entry.category, CategoryMeta { name, color });
                }
            }
            serde_json::Value::Object(map) => {
                for (category, meta) in map {
                    let meta: CategoryMeta = serde_json::from_value(meta)?;
                    catalog.insert(category, meta);
                }
            }
            other => {
                return Err(ComputeError::ParseError(format!(
                    "category catalog must be an array or object, got {other}"
                )))
            }
        }
        Ok(catalog)
    }

    /// Insert or replace a category; replacing keeps its position
    pub fn insert(&mut self, category: impl Into<String>, meta: CategoryMeta) {
        let category = category.into();
        match self.entries.iter_mut().find(|(key, _)| *key == category) {
            Some((_, existing)) => *existing = meta,
            None => self.entries.push((category, meta)),
        }
    }

    pub fn contains(&self, category: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == category)
    }

    /// Metadata for a category, falling back to defaults for unknown keys
    pub fn meta(&self, category: &str) -> CategoryMeta {
        self.entries
            .iter()
            .find(|(key, _)| key == category)
            .map(|(_, meta)| meta.clone())
            .unwrap_or_else(|| CategoryMeta {
                name: category.to_string(),
                color: default_color(),
            })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Column order for a table: catalog order first, then unlisted observed
    /// categories sorted by key
    pub fn columns<'a>(&self, observed: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut columns: Vec<String> = self.keys().map(str::to_string).collect();
        let mut extras: Vec<String> = observed
            .into_iter()
            .filter(|category| !self.contains(category))
            .map(str::to_string)
            .collect();
        extras.sort();
        extras.dedup();
        columns.extend(extras);
        columns
    }
}

/// Daily matrix cell.
///
/// `Untracked` means the category had never been observed on or before the
/// day; `Zero` means tracking had started but nothing happened that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Untracked,
    Zero,
    Active(Duration),
}

impl Cell {
    /// Cell for an observed total
    pub fn observed(total: Duration) -> Self {
        if total > Duration::zero() {
            Cell::Active(total)
        } else {
            Cell::Zero
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Cell::Untracked)
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Cell::Untracked => None,
            Cell::Zero => Some(Duration::zero()),
            Cell::Active(total) => Some(*total),
        }
    }

    pub fn hours(&self) -> Option<f64> {
        self.duration().map(duration_to_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::London;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        London.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result = EventRecord::new(at(2024, 1, 1, 10, 0), Duration::minutes(-5), "work");
        assert!(matches!(result, Err(ValidationError::NegativeDuration(_))));
    }

    #[test]
    fn test_zero_duration_is_a_marker() {
        let record = EventRecord::new(at(2024, 1, 1, 10, 0), Duration::zero(), "work").unwrap();
        assert!(record.is_marker());
        assert_eq!(record.end(), record.start);
    }

    #[test]
    fn test_blank_category_rejected() {
        let result = EventRecord::new(at(2024, 1, 1, 10, 0), Duration::hours(1), "  ");
        assert_eq!(result.unwrap_err(), ValidationError::MissingCategory);
    }

    #[test]
    fn test_logical_date_with_offset() {
        let record = EventRecord::new(at(2024, 1, 2, 2, 30), Duration::hours(5), "sleep").unwrap();
        assert_eq!(
            record.logical_date(Duration::zero()),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
        assert_eq!(
            record.logical_date(Duration::hours(4)),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_hours_conversion() {
        assert_eq!(hours_to_duration(1.5), Duration::minutes(90));
        assert!((duration_to_hours(Duration::seconds(5400)) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_catalog_falls_back_for_unknown_category() {
        let catalog = CategoryCatalog::from_json(
            r##"[{"category": "work", "name": "Work", "color": "#ff0000"}]"##,
        )
        .unwrap();
        assert_eq!(catalog.meta("work").name, "Work");

        let unknown = catalog.meta("gardening");
        assert_eq!(unknown.name, "gardening");
        assert_eq!(unknown.color, DEFAULT_CATEGORY_COLOR);
    }

    #[test]
    fn test_catalog_columns_order() {
        let mut catalog = CategoryCatalog::new();
        catalog.insert("sleep", CategoryMeta { name: "Sleep".into(), color: "#000".into() });
        catalog.insert("work", CategoryMeta { name: "Work".into(), color: "#fff".into() });

        let columns = catalog.columns(["reading", "work", "cooking", "reading"]);
        assert_eq!(columns, vec!["sleep", "work", "cooking", "reading"]);
    }

    #[test]
    fn test_catalog_object_form() {
        let catalog =
            CategoryCatalog::from_json(r#"{"work": {"name": "Work"}, "sleep": {"name": "Sleep"}}"#)
                .unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.meta("work").color, DEFAULT_CATEGORY_COLOR);
    }

    #[test]
    fn test_cell_states() {
        assert_eq!(Cell::observed(Duration::zero()), Cell::Zero);
        assert_eq!(Cell::observed(Duration::hours(2)), Cell::Active(Duration::hours(2)));
        assert_eq!(Cell::Untracked.hours(), None);
        assert_eq!(Cell::Zero.hours(), Some(0.0));
        assert!(!Cell::Untracked.is_known());
    }
}

//! Event merging
//!
//! Combines a previously persisted event set with freshly imported records into
//! one chronologically ordered, de-duplicated set. Importers re-fetch an
//! overlapping window on every run, so the same record routinely arrives twice;
//! duplicates are dropped, never summed.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::corrections::{apply_corrections, Correction};
use crate::schema::{RecordAdapter, RecordBatch, RejectedRecord};
use crate::types::EventRecord;

/// Default re-fetch window for incremental imports
pub const DEFAULT_REFETCH_LOOKBACK_DAYS: i64 = 7;

/// Fields that make two records the same occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// `(start, category)`: tolerant of duration edits and float rounding
    #[default]
    StartCategory,
    /// `(start, category, duration)`: keeps re-measured records side by side
    StartCategoryDuration,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct RecordKey {
    start: DateTime<Utc>,
    category: String,
    duration_ms: Option<i64>,
}

impl DedupKey {
    fn key_for(&self, record: &EventRecord) -> RecordKey {
        RecordKey {
            start: record.start.with_timezone(&Utc),
            category: record.category.clone(),
            duration_ms: match self {
                DedupKey::StartCategory => None,
                DedupKey::StartCategoryDuration => Some(record.duration.num_milliseconds()),
            },
        }
    }
}

/// Ordered, de-duplicated event set; the source of truth that gets persisted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedEventSet {
    events: Vec<EventRecord>,
}

impl MergedEventSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a canonical set from arbitrary records (first occurrence wins)
    pub fn from_events(events: Vec<EventRecord>, key: DedupKey) -> Self {
        EventMerger::new(key).merge(&Self::new(), events).merged
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<EventRecord> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first_start(&self) -> Option<DateTime<Tz>> {
        self.events.first().map(|e| e.start)
    }

    pub fn last_start(&self) -> Option<DateTime<Tz>> {
        self.events.last().map(|e| e.start)
    }

    /// Instant an importer should re-fetch from to catch late edits
    pub fn refetch_since(&self, lookback: Duration) -> Option<DateTime<Tz>> {
        self.last_start().map(|last| last - lookback)
    }
}

/// Result of a merge
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub merged: MergedEventSet,
    /// Incoming records that were new
    pub added: usize,
    /// Incoming records dropped as duplicates
    pub duplicates: usize,
    /// Incoming records rejected during validation
    pub rejected: Vec<RejectedRecord>,
}

/// Merger for reconciling incoming records against an existing set
#[derive(Debug, Clone, Copy, Default)]
pub struct EventMerger {
    key: DedupKey,
}

impl EventMerger {
    pub fn new(key: DedupKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> DedupKey {
        self.key
    }

    /// Merge validated records into `existing`.
    ///
    /// Existing records take precedence over incoming ones with the same key, so
    /// manual corrections already in the store are never overwritten. Pure: no I/O.
    pub fn merge(&self, existing: &MergedEventSet, incoming: Vec<EventRecord>) -> MergeOutcome {
        let mut seen: HashSet<RecordKey> = HashSet::with_capacity(existing.len() + incoming.len());
        let mut events: Vec<EventRecord> = Vec::with_capacity(existing.len() + incoming.len());

        for record in existing.iter() {
            if seen.insert(self.key.key_for(record)) {
                events.push(record.clone());
            }
        }

        let incoming_len = incoming.len();
        let mut added = 0;
        for record in incoming {
            if seen.insert(self.key.key_for(&record)) {
                events.push(record);
                added += 1;
            }
        }

        events.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| a.category.cmp(&b.category))
                .then_with(|| a.duration.cmp(&b.duration))
        });

        let duplicates = incoming_len - added;
        debug!(added, duplicates, total = events.len(), "merged events");

        MergeOutcome {
            merged: MergedEventSet { events },
            added,
            duplicates,
            rejected: Vec::new(),
        }
    }

    /// Validate, correct and merge importer output.
    ///
    /// Malformed records are rejected one by one and reported in the outcome;
    /// the rest of the batch is merged.
    pub fn merge_raw(
        &self,
        existing: &MergedEventSet,
        batch: RecordBatch,
        default_tz: Tz,
        corrections: &[Correction],
    ) -> MergeOutcome {
        let (events, rejected) = RecordAdapter::to_events(batch, default_tz);
        let events = apply_corrections(events, corrections);

        let mut outcome = self.merge(existing, events);
        outcome.rejected = rejected;

        info!(
            added = outcome.added,
            duplicates = outcome.duplicates,
            rejected = outcome.rejected.len(),
            total = outcome.merged.len(),
            "reconciled incoming records"
        );
        outcome
    }
}

//! Time-of-day heatmap
//!
//! Counts, per category, how many events cover each minute of the local day.
//! Events are first split at local midnight so that every piece maps onto one
//! day's 1440 slots.

use chrono::{Duration, NaiveDate, Timelike};
use serde::Serialize;
use tracing::debug;

use crate::merge::MergedEventSet;
use crate::split::split_for_calendar_day;
use crate::types::{CategoryCatalog, EventRecord};

/// Minute slots in a day
pub const MINUTES_PER_DAY: usize = 1440;

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Minute-of-day × category occupancy counts
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    categories: Vec<String>,
    /// `counts[slot][category]`
    counts: Vec<Vec<u32>>,
}

/// Serializable heatmap row
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapRow {
    pub time: String,
    pub counts: Vec<u32>,
}

/// Serializable heatmap
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapTable {
    pub categories: Vec<String>,
    pub rows: Vec<HeatmapRow>,
}

impl Heatmap {
    fn empty(categories: Vec<String>) -> Self {
        let width = categories.len();
        Self {
            categories,
            counts: vec![vec![0; width]; MINUTES_PER_DAY],
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn count(&self, slot: usize, category: &str) -> Option<u32> {
        let column = self.categories.iter().position(|c| c == category)?;
        self.counts.get(slot).map(|row| row[column])
    }

    pub fn column(&self, category: &str) -> Option<Vec<u32>> {
        let column = self.categories.iter().position(|c| c == category)?;
        Some(self.counts.iter().map(|row| row[column]).collect())
    }

    /// Sum over all slots and categories
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .flatten()
            .map(|count| u64::from(*count))
            .sum()
    }

    pub fn to_table(&self) -> HeatmapTable {
        HeatmapTable {
            categories: self.categories.clone(),
            rows: self
                .counts
                .iter()
                .enumerate()
                .map(|(slot, counts)| HeatmapRow {
                    time: slot_label(slot),
                    counts: counts.clone(),
                })
                .collect(),
        }
    }
}

/// `HH:MM` label of a minute slot
pub fn slot_label(slot: usize) -> String {
    let slot = slot % MINUTES_PER_DAY;
    format!("{:02}:{:02}", slot / 60, slot % 60)
}

/// Minute slots covered by a piece that lies within one local day.
///
/// Slots follow the wall clock, so a piece crossing a DST change covers the
/// local span from its start to its end rather than its elapsed time.
fn covered_slots(piece: &EventRecord) -> impl Iterator<Item = usize> {
    let start_local = piece.start.naive_local();
    let time = start_local.time();
    let start_ms = i64::from(time.num_seconds_from_midnight()) * 1000
        + i64::from(time.nanosecond() / 1_000_000);

    let wall_ms = (piece.end().naive_local() - start_local).num_milliseconds();
    // an end that repeats an earlier wall time after fall-back falls back to elapsed time
    let span_ms = if wall_ms > 0 {
        wall_ms
    } else {
        piece.duration.num_milliseconds()
    };
    let end_ms = start_ms + span_ms;

    let first = start_ms / MILLIS_PER_MINUTE;
    let last = if piece.duration > Duration::zero() {
        (end_ms + MILLIS_PER_MINUTE - 1) / MILLIS_PER_MINUTE
    } else {
        first + 1
    };
    (first..last).map(|slot| slot as usize % MINUTES_PER_DAY)
}

/// Build the heatmap from pieces on or after `start_date`
pub fn build_heatmap(
    events: &MergedEventSet,
    catalog: &CategoryCatalog,
    start_date: NaiveDate,
) -> Heatmap {
    let pieces: Vec<EventRecord> = events
        .iter()
        .flat_map(|event| split_for_calendar_day(event, Duration::zero()))
        .filter(|piece| piece.logical_date(Duration::zero()) >= start_date)
        .collect();

    let categories = catalog.columns(pieces.iter().map(|piece| piece.category.as_str()));
    let mut heatmap = Heatmap::empty(categories);

    for piece in &pieces {
        let Some(column) = heatmap.categories.iter().position(|c| *c == piece.category) else {
            continue;
        };
        for slot in covered_slots(piece) {
            heatmap.counts[slot][column] += 1;
        }
    }

    debug!(
        pieces = pieces.len(),
        categories = heatmap.categories.len(),
        %start_date,
        "built time-of-day heatmap"
    );
    heatmap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::DedupKey;
    use chrono::{DateTime, TimeZone};
    use chrono_tz::Tz;
    use pretty_assertions::assert_eq;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    fn make_test_set(events: Vec<(DateTime<Tz>, Duration, &str)>) -> MergedEventSet {
        MergedEventSet::from_events(
            events
                .into_iter()
                .map(|(start, duration, category)| EventRecord::new(start, duration, category).unwrap())
                .collect(),
            DedupKey::default(),
        )
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_slots_cover_half_open_interval() {
        let set = make_test_set(vec![(at(1, 9, 0), Duration::minutes(30), "work")]);
        let heatmap = build_heatmap(&set, &CategoryCatalog::new(), date(1));

        assert_eq!(heatmap.count(9 * 60 - 1, "work"), Some(0));
        assert_eq!(heatmap.count(9 * 60, "work"), Some(1));
        assert_eq!(heatmap.count(9 * 60 + 29, "work"), Some(1));
        assert_eq!(heatmap.count(9 * 60 + 30, "work"), Some(0));
        assert_eq!(heatmap.total(), 30);
    }

    #[test]
    fn test_partial_minutes_count_their_slot() {
        let start = at(1, 9, 0) + Duration::seconds(30);
        let set = make_test_set(vec![(start, Duration::seconds(60), "call")]);
        let heatmap = build_heatmap(&set, &CategoryCatalog::new(), date(1));

        assert_eq!(heatmap.count(540, "call"), Some(1));
        assert_eq!(heatmap.count(541, "call"), Some(1));
        assert_eq!(heatmap.total(), 2);
    }

    #[test]
    fn test_overnight_event_wraps_to_morning() {
        let set = make_test_set(vec![(at(1, 23, 0), Duration::hours(2), "sleep")]);
        let heatmap = build_heatmap(&set, &CategoryCatalog::new(), date(1));

        assert_eq!(heatmap.count(23 * 60, "sleep"), Some(1));
        assert_eq!(heatmap.count(1439, "sleep"), Some(1));
        assert_eq!(heatmap.count(0, "sleep"), Some(1));
        assert_eq!(heatmap.count(59, "sleep"), Some(1));
        assert_eq!(heatmap.count(60, "sleep"), Some(0));
        assert_eq!(heatmap.total(), 120);
    }

    #[test]
    fn test_start_date_filters_pieces() {
        let set = make_test_set(vec![
            (at(1, 23, 0), Duration::hours(2), "sleep"),
            (at(1, 9, 0), Duration::hours(1), "work"),
        ]);
        let heatmap = build_heatmap(&set, &CategoryCatalog::new(), date(2));

        // only the after-midnight piece of the sleep event counts
        assert_eq!(heatmap.categories(), &["sleep".to_string()]);
        assert_eq!(heatmap.count(23 * 60, "sleep"), Some(0));
        assert_eq!(heatmap.total(), 60);
    }

    #[test]
    fn test_marker_counts_one_slot() {
        let set = make_test_set(vec![(at(1, 7, 15), Duration::zero(), "weigh-in")]);
        let heatmap = build_heatmap(&set, &CategoryCatalog::new(), date(1));

        assert_eq!(heatmap.count(7 * 60 + 15, "weigh-in"), Some(1));
        assert_eq!(heatmap.total(), 1);
    }

    #[test]
    fn test_overlapping_events_stack() {
        let set = make_test_set(vec![
            (at(1, 9, 0), Duration::minutes(10), "work"),
            (at(2, 9, 5), Duration::minutes(10), "work"),
        ]);
        let heatmap = build_heatmap(&set, &CategoryCatalog::new(), date(1));
        assert_eq!(heatmap.count(9 * 60 + 7, "work"), Some(2));
        assert_eq!(heatmap.column("work").unwrap().len(), MINUTES_PER_DAY);
    }

    #[test]
    fn test_fall_back_day_follows_wall_clock() {
        // 00:30 BST + 4h ends at 03:30 GMT
        let start = chrono_tz::Europe::London.with_ymd_and_hms(2024, 10, 27, 0, 30, 0).unwrap();
        let set = make_test_set(vec![(start, Duration::hours(4), "sleep")]);
        let day = NaiveDate::from_ymd_opt(2024, 10, 27).unwrap();
        let heatmap = build_heatmap(&set, &CategoryCatalog::new(), day);

        assert_eq!(heatmap.count(30, "sleep"), Some(1));
        assert_eq!(heatmap.count(3 * 60 + 29, "sleep"), Some(1));
        assert_eq!(heatmap.count(3 * 60 + 30, "sleep"), Some(0));
        assert_eq!(heatmap.count(3 * 60 + 45, "sleep"), Some(0));
        assert_eq!(heatmap.count(4 * 60, "sleep"), Some(0));
        assert_eq!(heatmap.total(), 180);
    }

    #[test]
    fn test_spring_forward_day_follows_wall_clock() {
        // 00:30 GMT + 2h ends at 03:30 BST
        let start = chrono_tz::Europe::London.with_ymd_and_hms(2024, 3, 31, 0, 30, 0).unwrap();
        let set = make_test_set(vec![(start, Duration::hours(2), "sleep")]);
        let day = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let heatmap = build_heatmap(&set, &CategoryCatalog::new(), day);

        assert_eq!(heatmap.count(30, "sleep"), Some(1));
        assert_eq!(heatmap.count(3 * 60 + 29, "sleep"), Some(1));
        assert_eq!(heatmap.count(3 * 60 + 30, "sleep"), Some(0));
        assert_eq!(heatmap.total(), 180);
    }

    #[test]
    fn test_table_labels() {
        assert_eq!(slot_label(0), "00:00");
        assert_eq!(slot_label(601), "10:01");
        let heatmap = build_heatmap(&MergedEventSet::new(), &CategoryCatalog::new(), date(1));
        let table = heatmap.to_table();
        assert_eq!(table.rows.len(), MINUTES_PER_DAY);
        assert_eq!(table.rows[1439].time, "23:59");
    }
}

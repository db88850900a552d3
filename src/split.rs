//! Interval splitting at logical-day boundaries
//!
//! Calendar views and the daily matrix need every record confined to a single
//! logical day. A logical day starts `day_offset` after local midnight, so with
//! a 4 hour offset a 01:00 sleep record still belongs to the previous evening.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone};
use chrono_tz::Tz;
use tracing::debug;

use crate::types::{logical_date_of, EventRecord, QualityFlag};

/// Distance between a piece's exclusive end and its last representable instant
pub const BOUNDARY_EPSILON_SECONDS: i64 = 1;

/// Longest DST gap we step over when a boundary falls into one
const MAX_GAP_MINUTES: i64 = 180;

/// Logical-day offsets, with optional per-category overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayBoundary {
    default_offset: Duration,
    per_category: HashMap<String, Duration>,
}

impl DayBoundary {
    /// Days start at local midnight
    pub fn midnight() -> Self {
        Self::default()
    }

    pub fn with_offset(offset: Duration) -> Self {
        Self {
            default_offset: offset,
            per_category: HashMap::new(),
        }
    }

    /// Override the offset for one category (e.g. sleep starting days at 04:00)
    pub fn with_category_offset(mut self, category: impl Into<String>, offset: Duration) -> Self {
        self.per_category.insert(category.into(), offset);
        self
    }

    pub fn default_offset(&self) -> Duration {
        self.default_offset
    }

    pub fn offset_for(&self, category: &str) -> Duration {
        self.per_category
            .get(category)
            .copied()
            .unwrap_or(self.default_offset)
    }
}

/// First instant of a logical day in the given zone.
///
/// Ambiguous local times resolve to the earliest instant; a boundary inside a
/// DST gap moves to the first valid instant after it.
pub fn logical_day_start(date: NaiveDate, day_offset: Duration, tz: Tz) -> DateTime<Tz> {
    let naive = date.and_time(chrono::NaiveTime::MIN) + day_offset;
    if let Some(instant) = tz.from_local_datetime(&naive).earliest() {
        return instant;
    }
    (1..=MAX_GAP_MINUTES)
        .find_map(|minutes| {
            tz.from_local_datetime(&(naive + Duration::minutes(minutes)))
                .earliest()
        })
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// Last representable instant of a piece (its exclusive end minus epsilon)
pub fn last_instant(record: &EventRecord) -> DateTime<Tz> {
    let epsilon = Duration::seconds(BOUNDARY_EPSILON_SECONDS);
    if record.duration >= epsilon {
        record.end() - epsilon
    } else {
        record.start
    }
}

/// Split an event so that every piece falls within one logical day.
///
/// Returns the event unchanged when it already fits. Otherwise pieces abut at
/// the boundaries, their durations sum to the original exactly, and each carries
/// [`QualityFlag::SplitAtDayBoundary`]. Pieces shorter than a second are kept and
/// flagged [`QualityFlag::ZeroDurationAfterSplit`].
pub fn split_for_calendar_day(event: &EventRecord, day_offset: Duration) -> Vec<EventRecord> {
    let tz = event.timezone();
    let end = event.end();
    let mut pieces = Vec::new();
    let mut cursor = event.start;

    loop {
        let day = logical_date_of(&cursor, day_offset);
        let next_boundary = day
            .succ_opt()
            .map(|next| logical_day_start(next, day_offset, tz))
            .filter(|boundary| *boundary > cursor);

        match next_boundary {
            Some(boundary) if end > boundary => {
                pieces.push(event.reshaped(cursor, boundary - cursor));
                cursor = boundary;
            }
            _ => {
                pieces.push(event.reshaped(cursor, end - cursor));
                break;
            }
        }
    }

    if pieces.len() == 1 {
        return vec![event.clone()];
    }

    let epsilon = Duration::seconds(BOUNDARY_EPSILON_SECONDS);
    for piece in &mut pieces {
        piece.push_flag(QualityFlag::SplitAtDayBoundary);
        if piece.duration < epsilon {
            piece.push_flag(QualityFlag::ZeroDurationAfterSplit);
        }
    }
    debug!(
        category = %event.category,
        start = %event.start,
        pieces = pieces.len(),
        "split event at day boundaries"
    );
    pieces
}

/// Split every event using the offset configured for its category
pub fn split_events<'a>(
    events: impl IntoIterator<Item = &'a EventRecord>,
    boundary: &DayBoundary,
) -> Vec<EventRecord> {
    events
        .into_iter()
        .flat_map(|event| split_for_calendar_day(event, boundary.offset_for(&event.category)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::London;
    use pretty_assertions::assert_eq;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn event(start: DateTime<Tz>, duration: Duration, category: &str) -> EventRecord {
        EventRecord::new(start, duration, category).unwrap()
    }

    fn total(pieces: &[EventRecord]) -> Duration {
        pieces.iter().fold(Duration::zero(), |acc, p| acc + p.duration)
    }

    #[test]
    fn test_event_within_one_day_is_unchanged() {
        let e = event(utc(2024, 1, 1, 9, 0, 0), Duration::hours(2), "work");
        assert_eq!(split_for_calendar_day(&e, Duration::zero()), vec![e]);
    }

    #[test]
    fn test_overnight_split_at_midnight() {
        let e = event(utc(2024, 1, 1, 23, 30, 0), Duration::hours(2), "sleep");
        let pieces = split_for_calendar_day(&e, Duration::zero());

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].start, utc(2024, 1, 1, 23, 30, 0));
        assert_eq!(pieces[0].duration, Duration::minutes(30));
        assert_eq!(last_instant(&pieces[0]), utc(2024, 1, 1, 23, 59, 59));
        assert_eq!(pieces[1].start, utc(2024, 1, 2, 0, 0, 0));
        assert_eq!(pieces[1].duration, Duration::minutes(90));
        assert!(pieces.iter().all(|p| p.has_flag(QualityFlag::SplitAtDayBoundary)));
    }

    #[test]
    fn test_offset_keeps_overnight_sleep_on_previous_day() {
        let e = event(utc(2024, 1, 1, 23, 0, 0), Duration::hours(8), "sleep");
        let pieces = split_for_calendar_day(&e, Duration::hours(4));

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].duration, Duration::hours(5));
        assert_eq!(pieces[1].start, utc(2024, 1, 2, 4, 0, 0));
        assert_eq!(pieces[1].logical_date(Duration::hours(4)), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn test_multi_day_event_conserves_duration() {
        let duration = Duration::hours(75) + Duration::milliseconds(1234);
        let e = event(utc(2024, 1, 1, 18, 15, 0), duration, "travel");
        let pieces = split_for_calendar_day(&e, Duration::zero());

        assert_eq!(pieces.len(), 4);
        assert_eq!(total(&pieces), duration);
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start);
        }
        let dates: Vec<NaiveDate> = pieces
            .iter()
            .map(|p| p.logical_date(Duration::zero()))
            .collect();
        let mut unique = dates.clone();
        unique.dedup();
        assert_eq!(dates, unique);
    }

    #[test]
    fn test_exact_day_from_boundary_is_one_piece() {
        let e = event(utc(2024, 1, 1, 4, 0, 0), Duration::hours(24), "holiday");
        assert_eq!(split_for_calendar_day(&e, Duration::hours(4)).len(), 1);

        let midnight = event(utc(2024, 1, 1, 0, 0, 0), Duration::hours(24), "holiday");
        assert_eq!(split_for_calendar_day(&midnight, Duration::zero()).len(), 1);
    }

    #[test]
    fn test_zero_duration_marker_passes_through() {
        let e = event(utc(2024, 1, 1, 0, 0, 0), Duration::zero(), "weigh-in");
        let pieces = split_for_calendar_day(&e, Duration::zero());
        assert_eq!(pieces, vec![e]);
    }

    #[test]
    fn test_sub_second_piece_is_kept_and_flagged() {
        let start = utc(2024, 1, 1, 23, 59, 59) + Duration::milliseconds(700);
        let e = event(start, Duration::hours(1), "work");
        let pieces = split_for_calendar_day(&e, Duration::zero());

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].duration, Duration::milliseconds(300));
        assert!(pieces[0].has_flag(QualityFlag::ZeroDurationAfterSplit));
        assert!(!pieces[1].has_flag(QualityFlag::ZeroDurationAfterSplit));
        assert_eq!(total(&pieces), Duration::hours(1));
    }

    #[test]
    fn test_split_across_dst_change() {
        // Clocks go forward at 01:00 GMT on 2024-03-31
        let start = London.with_ymd_and_hms(2024, 3, 30, 22, 0, 0).unwrap();
        let e = event(start, Duration::hours(10), "sleep");
        let pieces = split_for_calendar_day(&e, Duration::zero());

        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].duration, Duration::hours(2));
        assert_eq!(pieces[1].start, London.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap());
        assert_eq!(total(&pieces), Duration::hours(10));
    }

    #[test]
    fn test_boundary_inside_dst_gap() {
        // 01:30 does not exist in London on 2024-03-31; the day starts at 02:00 BST
        let start = logical_day_start(
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            Duration::minutes(90),
            London,
        );
        assert_eq!(start, London.with_ymd_and_hms(2024, 3, 31, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_split_events_uses_category_offsets() {
        let boundary = DayBoundary::midnight().with_category_offset("sleep", Duration::hours(4));
        let events = vec![
            event(utc(2024, 1, 1, 23, 0, 0), Duration::hours(3), "sleep"),
            event(utc(2024, 1, 1, 23, 0, 0), Duration::hours(3), "gaming"),
        ];

        let pieces = split_events(&events, &boundary);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].category, "sleep");
        assert_eq!(boundary.offset_for("gaming"), Duration::zero());
    }
}

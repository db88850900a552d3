//! Weekly resampling
//!
//! Buckets are half-open `[week_start, week_start + 7 days)` and labeled by
//! their first day, which always falls on the anchor weekday. Unknown days never
//! count as zero: a week with no known day stays unknown, and means divide by
//! the number of known days rather than by seven.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::daily::{DailyMatrix, DaySeries};
use crate::types::EventRecord;

/// Weekly aggregation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Sum of known values
    #[default]
    Sum,
    /// Sum divided by the number of known values
    Mean,
    /// Number of known values (e.g. sessions per week)
    Count,
}

/// First day of the week containing `date`
pub fn week_start(date: NaiveDate, anchor: Weekday) -> NaiveDate {
    let back = (7 + date.weekday().num_days_from_monday() - anchor.num_days_from_monday()) % 7;
    date - Duration::days(i64::from(back))
}

/// Weekly values labeled by week start; `None` marks an unknown week
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklySeries {
    pub anchor: Weekday,
    pub points: Vec<(NaiveDate, Option<f64>)>,
}

impl WeeklySeries {
    pub fn empty(anchor: Weekday) -> Self {
        Self {
            anchor,
            points: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Value for the week containing `date`
    pub fn value_for(&self, date: NaiveDate) -> Option<f64> {
        let start = week_start(date, self.anchor);
        self.points
            .iter()
            .find(|(week, _)| *week == start)
            .and_then(|(_, value)| *value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    sum: f64,
    known: usize,
}

impl Bucket {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.known += 1;
    }

    fn finish(&self, agg: Aggregation) -> Option<f64> {
        if self.known == 0 {
            return None;
        }
        Some(match agg {
            Aggregation::Sum => self.sum,
            Aggregation::Mean => self.sum / self.known as f64,
            Aggregation::Count => self.known as f64,
        })
    }
}

/// Emit a contiguous week axis from the first to the last bucket
fn contiguous(
    buckets: &BTreeMap<NaiveDate, Bucket>,
    anchor: Weekday,
    fill: impl Fn(&Bucket) -> Option<f64>,
    missing: Option<f64>,
) -> WeeklySeries {
    let (Some(first), Some(last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        return WeeklySeries::empty(anchor);
    };

    let mut points = Vec::new();
    let mut week = *first;
    while week <= *last {
        let value = buckets.get(&week).map_or(missing, &fill);
        points.push((week, value));
        week += Duration::days(7);
    }
    WeeklySeries { anchor, points }
}

/// Resample a day series into weekly buckets
pub fn resample_weekly(series: &DaySeries, anchor: Weekday, agg: Aggregation) -> WeeklySeries {
    let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
    for (date, value) in &series.points {
        let bucket = buckets.entry(week_start(*date, anchor)).or_default();
        if let Some(value) = value {
            bucket.add(*value);
        }
    }
    contiguous(&buckets, anchor, |bucket| bucket.finish(agg), None)
}

/// Resample raw events by their local start instant.
///
/// Weeks between the first and last event with no events are zero for `Sum`
/// and `Count` and unknown for `Mean`.
pub fn resample_events<'a, F>(
    events: impl IntoIterator<Item = &'a EventRecord>,
    anchor: Weekday,
    agg: Aggregation,
    value: F,
) -> WeeklySeries
where
    F: Fn(&EventRecord) -> f64,
{
    let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
    for event in events {
        let week = week_start(event.start.date_naive(), anchor);
        buckets.entry(week).or_default().add(value(event));
    }
    let missing = match agg {
        Aggregation::Sum | Aggregation::Count => Some(0.0),
        Aggregation::Mean => None,
    };
    contiguous(&buckets, anchor, |bucket| bucket.finish(agg), missing)
}

/// Weekly aggregate of every column of a daily matrix
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyAggregate {
    pub anchor: Weekday,
    week_starts: Vec<NaiveDate>,
    categories: Vec<String>,
    /// `values[category][week]`
    values: Vec<Vec<Option<f64>>>,
}

impl WeeklyAggregate {
    pub fn week_starts(&self) -> &[NaiveDate] {
        &self.week_starts
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn get(&self, week_start: NaiveDate, category: &str) -> Option<f64> {
        let column = self.categories.iter().position(|c| c == category)?;
        let row = self.week_starts.iter().position(|w| *w == week_start)?;
        self.values[column][row]
    }

    pub fn series(&self, category: &str) -> Option<WeeklySeries> {
        let column = self.categories.iter().position(|c| c == category)?;
        Some(WeeklySeries {
            anchor: self.anchor,
            points: self
                .week_starts
                .iter()
                .copied()
                .zip(self.values[column].iter().copied())
                .collect(),
        })
    }
}

/// Resample every category of a daily matrix (values in hours)
pub fn resample_matrix(matrix: &DailyMatrix, anchor: Weekday, agg: Aggregation) -> WeeklyAggregate {
    let mut week_starts = Vec::new();
    let mut values = Vec::with_capacity(matrix.categories().len());

    for category in matrix.categories() {
        let series = matrix.series_hours(category).unwrap_or_default();
        let weekly = resample_weekly(&series, anchor, agg);
        if week_starts.is_empty() {
            week_starts = weekly.points.iter().map(|(week, _)| *week).collect();
        }
        values.push(weekly.points.into_iter().map(|(_, value)| value).collect());
    }

    WeeklyAggregate {
        anchor,
        week_starts,
        categories: matrix.categories().to_vec(),
        values,
    }
}

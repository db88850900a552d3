//! Daily matrix construction
//!
//! Pivots the merged event set into a dense day × category table of summed
//! durations. The day axis has no gaps. Each category column keeps
//! "not tracked yet" apart from "tracked, nothing happened": cells before the
//! category's first observation stay [`Cell::Untracked`], later empty days are
//! [`Cell::Zero`].

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::merge::MergedEventSet;
use crate::split::{split_events, DayBoundary};
use crate::types::{CategoryCatalog, Cell};

/// One value per calendar day; `None` marks an unknown day
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaySeries {
    pub points: Vec<(NaiveDate, Option<f64>)>,
}

impl DaySeries {
    pub fn new(points: Vec<(NaiveDate, Option<f64>)>) -> Self {
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Dense per-day, per-category duration table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyMatrix {
    days: Vec<NaiveDate>,
    categories: Vec<String>,
    /// Row-major: `cells[day][category]`
    cells: Vec<Vec<Cell>>,
}

/// Serializable view of a daily matrix, durations in hours
#[derive(Debug, Clone, Serialize)]
pub struct DailyTable {
    pub categories: Vec<String>,
    pub rows: Vec<DailyRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub hours: Vec<Option<f64>>,
}

impl DailyMatrix {
    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        self.days.first().copied()
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.days.last().copied()
    }

    fn day_index(&self, day: NaiveDate) -> Option<usize> {
        let first = self.first_day()?;
        let index = usize::try_from((day - first).num_days()).ok()?;
        (index < self.days.len()).then_some(index)
    }

    fn category_index(&self, category: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == category)
    }

    /// Cell for a day and category, `None` when either is outside the matrix
    pub fn cell(&self, day: NaiveDate, category: &str) -> Option<Cell> {
        let row = self.day_index(day)?;
        let column = self.category_index(category)?;
        Some(self.cells[row][column])
    }

    pub fn row(&self, day: NaiveDate) -> Option<&[Cell]> {
        self.day_index(day).map(|row| self.cells[row].as_slice())
    }

    pub fn column(&self, category: &str) -> Option<Vec<(NaiveDate, Cell)>> {
        let column = self.category_index(category)?;
        Some(
            self.days
                .iter()
                .zip(&self.cells)
                .map(|(day, row)| (*day, row[column]))
                .collect(),
        )
    }

    /// One category as hours per day, unknown days as `None`
    pub fn series_hours(&self, category: &str) -> Option<DaySeries> {
        self.column(category).map(|column| {
            DaySeries::new(
                column
                    .into_iter()
                    .map(|(day, cell)| (day, cell.hours()))
                    .collect(),
            )
        })
    }

    /// Final fill: unknown cells replaced by `fill`, everything in hours
    pub fn filled_hours(&self, fill: f64) -> Vec<Vec<f64>> {
        self.cells
            .iter()
            .map(|row| row.iter().map(|cell| cell.hours().unwrap_or(fill)).collect())
            .collect()
    }

    /// Drop the trailing (usually still in progress) day
    pub fn without_last_day(mut self) -> Self {
        self.days.pop();
        self.cells.pop();
        self
    }

    pub fn to_table(&self) -> DailyTable {
        DailyTable {
            categories: self.categories.clone(),
            rows: self
                .days
                .iter()
                .zip(&self.cells)
                .map(|(date, row)| DailyRow {
                    date: *date,
                    hours: row.iter().map(Cell::hours).collect(),
                })
                .collect(),
        }
    }
}

/// Build the daily matrix for a merged event set.
///
/// Events are split at each category's logical-day boundary, summed per
/// `(logical_date, category)` and reindexed onto a contiguous day axis. Columns
/// follow catalog order, with unlisted categories appended.
pub fn build_daily_matrix(
    events: &MergedEventSet,
    catalog: &CategoryCatalog,
    boundary: &DayBoundary,
) -> DailyMatrix {
    let pieces = split_events(events.iter(), boundary);

    let mut totals: HashMap<(NaiveDate, &str), Duration> = HashMap::new();
    let mut first_seen: BTreeMap<&str, NaiveDate> = BTreeMap::new();
    for piece in &pieces {
        let date = piece.logical_date(boundary.offset_for(&piece.category));
        *totals
            .entry((date, piece.category.as_str()))
            .or_insert_with(Duration::zero) += piece.duration;
        first_seen
            .entry(piece.category.as_str())
            .and_modify(|seen| *seen = (*seen).min(date))
            .or_insert(date);
    }

    let categories = catalog.columns(first_seen.keys().copied());

    let (Some(first), Some(last)) = (
        totals.keys().map(|(date, _)| *date).min(),
        totals.keys().map(|(date, _)| *date).max(),
    ) else {
        return DailyMatrix {
            days: Vec::new(),
            categories,
            cells: Vec::new(),
        };
    };

    let days: Vec<NaiveDate> = first.iter_days().take_while(|day| *day <= last).collect();

    let cells = days
        .iter()
        .map(|day| {
            categories
                .iter()
                .map(|category| {
                    match totals.get(&(*day, category.as_str())) {
                        Some(total) => Cell::observed(*total),
                        None => match first_seen.get(category.as_str()) {
                            // forward-filled "seen" mask
                            Some(seen) if seen <= day => Cell::Zero,
                            _ => Cell::Untracked,
                        },
                    }
                })
                .collect()
        })
        .collect();

    debug!(
        days = days.len(),
        categories = categories.len(),
        pieces = pieces.len(),
        "built daily matrix"
    );

    DailyMatrix {
        days,
        categories,
        cells,
    }
}

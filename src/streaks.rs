//! Habit streak scoring
//!
//! A habit log records one outcome per day. Each week is scored from the mean
//! of its outcomes (completed 1, skipped 0.9, missed -2), floored at zero and
//! lifted into `[0.2, 1.0]`. A week without a single completion scores 0.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;
use crate::normalizer::NormalizationPolicy;
use crate::weekly::{week_start, WeeklySeries};

/// Floor added to every week with at least one completion
const STREAK_FLOOR: f64 = 0.2;

/// Outcome of a habit on one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakOutcome {
    Completed,
    Skipped,
    Missed,
}

impl StreakOutcome {
    pub fn weight(&self) -> f64 {
        match self {
            StreakOutcome::Completed => 1.0,
            StreakOutcome::Skipped => 0.9,
            StreakOutcome::Missed => -2.0,
        }
    }
}

/// Daily outcomes for one habit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreakLog {
    pub name: String,
    pub entries: BTreeMap<NaiveDate, StreakOutcome>,
}

impl StreakLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Parse a habit export: a JSON object `{"YYYY-MM-DD": "completed"}`
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, ComputeError> {
        Ok(Self {
            name: name.into(),
            entries: serde_json::from_str(json)?,
        })
    }

    pub fn record(&mut self, date: NaiveDate, outcome: StreakOutcome) {
        self.entries.insert(date, outcome);
    }

    /// Weekly scores; weeks between the first and last entry without any
    /// entries score 0
    pub fn weekly_scores(&self, anchor: Weekday) -> WeeklySeries {
        let mut weeks: BTreeMap<NaiveDate, Vec<StreakOutcome>> = BTreeMap::new();
        for (date, outcome) in &self.entries {
            weeks.entry(week_start(*date, anchor)).or_default().push(*outcome);
        }

        let (Some(first), Some(last)) = (weeks.keys().next(), weeks.keys().next_back()) else {
            return WeeklySeries::empty(anchor);
        };

        let mut points = Vec::new();
        let mut week = *first;
        while week <= *last {
            let score = weeks.get(&week).map_or(0.0, |outcomes| score_week(outcomes));
            points.push((week, Some(score)));
            week += Duration::days(7);
        }
        WeeklySeries { anchor, points }
    }
}

/// Score one week of outcomes
pub fn score_week(outcomes: &[StreakOutcome]) -> f64 {
    if !outcomes.contains(&StreakOutcome::Completed) {
        return 0.0;
    }
    let mean = outcomes.iter().map(StreakOutcome::weight).sum::<f64>() / outcomes.len() as f64;
    mean.max(0.0) * (1.0 - STREAK_FLOOR) + STREAK_FLOOR
}

/// Streak scores are already in `[0, 1]`
pub fn streak_policy() -> NormalizationPolicy {
    NormalizationPolicy::FixedScale { divisor: 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Normalizer;
    use pretty_assertions::assert_eq;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_week_without_completion_scores_zero() {
        assert_eq!(score_week(&[StreakOutcome::Skipped, StreakOutcome::Skipped]), 0.0);
        assert_eq!(score_week(&[]), 0.0);
    }

    #[test]
    fn test_perfect_week_scores_one() {
        assert!(approx(score_week(&[StreakOutcome::Completed; 7]), 1.0));
    }

    #[test]
    fn test_misses_floor_at_minimum() {
        let outcomes = [StreakOutcome::Completed, StreakOutcome::Missed];
        // mean -0.5, floored at 0
        assert!(approx(score_week(&outcomes), 0.2));
    }

    #[test]
    fn test_mixed_week() {
        let outcomes = [StreakOutcome::Completed, StreakOutcome::Skipped];
        assert!(approx(score_week(&outcomes), 0.95 * 0.8 + 0.2));
    }

    #[test]
    fn test_weekly_scores_from_json() {
        let log = StreakLog::from_json(
            "meditate",
            r#"{"2024-01-01": "completed", "2024-01-02": "missed", "2024-01-17": "skipped"}"#,
        )
        .unwrap();
        let weekly = log.weekly_scores(Weekday::Mon);

        assert_eq!(weekly.len(), 3);
        assert_eq!(weekly.points[0].0, date(1));
        assert!(approx(weekly.points[0].1.unwrap(), 0.2));
        assert_eq!(weekly.points[1], (date(8), Some(0.0)));
        assert_eq!(weekly.points[2], (date(15), Some(0.0)));
    }

    #[test]
    fn test_streak_layer_omits_zero_weeks() {
        let mut log = StreakLog::new("stretch");
        for day in 1..=7 {
            log.record(date(day), StreakOutcome::Completed);
        }
        log.record(date(15), StreakOutcome::Missed);

        let layer = Normalizer::normalize(&log.weekly_scores(Weekday::Mon), &streak_policy());
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.get(date(1)), Some(1.0));
    }

    #[test]
    fn test_unknown_outcome_rejected() {
        assert!(StreakLog::from_json("x", r#"{"2024-01-01": "maybe"}"#).is_err());
    }
}

//! Layer normalization
//!
//! This module turns a weekly series into a sparse intensity layer.
//! - Negative values clipped to 0
//! - Policy applied (quantile scale, fixed scale or square-root ratio)
//! - Values rounded to 2 decimals, non-positive and unknown weeks omitted

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ComputeError;
use crate::weekly::WeeklySeries;

/// Default quantile for [`NormalizationPolicy::QuantileScale`]
pub const DEFAULT_QUANTILE: f64 = 0.75;

fn default_quantile() -> f64 {
    DEFAULT_QUANTILE
}

/// How a weekly series is scaled into a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Divide by the q-quantile of positive values, clip to `[0, 1]`
    QuantileScale {
        #[serde(default = "default_quantile")]
        q: f64,
    },
    /// Divide by a constant, clip to `[0, 1]`
    FixedScale { divisor: f64 },
    /// `sqrt(value / target)`, optionally capped
    SqrtRatio {
        target: f64,
        #[serde(default)]
        cap: Option<f64>,
    },
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        NormalizationPolicy::QuantileScale {
            q: DEFAULT_QUANTILE,
        }
    }
}

impl NormalizationPolicy {
    /// Reject parameters that can never produce a layer
    pub fn validate(&self) -> Result<(), ComputeError> {
        match self {
            NormalizationPolicy::QuantileScale { q } => {
                if !(q.is_finite() && *q > 0.0 && *q <= 1.0) {
                    return Err(ComputeError::NormalizationError(format!(
                        "quantile must be in (0, 1], got {q}"
                    )));
                }
            }
            NormalizationPolicy::FixedScale { divisor } => {
                if !divisor.is_finite() {
                    return Err(ComputeError::NormalizationError(format!(
                        "divisor must be finite, got {divisor}"
                    )));
                }
            }
            NormalizationPolicy::SqrtRatio { target, cap } => {
                if !(target.is_finite() && *target > 0.0) {
                    return Err(ComputeError::NormalizationError(format!(
                        "sqrt target must be positive, got {target}"
                    )));
                }
                if let Some(cap) = cap {
                    if !(cap.is_finite() && *cap > 0.0) {
                        return Err(ComputeError::NormalizationError(format!(
                            "cap must be positive, got {cap}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Sparse layer: week start to value, only positive entries present
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseSeries(BTreeMap<NaiveDate, f64>);

impl SparseSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, week_start: NaiveDate) -> Option<f64> {
        self.0.get(&week_start).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &f64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn max_value(&self) -> Option<f64> {
        self.0.values().copied().reduce(f64::max)
    }

    /// Pretty JSON object `{"YYYY-MM-DD": value}`, the persisted layer format
    pub fn to_json_pretty(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromIterator<(NaiveDate, f64)> for SparseSeries {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Normalizer for converting weekly series to layers
pub struct Normalizer;

impl Normalizer {
    /// Normalize a weekly series under a policy
    pub fn normalize(series: &WeeklySeries, policy: &NormalizationPolicy) -> SparseSeries {
        let known: Vec<(NaiveDate, f64)> = series
            .points
            .iter()
            .filter_map(|(week, value)| value.map(|v| (*week, v.max(0.0))))
            .filter(|(_, value)| value.is_finite())
            .collect();

        let scale: Box<dyn Fn(f64) -> f64> = match policy {
            NormalizationPolicy::QuantileScale { q } => {
                let positives: Vec<f64> = known
                    .iter()
                    .map(|(_, value)| *value)
                    .filter(|value| *value > 0.0)
                    .collect();
                let Some(reference) = quantile(&positives, *q) else {
                    return SparseSeries::new();
                };
                Box::new(move |value| (value / reference).clamp(0.0, 1.0))
            }
            NormalizationPolicy::FixedScale { divisor } => {
                if *divisor <= 0.0 {
                    warn!(divisor, "non-positive divisor, layer left empty");
                    return SparseSeries::new();
                }
                let divisor = *divisor;
                Box::new(move |value| (value / divisor).clamp(0.0, 1.0))
            }
            NormalizationPolicy::SqrtRatio { target, cap } => {
                if !(target.is_finite() && *target > 0.0) {
                    warn!(target, "non-positive sqrt target, layer left empty");
                    return SparseSeries::new();
                }
                let (target, cap) = (*target, *cap);
                Box::new(move |value| {
                    let ratio = (value / target).sqrt();
                    cap.map_or(ratio, |cap| ratio.min(cap))
                })
            }
        };

        known
            .into_iter()
            .map(|(week, value)| (week, round2(scale(value))))
            .filter(|(_, value)| value.is_finite() && *value > 0.0)
            .collect()
    }
}

/// Linear-interpolated quantile of unsorted values
fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

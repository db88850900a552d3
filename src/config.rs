//! Pipeline configuration
//!
//! Loaded from JSON; every field has a default so an empty object is a valid
//! configuration.

use std::collections::BTreeMap;

use chrono::{Duration, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::corrections::Correction;
use crate::error::ComputeError;
use crate::merge::{DedupKey, DEFAULT_REFETCH_LOOKBACK_DAYS};
use crate::normalizer::NormalizationPolicy;
use crate::persist::validate_layer_name;
use crate::schema::parse_timezone;
use crate::split::DayBoundary;
use crate::types::hours_to_duration;
use crate::weekly::Aggregation;

/// Where a layer reads its weekly values from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSource {
    /// Daily matrix columns (hours per logical day)
    #[default]
    Daily,
    /// Raw events bucketed by start instant (hours per event)
    Events,
}

/// One family of weekly layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Directory under the layer root
    pub namespace: String,
    /// Single category, or every matrix column when absent
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source: LayerSource,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub policy: NormalizationPolicy,
}

impl LayerSpec {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            category: None,
            source: LayerSource::default(),
            aggregation: Aggregation::default(),
            policy: NormalizationPolicy::default(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_source(mut self, source: LayerSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_policy(mut self, policy: NormalizationPolicy) -> Self {
        self.policy = policy;
        self
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_anchor() -> Weekday {
    Weekday::Mon
}

fn default_lookback() -> i64 {
    DEFAULT_REFETCH_LOOKBACK_DAYS
}

fn default_layers() -> Vec<LayerSpec> {
    vec![LayerSpec::new("activities")]
}

/// Settings for a [`crate::pipeline::TallyProcessor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// IANA zone for records without their own
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Hours after local midnight at which a logical day starts
    #[serde(default)]
    pub day_offset_hours: f64,
    /// Per-category overrides of `day_offset_hours`
    #[serde(default)]
    pub category_day_offsets: BTreeMap<String, f64>,
    /// First weekday of a week bucket
    #[serde(default = "default_anchor")]
    pub anchor_weekday: Weekday,
    #[serde(default)]
    pub dedup_key: DedupKey,
    /// Days an importer re-fetches before the newest stored record
    #[serde(default = "default_lookback")]
    pub refetch_lookback_days: i64,
    /// Drop the trailing, usually partial, day from the daily matrix
    #[serde(default)]
    pub omit_last_day: bool,
    #[serde(default)]
    pub corrections: Vec<Correction>,
    #[serde(default = "default_layers")]
    pub layers: Vec<LayerSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            day_offset_hours: 0.0,
            category_day_offsets: BTreeMap::new(),
            anchor_weekday: default_anchor(),
            dedup_key: DedupKey::default(),
            refetch_lookback_days: default_lookback(),
            omit_last_day: false,
            corrections: Vec::new(),
            layers: default_layers(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        self.tz()?;

        validate_offset("day_offset_hours", self.day_offset_hours)?;
        for (category, hours) in &self.category_day_offsets {
            validate_offset(&format!("category_day_offsets.{category}"), *hours)?;
        }

        if self.refetch_lookback_days < 0 {
            return Err(ComputeError::InvalidConfig(format!(
                "refetch_lookback_days must not be negative, got {}",
                self.refetch_lookback_days
            )));
        }

        for correction in &self.corrections {
            correction.validate()?;
        }

        for layer in &self.layers {
            validate_layer_name(&layer.namespace)?;
            if let Some(category) = &layer.category {
                validate_layer_name(category)?;
            }
            layer.policy.validate()?;
        }
        Ok(())
    }

    /// Default zone
    pub fn tz(&self) -> Result<Tz, ComputeError> {
        parse_timezone(&self.timezone).map_err(|e| ComputeError::InvalidTimezone(e.to_string()))
    }

    pub fn day_boundary(&self) -> DayBoundary {
        self.category_day_offsets.iter().fold(
            DayBoundary::with_offset(hours_to_duration(self.day_offset_hours)),
            |boundary, (category, hours)| {
                boundary.with_category_offset(category.clone(), hours_to_duration(*hours))
            },
        )
    }

    pub fn refetch_lookback(&self) -> Duration {
        Duration::days(self.refetch_lookback_days)
    }
}

fn validate_offset(field: &str, hours: f64) -> Result<(), ComputeError> {
    if !hours.is_finite() || !(0.0..24.0).contains(&hours) {
        return Err(ComputeError::InvalidConfig(format!(
            "{field} must be within [0, 24) hours, got {hours}"
        )));
    }
    Ok(())
}

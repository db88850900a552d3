//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Tally.
//! It drives a run from importer output to persisted layers:
//! load → correct → merge → save → daily matrix → weekly resample → normalize → write.

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{LayerSource, LayerSpec, PipelineConfig};
use crate::daily::{build_daily_matrix, DailyMatrix};
use crate::error::ComputeError;
use crate::heatmap::{build_heatmap, Heatmap};
use crate::merge::{EventMerger, MergedEventSet};
use crate::normalizer::{Normalizer, SparseSeries};
use crate::persist::{EventStore, LayerStore};
use crate::schema::RecordBatch;
use crate::split::DayBoundary;
use crate::streaks::{streak_policy, StreakLog};
use crate::types::{CategoryCatalog, EventRecord};
use crate::weekly::{resample_events, resample_matrix, WeeklyAggregate, WeeklySeries};
use crate::TALLY_VERSION;

/// Namespace streak layers are written under
pub const STREAKS_NAMESPACE: &str = "streaks";

/// A record rejected during ingest
#[derive(Debug, Clone, Serialize)]
pub struct RejectionReport {
    pub index: usize,
    pub error: String,
}

/// Outcome of one ingest run
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub instance_id: Uuid,
    pub tally_version: String,
    /// Records already in the store
    pub loaded: usize,
    pub added: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectionReport>,
    /// Records in the store after the run
    pub total: usize,
    /// Whether the store file changed
    pub saved: bool,
    /// Instant the next incremental import should re-fetch from
    pub refetch_since: Option<String>,
}

/// A computed layer, or the reason it could not be computed
#[derive(Debug)]
pub struct LayerResult {
    pub namespace: String,
    pub category: String,
    pub layer: Result<SparseSeries, ComputeError>,
}

impl LayerResult {
    /// `namespace/category`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.category)
    }
}

/// A layer that failed to compute or write
#[derive(Debug, Clone, Serialize)]
pub struct LayerFailure {
    pub layer: String,
    pub reason: String,
}

/// Outcome of writing a set of layers
#[derive(Debug, Clone, Serialize)]
pub struct LayersSummary {
    pub instance_id: Uuid,
    pub tally_version: String,
    pub written: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<LayerFailure>,
}

impl LayersSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Stateless-per-run processor holding validated configuration.
///
/// Every summary it produces carries the processor's instance id.
pub struct TallyProcessor {
    config: PipelineConfig,
    tz: Tz,
    boundary: DayBoundary,
    merger: EventMerger,
    instance_id: Uuid,
}

impl Default for TallyProcessor {
    fn default() -> Self {
        let config = PipelineConfig::default();
        Self {
            tz: Tz::UTC,
            boundary: config.day_boundary(),
            merger: EventMerger::new(config.dedup_key),
            instance_id: Uuid::new_v4(),
            config,
        }
    }
}

impl TallyProcessor {
    /// Create a processor, validating the configuration
    pub fn new(config: PipelineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            tz: config.tz()?,
            boundary: config.day_boundary(),
            merger: EventMerger::new(config.dedup_key),
            instance_id: Uuid::new_v4(),
            config,
        })
    }

    /// Create a processor from a JSON configuration
    pub fn from_config_json(json: &str) -> Result<Self, ComputeError> {
        Self::new(PipelineConfig::from_json(json)?)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Merge importer output into a store and persist the result.
    ///
    /// The store file is rewritten only when its content changed; a failed save
    /// leaves the previous file in place. A store with unreadable lines is never
    /// rewritten, since saving would drop them.
    pub fn ingest(&self, store: &EventStore, batch: RecordBatch) -> Result<IngestSummary, ComputeError> {
        let contents = store.load_with_rejections(self.tz)?;
        if !contents.rejected.is_empty() {
            let lines: Vec<String> = contents
                .rejected
                .iter()
                .map(|r| (r.index + 1).to_string())
                .collect();
            return Err(ComputeError::ParseError(format!(
                "{} has unreadable records on lines {}; fix or remove them before ingesting",
                store.path().display(),
                lines.join(", ")
            )));
        }
        let existing = contents.events;
        let loaded = existing.len();

        let outcome = self
            .merger
            .merge_raw(&existing, batch, self.tz, &self.config.corrections);
        let saved = store.save(&outcome.merged)?;

        let summary = IngestSummary {
            instance_id: self.instance_id,
            tally_version: TALLY_VERSION.to_string(),
            loaded,
            added: outcome.added,
            duplicates: outcome.duplicates,
            rejected: outcome
                .rejected
                .iter()
                .map(|r| RejectionReport {
                    index: r.index,
                    error: r.error.to_string(),
                })
                .collect(),
            total: outcome.merged.len(),
            saved,
            refetch_since: outcome
                .merged
                .refetch_since(self.config.refetch_lookback())
                .map(|instant| instant.to_rfc3339()),
        };

        info!(
            instance_id = %self.instance_id,
            store = %store.path().display(),
            added = summary.added,
            total = summary.total,
            saved,
            "ingest complete"
        );
        Ok(summary)
    }

    /// Daily matrix under the configured day boundaries
    pub fn daily_matrix(&self, events: &MergedEventSet, catalog: &CategoryCatalog) -> DailyMatrix {
        let matrix = build_daily_matrix(events, catalog, &self.boundary);
        if self.config.omit_last_day {
            matrix.without_last_day()
        } else {
            matrix
        }
    }

    pub fn heatmap(
        &self,
        events: &MergedEventSet,
        catalog: &CategoryCatalog,
        start_date: NaiveDate,
    ) -> Heatmap {
        build_heatmap(events, catalog, start_date)
    }

    /// Compute every configured layer.
    ///
    /// A category that cannot be computed yields a failed result; the other
    /// layers are unaffected.
    pub fn weekly_layers(&self, events: &MergedEventSet, catalog: &CategoryCatalog) -> Vec<LayerResult> {
        let matrix = self.daily_matrix(events, catalog);
        let mut results = Vec::new();

        for spec in &self.config.layers {
            let categories: Vec<String> = match &spec.category {
                Some(category) => vec![category.clone()],
                None => matrix.categories().to_vec(),
            };
            let weekly = match spec.source {
                LayerSource::Daily => Some(resample_matrix(
                    &matrix,
                    self.config.anchor_weekday,
                    spec.aggregation,
                )),
                LayerSource::Events => None,
            };

            for category in categories {
                let layer = self
                    .weekly_series(spec, &category, events, weekly.as_ref())
                    .map(|series| Normalizer::normalize(&series, &spec.policy));
                results.push(LayerResult {
                    namespace: spec.namespace.clone(),
                    category,
                    layer,
                });
            }
        }
        results
    }

    fn weekly_series(
        &self,
        spec: &LayerSpec,
        category: &str,
        events: &MergedEventSet,
        weekly: Option<&WeeklyAggregate>,
    ) -> Result<WeeklySeries, ComputeError> {
        let missing = || ComputeError::LayerFailed {
            namespace: spec.namespace.clone(),
            category: category.to_string(),
            reason: "no events recorded for category".to_string(),
        };

        match weekly {
            Some(weekly) => weekly.series(category).ok_or_else(missing),
            None => {
                let matching: Vec<&EventRecord> =
                    events.iter().filter(|e| e.category == category).collect();
                if matching.is_empty() {
                    return Err(missing());
                }
                Ok(resample_events(
                    matching,
                    self.config.anchor_weekday,
                    spec.aggregation,
                    EventRecord::duration_hours,
                ))
            }
        }
    }

    /// One layer per habit log under the streaks namespace
    pub fn streak_layers(&self, logs: &[StreakLog]) -> Vec<LayerResult> {
        logs.iter()
            .map(|log| LayerResult {
                namespace: STREAKS_NAMESPACE.to_string(),
                category: log.name.clone(),
                layer: Ok(Normalizer::normalize(
                    &log.weekly_scores(self.config.anchor_weekday),
                    &streak_policy(),
                )),
            })
            .collect()
    }

    /// Persist layers, collecting per-layer failures
    pub fn write_layers(&self, store: &LayerStore, results: Vec<LayerResult>) -> LayersSummary {
        let mut summary = LayersSummary {
            instance_id: self.instance_id,
            tally_version: TALLY_VERSION.to_string(),
            written: Vec::new(),
            unchanged: Vec::new(),
            failed: Vec::new(),
        };

        for result in results {
            let key = result.key();
            let outcome = result
                .layer
                .and_then(|layer| store.write(&result.namespace, &result.category, &layer));
            match outcome {
                Ok(true) => summary.written.push(key),
                Ok(false) => summary.unchanged.push(key),
                Err(e) => {
                    warn!(layer = %key, error = %e, "layer failed");
                    summary.failed.push(LayerFailure {
                        layer: key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            instance_id = %self.instance_id,
            written = summary.written.len(),
            unchanged = summary.unchanged.len(),
            failed = summary.failed.len(),
            "layers written"
        );
        summary
    }
}

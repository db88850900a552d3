//! Synheart Tally - Batch engine for personal time-tracking data
//!
//! Tally turns overlapping exports of timed events into stable aggregates
//! through a deterministic pipeline: validation → corrections → merge →
//! day-boundary splitting → daily matrix → weekly resampling → layer
//! normalization → change-detected persistence.
//!
//! ## Modules
//!
//! - **Events**: record schema, corrections, merging and splitting
//! - **Aggregates**: daily matrix, weekly resampling, time-of-day heatmap
//! - **Layers**: normalization policies, habit streaks and the layer store

pub mod cache;
pub mod config;
pub mod corrections;
pub mod daily;
pub mod error;
pub mod heatmap;
pub mod merge;
pub mod normalizer;
pub mod persist;
pub mod pipeline;
pub mod schema;
pub mod split;
pub mod streaks;
pub mod types;
pub mod weekly;

pub use config::{LayerSource, LayerSpec, PipelineConfig};
pub use error::{ComputeError, ValidationError};
pub use merge::{DedupKey, EventMerger, MergedEventSet};
pub use normalizer::{NormalizationPolicy, Normalizer, SparseSeries};
pub use persist::{EventStore, LayerStore, StoreContents};
pub use pipeline::{IngestSummary, LayerResult, LayersSummary, TallyProcessor};
pub use types::{CategoryCatalog, Cell, EventRecord};

// Schema exports
pub use schema::{RawEventRecord, RecordAdapter, SCHEMA_VERSION};

/// Tally version embedded in every run summary
pub const TALLY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-tally";

//! Error types for Synheart Tally

use thiserror::Error;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid layer name: {0}")]
    InvalidLayerName(String),

    #[error("Normalization error: {0}")]
    NormalizationError(String),

    #[error("Layer '{namespace}/{category}' failed: {reason}")]
    LayerFailed {
        namespace: String,
        category: String,
        reason: String,
    },
}

/// Per-record validation errors.
///
/// These never abort a batch; the merger collects them next to the record index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unparseable start timestamp '{value}': {reason}")]
    InvalidStart { value: String, reason: String },

    #[error("Negative duration: {0} hours")]
    NegativeDuration(String),

    #[error("Duration is not a finite number")]
    NonFiniteDuration,

    #[error("Missing category")]
    MissingCategory,

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

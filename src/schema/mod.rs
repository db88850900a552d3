//! Unified tally.event.v1 schema
//!
//! This module defines the importer-facing input record and the adapter that
//! validates it into zone-aware event records.

mod adapter;
mod raw_record;

pub use adapter::*;
pub use raw_record::*;

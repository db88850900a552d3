//! Persistence for merged events and layers
//!
//! Every artifact goes through [`write_if_changed`]: the file is rewritten only
//! when its bytes differ, and replaced atomically through a temp file in the
//! same directory so readers never observe a half-written file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::error::ComputeError;
use crate::merge::{DedupKey, MergedEventSet};
use crate::normalizer::SparseSeries;
use crate::schema::{RawEventRecord, RecordAdapter, RejectedRecord};

/// Write `bytes` to `path` unless the file already holds exactly those bytes.
///
/// Returns whether the file was written. Parent directories are created.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> std::io::Result<bool> {
    match fs::read(path) {
        Ok(current) if current == bytes => {
            debug!(path = %path.display(), "unchanged, skipping write");
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let temp_path = temp_path_for(path);
    fs::write(&temp_path, bytes)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
    Ok(true)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Events read from an [`EventStore`] plus the stored lines that could not be read
#[derive(Debug, Clone, Default)]
pub struct StoreContents {
    pub events: MergedEventSet,
    /// Skipped lines; `index` is the zero-based line in the file
    pub rejected: Vec<RejectedRecord>,
}

/// NDJSON store holding one logical source's merged event set
#[derive(Debug, Clone)]
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted set; a missing file is an empty set.
    ///
    /// Lines that fail to decode or validate are logged and skipped. Only exact
    /// duplicates collapse here; the configured key applies at merge time.
    pub fn load(&self, default_tz: Tz) -> Result<MergedEventSet, ComputeError> {
        Ok(self.load_with_rejections(default_tz)?.events)
    }

    /// Load the persisted set together with the stored lines that were skipped
    pub fn load_with_rejections(&self, default_tz: Tz) -> Result<StoreContents, ComputeError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no event store yet");
                return Ok(StoreContents::default());
            }
            Err(e) => return Err(e.into()),
        };

        let (events, rejected) = RecordAdapter::to_events(RecordAdapter::parse_ndjson(&data), default_tz);
        for rejection in &rejected {
            warn!(
                path = %self.path.display(),
                line = rejection.index + 1,
                error = %rejection.error,
                "skipping stored record"
            );
        }

        let events = MergedEventSet::from_events(events, DedupKey::StartCategoryDuration);
        info!(path = %self.path.display(), events = events.len(), "loaded event store");
        Ok(StoreContents { events, rejected })
    }

    /// Persist the set as NDJSON; returns whether the file changed
    pub fn save(&self, set: &MergedEventSet) -> Result<bool, ComputeError> {
        let mut out = String::new();
        for event in set.iter() {
            out.push_str(&serde_json::to_string(&RawEventRecord::from(event))?);
            out.push('\n');
        }
        Ok(write_if_changed(&self.path, out.as_bytes())?)
    }
}

/// Directory of layer files laid out as `<root>/<namespace>/<category>.json`
#[derive(Debug, Clone)]
pub struct LayerStore {
    root: PathBuf,
}

impl LayerStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a layer file, rejecting names that could escape the root
    pub fn layer_path(&self, namespace: &str, category: &str) -> Result<PathBuf, ComputeError> {
        validate_layer_name(namespace)?;
        validate_layer_name(category)?;
        Ok(self.root.join(namespace).join(format!("{category}.json")))
    }

    /// Write a layer; returns whether the file changed
    pub fn write(
        &self,
        namespace: &str,
        category: &str,
        layer: &SparseSeries,
    ) -> Result<bool, ComputeError> {
        let path = self.layer_path(namespace, category)?;
        let json = layer.to_json_pretty()?;
        Ok(write_if_changed(&path, json.as_bytes())?)
    }

    /// Read a layer back; a missing file is an empty layer
    pub fn read(&self, namespace: &str, category: &str) -> Result<SparseSeries, ComputeError> {
        let path = self.layer_path(namespace, category)?;
        match fs::read_to_string(&path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SparseSeries::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject empty names and names that could escape the layer root
pub(crate) fn validate_layer_name(name: &str) -> Result<(), ComputeError> {
    if name.trim().is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ComputeError::InvalidLayerName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventRecord;
    use chrono::{Duration, NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn make_test_set() -> MergedEventSet {
        let start = Tz::UTC.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        MergedEventSet::from_events(
            vec![
                EventRecord::new(start, Duration::minutes(90), "work").unwrap(),
                EventRecord::new(
                    chrono_tz::Europe::London.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap(),
                    Duration::hours(8),
                    "sleep",
                )
                .unwrap(),
            ],
            DedupKey::default(),
        )
    }

    #[test]
    fn test_write_if_changed_skips_identical_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");

        assert!(write_if_changed(&path, b"{}").unwrap());
        assert!(!write_if_changed(&path, b"{}").unwrap());
        assert!(write_if_changed(&path, b"{\"a\": 1}").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"{\"a\": 1}");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_event_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.ndjson"));
        assert!(store.load(Tz::UTC).unwrap().is_empty());
    }

    #[test]
    fn test_event_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.ndjson"));
        let set = make_test_set();

        assert!(store.save(&set).unwrap());
        assert!(!store.save(&set).unwrap());

        let loaded = store.load(Tz::UTC).unwrap();
        assert_eq!(loaded, set);
        assert_eq!(loaded.events()[1].timezone(), chrono_tz::Europe::London);
    }

    #[test]
    fn test_event_store_skips_bad_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        fs::write(
            &path,
            concat!(
                "{\"start\": \"2024-01-01T09:00:00Z\", \"duration\": 1.0, \"category\": \"a\"}\n",
                "garbage\n",
                "{\"start\": \"2024-01-01T10:00:00Z\", \"duration\": -1.0, \"category\": \"a\"}\n",
            ),
        )
        .unwrap();

        let loaded = EventStore::new(&path).load(Tz::UTC).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_event_store_reports_skipped_file_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        fs::write(
            &path,
            concat!(
                "{\"start\": \"2024-01-01T09:00:00Z\", \"duration\": 1.0, \"category\": \"a\"}\n",
                "\n",
                "{\"start\": \"2024-01-02T09:00:00Z\", \"duration\": 1.0, \"category\": \"a\", \"timezone\": \"Mars/Olympus\"}\n",
            ),
        )
        .unwrap();

        let contents = EventStore::new(&path).load_with_rejections(Tz::UTC).unwrap();
        assert_eq!(contents.events.len(), 1);
        assert_eq!(contents.rejected.len(), 1);
        assert_eq!(contents.rejected[0].index, 2);
    }

    #[test]
    fn test_layer_store_layout_and_change_detection() {
        let dir = tempdir().unwrap();
        let store = LayerStore::new(dir.path());
        let week = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let layer: SparseSeries = [(week, 0.42)].into_iter().collect();

        assert!(store.write("fitness", "running", &layer).unwrap());
        assert!(!store.write("fitness", "running", &layer).unwrap());

        let written = fs::read_to_string(dir.path().join("fitness").join("running.json")).unwrap();
        assert_eq!(written, "{\n  \"2024-01-01\": 0.42\n}");
        assert_eq!(store.read("fitness", "running").unwrap(), layer);
        assert!(store.read("fitness", "cycling").unwrap().is_empty());
    }

    #[test]
    fn test_layer_names_cannot_escape_root() {
        let dir = tempdir().unwrap();
        let store = LayerStore::new(dir.path());
        let layer = SparseSeries::new();

        for bad in ["", "../etc", "a/b", "a\\b", ".."] {
            assert!(matches!(
                store.write("ns", bad, &layer),
                Err(ComputeError::InvalidLayerName(_))
            ));
            assert!(store.write(bad, "ok", &layer).is_err());
        }
    }
}

//! Dataset cache keyed by file freshness
//!
//! Loaders re-read a dataset only when its backing file changed since the last
//! load. The cache is an explicit value owned by the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::ComputeError;

/// Snapshot of a file's modification time and length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessToken {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FreshnessToken {
    /// Token for a file, `None` when it does not exist
    pub fn for_path(path: &Path) -> Result<Option<Self>, ComputeError> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(Self {
                modified: meta.modified().ok(),
                len: meta.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug)]
struct Entry<T> {
    path: PathBuf,
    token: Option<FreshnessToken>,
    value: T,
}

/// Single-dataset cache
#[derive(Debug)]
pub struct DatasetCache<T> {
    entry: Option<Entry<T>>,
    loads: usize,
}

impl<T> Default for DatasetCache<T> {
    fn default() -> Self {
        Self {
            entry: None,
            loads: 0,
        }
    }
}

impl<T> DatasetCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, reloading when the file's token changed or the
    /// path differs from the cached one
    pub fn get_or_load<F>(&mut self, path: &Path, loader: F) -> Result<&T, ComputeError>
    where
        F: FnOnce(&Path) -> Result<T, ComputeError>,
    {
        let token = FreshnessToken::for_path(path)?;
        let fresh = matches!(&self.entry, Some(entry) if entry.path == path && entry.token == token);

        if !fresh {
            debug!(path = %path.display(), "loading dataset");
            let value = loader(path)?;
            self.loads += 1;
            self.entry = Some(Entry {
                path: path.to_path_buf(),
                token,
                value,
            });
        }

        match &self.entry {
            Some(entry) => Ok(&entry.value),
            None => Err(ComputeError::ParseError(format!(
                "dataset {} was not cached",
                path.display()
            ))),
        }
    }

    /// Drop the cached value so the next access reloads
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Number of loader invocations so far
    pub fn loads(&self) -> usize {
        self.loads
    }
}

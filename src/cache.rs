//! Disk-backed tensor series with a bounded in-memory window.
//!
//! Every named series is a [`disk::DiskVector`]: a fixed-length sequence of
//! tensors stored one file per index, of which at most `capacity` are kept in
//! memory. Reads are read-through and evict the least recently used tensor.
//! The [`TensorCache`] owns all series of a run and is meant to be used from a
//! single thread.

pub mod disk;
pub mod lru;

use std::collections::hash_map::Entry;
use std::ops::Range;
use std::path::PathBuf;

use log::debug;
use rustc_hash::FxHashMap;

use crate::cache::disk::{CacheStats, DiskVector};
use crate::error::{ConfigError, Result};
use crate::types::Tensor;

/// All tensor series of a run, addressed by name.
#[derive(Debug, Default)]
pub struct TensorCache {
    series: FxHashMap<String, DiskVector>,
}

impl TensorCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a series named `name` of length `len` stored in `dir`.
    pub fn add_series(
        &mut self,
        name: &str,
        dir: impl Into<PathBuf>,
        len: usize,
        capacity: usize,
    ) -> Result<()> {
        match self.series.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ConfigError::DuplicateSeries(name.to_string()).into()),
            Entry::Vacant(entry) => {
                entry.insert(DiskVector::new(name, dir, len, capacity)?);
                Ok(())
            }
        }
    }

    /// Mutable access to a series, e.g. to import new tensors.
    pub fn series_mut(&mut self, name: &str) -> Result<&mut DiskVector> {
        self.series
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownSeries(name.to_string()).into())
    }

    /// Returns the tensor at `index` of series `name`. May perform disk I/O.
    pub fn get(&mut self, name: &str, index: usize) -> Result<&Tensor> {
        self.series_mut(name)?.get(index)
    }

    /// Warms the in-memory window of series `name` with all indices of `range`.
    pub fn prime(&mut self, name: &str, range: Range<usize>) -> Result<()> {
        debug!(series = name, start = range.start, end = range.end; "Priming series");
        self.series_mut(name)?.prime(range)
    }

    pub fn stats(&self, name: &str) -> Option<CacheStats> {
        self.series.get(name).map(DiskVector::stats)
    }
}

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::{debug, trace, warn};

use crate::cache::lru::LruCache;
use crate::error::{ConfigError, Error, Result};
use crate::types::Tensor;

/// Hit/miss counters of a [`DiskVector`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// A fixed-length sequence of tensors stored on disk, one file per index, with a
/// bounded in-memory window of recently used entries.
#[derive(Debug)]
pub struct DiskVector {
    name: String,
    dir: PathBuf,
    len: usize,
    cache: LruCache<usize, Tensor>,
    stats: CacheStats,
}

impl DiskVector {
    /// Creates a disk vector of `len` entries in `dir` (created if absent),
    /// keeping at most `capacity` tensors in memory.
    pub fn new(name: &str, dir: impl Into<PathBuf>, len: usize, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ConfigError::Capacity {
                series: name.into(),
            }
            .into());
        }
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        debug!(series = name, dir:? = dir, len, capacity; "Created disk vector");
        Ok(Self {
            name: name.into(),
            dir,
            len,
            cache: LruCache::new(capacity),
            stats: CacheStats::default(),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    #[inline]
    pub fn resident(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(ConfigError::Index {
                series: self.name.clone(),
                index,
                len: self.len,
            }
            .into());
        }
        Ok(())
    }

    fn path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("elem_{index}"))
    }

    /// Stores `tensor` at `index`. A resident copy of the old value is dropped.
    pub fn write(&mut self, index: usize, tensor: &Tensor) -> Result<()> {
        self.check_index(index)?;
        let path = self.path(index);
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, tensor).map_err(|source| Error::Codec {
            path: path.clone(),
            source,
        })?;
        writer.flush().map_err(|e| Error::io(&path, e))?;
        self.cache.remove(&index);
        Ok(())
    }

    /// Returns the tensor at `index`, loading it from disk on a miss. Loading
    /// may evict the least recently used resident tensor.
    pub fn get(&mut self, index: usize) -> Result<&Tensor> {
        self.check_index(index)?;
        if self.cache.contains(&index) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            let tensor = self.load(index)?;
            if let Some((evicted, _)) = self.cache.insert(index, tensor) {
                self.stats.evictions += 1;
                trace!(series = self.name, index, evicted; "Evicted tensor");
            }
        }
        match self.cache.get(&index) {
            Some(tensor) => Ok(tensor),
            None => unreachable!("tensor {index} was just made resident"),
        }
    }

    /// Loads every index of `range` into memory.
    pub fn prime(&mut self, range: std::ops::Range<usize>) -> Result<()> {
        if range.len() > self.capacity() {
            warn!(
                series = self.name,
                requested = range.len(),
                capacity = self.capacity();
                "Primed range does not fit the cache, entries will be re-read from disk"
            );
        }
        for index in range {
            self.get(index)?;
        }
        Ok(())
    }

    fn load(&self, index: usize) -> Result<Tensor> {
        let path = self.path(index);
        trace!(series = self.name, index; "Loading tensor from disk");
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        bincode::deserialize_from(BufReader::new(file))
            .map_err(|source| Error::Codec { path, source })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use num_complex::Complex64;
    use tempfile::tempdir;

    use super::*;
    use crate::types::constant_tensor;

    fn filled(dir: &Path, len: usize, capacity: usize) -> DiskVector {
        let mut dv = DiskVector::new("m", dir, len, capacity).unwrap();
        for i in 0..len {
            let tensor = constant_tensor([2, 1, 2, 1], Complex64::new(i as f64, -(i as f64)));
            dv.write(i, &tensor).unwrap();
        }
        dv
    }

    #[test]
    fn test_read_through() {
        let dir = tempdir().unwrap();
        let mut dv = filled(dir.path(), 4, 2);
        let t = dv.get(3).unwrap();
        assert_eq!(t[[1, 0, 1, 0]], Complex64::new(3.0, -3.0));
        assert_eq!(dv.stats().misses, 1);
        dv.get(3).unwrap();
        assert_eq!(dv.stats().hits, 1);
    }

    #[test]
    fn test_window_is_bounded() {
        let dir = tempdir().unwrap();
        let mut dv = filled(dir.path(), 6, 2);
        for i in [0, 1, 2, 3, 4, 5, 0] {
            dv.get(i).unwrap();
            assert!(dv.resident() <= 2);
        }
        assert_eq!(dv.stats().misses, 7);
        assert_eq!(dv.stats().evictions, 5);
    }

    #[test]
    fn test_values_survive_eviction() {
        let dir = tempdir().unwrap();
        let mut dv = filled(dir.path(), 3, 1);
        let first = dv.get(0).unwrap().clone();
        dv.get(1).unwrap();
        dv.get(2).unwrap();
        assert_eq!(dv.get(0).unwrap(), &first);
    }

    #[test]
    fn test_write_replaces_resident_copy() {
        let dir = tempdir().unwrap();
        let mut dv = filled(dir.path(), 2, 2);
        dv.get(1).unwrap();
        let replacement = constant_tensor([2, 1, 2, 1], Complex64::ONE);
        dv.write(1, &replacement).unwrap();
        assert_eq!(dv.get(1).unwrap(), &replacement);
    }

    #[test]
    fn test_index_out_of_bounds() {
        let dir = tempdir().unwrap();
        let mut dv = filled(dir.path(), 2, 2);
        let err = dv.get(2).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::Index { index: 2, len: 2, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let mut dv = DiskVector::new("empty", dir.path(), 2, 1).unwrap();
        assert!(matches!(dv.get(0).unwrap_err(), Error::Io { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_to_full_device_fails() {
        let dir = tempdir().unwrap();
        let mut dv = DiskVector::new("full", dir.path(), 1, 1).unwrap();
        std::os::unix::fs::symlink("/dev/full", dir.path().join("elem_0")).unwrap();
        let tensor = constant_tensor([2, 1, 2, 1], Complex64::ONE);
        assert!(matches!(dv.write(0, &tensor).unwrap_err(), Error::Io { .. }));
    }

    #[test]
    fn test_zero_capacity() {
        let dir = tempdir().unwrap();
        let err = DiskVector::new("z", dir.path(), 2, 0).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Capacity { .. })));
    }
}

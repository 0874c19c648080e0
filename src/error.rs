use std::path::PathBuf;

use thiserror::Error;

/// Errors in the run configuration. These are raised before any collective
/// communication takes place.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("time out of range: '{token}' (from expression '{spec}')")]
    Range { token: String, spec: String },
    #[error("malformed time token '{token}' (from expression '{spec}')")]
    Parse { token: String, spec: String },
    #[error("time extent {nt} can not be split evenly over {size} ranks")]
    Partition { nt: usize, size: usize },
    #[error("cache capacity of series '{series}' must be strictly positive")]
    Capacity { series: String },
    #[error("index {index} out of bounds for series '{series}' of length {len}")]
    Index {
        series: String,
        index: usize,
        len: usize,
    },
    #[error("unknown tensor series '{0}'")]
    UnknownSeries(String),
    #[error("tensor series '{0}' is declared twice")]
    DuplicateSeries(String),
    #[error("boundary sign must be +1 or -1, got {0}")]
    Boundary(i32),
    #[error("unknown projector '{0}'")]
    Projector(String),
    #[error("translation average requested over an empty translation set")]
    EmptyTranslations,
    #[error("invalid product terms '{0}'")]
    Terms(String),
    #[error("product '{terms}' has {expected} intermediate terms but {found} time ranges")]
    Times {
        terms: String,
        expected: usize,
        found: usize,
    },
}

/// Mismatched tensor dimensions handed to a contraction kernel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("tensor shape mismatch: expected {expected:?}, found {found:?}")]
pub struct ShapeError {
    pub expected: Vec<usize>,
    pub found: Vec<usize>,
}

/// Failures of the collective operations of a process group.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectiveError {
    #[error("rank {rank} passed a buffer of length {found}, root has {expected}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        found: usize,
    },
    #[error("root rank {root} is not part of a group of size {size}")]
    InvalidRoot { root: usize, size: usize },
    #[error("a peer rank panicked during a collective")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can not decode tensor file '{path}': {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[cfg(feature = "hdf5")]
    #[error("hdf5 error on '{path}': {source}")]
    Hdf5 {
        path: PathBuf,
        #[source]
        source: hdf5::Error,
    },
    #[error("can not read parameter file '{path}': {source}")]
    Parameters {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("can not write result '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Any failure of a result sink, kept apart from contraction errors.
    #[error("result sink failed: {0}")]
    Sink(#[source] Box<Error>),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Collective(#[from] CollectiveError),
}

impl Error {
    /// Wraps an I/O error together with the path it happened on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

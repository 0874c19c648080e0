//! Correlator records and where they go.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::info;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::{A2AMatrixPar, ProductPar};
use crate::error::{Error, Result};
use crate::types::TimeIndex;

/// Prefix of every result file.
const FILE_STEM: &str = "nuc2pt";

/// One emitted correlator together with the parameters that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatorResult {
    /// The matrix series of the run, with the trajectory substituted into the
    /// file names.
    pub a2a_matrix: Vec<A2AMatrixPar>,
    pub contraction: ProductPar,
    /// The time tuple of the intermediate terms.
    pub times: Vec<TimeIndex>,
    pub correlator: Vec<Complex64>,
}

impl CorrelatorResult {
    /// The file stem of this result: the intermediate terms with their times,
    /// and the translation unless the result is translation averaged.
    pub fn file_stem(&self, dt: TimeIndex) -> String {
        let mut stem = FILE_STEM.to_string();
        let terms = self.contraction.intermediate_terms();
        for (term, t) in terms.iter().zip(&self.times) {
            stem.push_str(&format!("_{term}_{t}"));
        }
        if !self.contraction.translation_average {
            stem.push_str(&format!("_dt_{dt}"));
        }
        stem
    }
}

/// Consumer of finished correlators. Only the boss rank writes.
pub trait ResultSink {
    fn write(&mut self, result: &CorrelatorResult, dt: TimeIndex, traj: u32) -> Result<()>;
}

/// Writes each result as JSON to `<dir>/<stem>.<traj>.json`.
#[derive(Debug, Clone)]
pub struct JsonResultWriter {
    dir: PathBuf,
}

impl JsonResultWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn result_path(&self, stem: &str, traj: u32) -> PathBuf {
        self.dir.join(format!("{stem}.{traj}.json"))
    }

    /// Reads back a result written by this writer.
    pub fn read(path: impl AsRef<Path>) -> Result<CorrelatorResult> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_reader(file).map_err(|source| Error::Output {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ResultSink for JsonResultWriter {
    fn write(&mut self, result: &CorrelatorResult, dt: TimeIndex, traj: u32) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let path = self.result_path(&result.file_stem(dt), traj);
        info!(path:? = path; "Saving correlator");
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, result).map_err(|source| Error::Output {
            path: path.clone(),
            source,
        })?;
        writer.flush().map_err(|e| Error::io(&path, e))
    }
}

/// Keeps all results in memory, tagged with their translation and trajectory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub results: Vec<(CorrelatorResult, TimeIndex, u32)>,
}

impl MemorySink {
    /// The correlators in the order they were written.
    pub fn correlators(&self) -> Vec<&[Complex64]> {
        self.results
            .iter()
            .map(|(result, _, _)| result.correlator.as_slice())
            .collect_vec()
    }
}

impl ResultSink for MemorySink {
    fn write(&mut self, result: &CorrelatorResult, dt: TimeIndex, traj: u32) -> Result<()> {
        self.results.push((result.clone(), dt, traj));
        Ok(())
    }
}

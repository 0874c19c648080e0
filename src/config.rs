//! The parameter file of a contractor run.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};
use crate::timedomain::parse_range;

/// Trajectories `start, start + step, ...` below `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajRange {
    pub start: u32,
    pub end: u32,
    pub step: u32,
}

impl TrajRange {
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        // A zero step would never terminate
        (self.start..self.end).step_by(self.step.max(1) as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPar {
    pub traj_counter: TrajRange,
    /// Global time extent.
    pub nt: usize,
    /// Prefix of the per-rank disk vector directories. The rank number is
    /// appended, followed by `/<series name>`.
    pub disk_vector_dir: String,
    /// Directory for result files.
    pub output: String,
}

/// A series of A2A matrices, one per time slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct A2AMatrixPar {
    /// HDF5 file; the token `traj` is replaced by the trajectory number.
    pub file: String,
    pub dataset: String,
    /// Number of tensors kept in memory.
    pub cache_size: usize,
    pub name: String,
}

/// One contraction of a reference series with a broadcast series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPar {
    /// Whitespace separated series names; the first one is cached as reference,
    /// the last one is broadcast per translation.
    pub terms: String,
    /// One time range per intermediate term.
    #[serde(default)]
    pub times: Vec<String>,
    pub translations: String,
    pub translation_average: bool,
    #[serde(default)]
    pub projectors: String,
    pub boundary_t: i32,
}

impl ProductPar {
    pub fn term_names(&self) -> Vec<&str> {
        self.terms.split_whitespace().collect()
    }

    /// The terms between the reference and the broadcast series, one per
    /// entry of `times`.
    pub fn intermediate_terms(&self) -> Vec<&str> {
        let terms = self.term_names();
        match terms.len() {
            0..=2 => Vec::new(),
            n => terms[1..n - 1].to_vec(),
        }
    }

    /// The reference and broadcast series names.
    pub fn end_terms(&self) -> std::result::Result<(&str, &str), ConfigError> {
        let terms = self.term_names();
        match (terms.first(), terms.last()) {
            (Some(&first), Some(&last)) => Ok((first, last)),
            _ => Err(ConfigError::Terms(self.terms.clone())),
        }
    }

    /// The boundary sign as a float, checked to be `+1` or `-1`.
    pub fn boundary_sign(&self) -> std::result::Result<f64, ConfigError> {
        match self.boundary_t {
            1 | -1 => Ok(f64::from(self.boundary_t)),
            other => Err(ConfigError::Boundary(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractorPar {
    pub global: GlobalPar,
    pub a2a_matrix: Vec<A2AMatrixPar>,
    pub product: Vec<ProductPar>,
}

impl ContractorPar {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::Parameters {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks everything that can be checked without touching data.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for matrix in &self.a2a_matrix {
            if matrix.cache_size == 0 {
                return Err(ConfigError::Capacity {
                    series: matrix.name.clone(),
                });
            }
        }
        for product in &self.product {
            for term in product.term_names() {
                if !self.a2a_matrix.iter().any(|m| m.name == term) {
                    return Err(ConfigError::UnknownSeries(term.to_string()));
                }
            }
            product.end_terms()?;
            let expected = product.intermediate_terms().len();
            if product.times.len() != expected {
                return Err(ConfigError::Times {
                    terms: product.terms.clone(),
                    expected,
                    found: product.times.len(),
                });
            }
            product.boundary_sign()?;
            parse_range(&product.translations, self.global.nt)?;
            for times in &product.times {
                parse_range(times, self.global.nt)?;
            }
            if !product.projectors.trim().is_empty() {
                product.projectors.parse::<crate::kernel::Projector>()?;
            }
        }
        Ok(())
    }
}

/// Replaces every occurrence of `token` in `s` by `value`.
pub fn token_replace(s: &str, token: &str, value: impl ToString) -> String {
    s.replace(token, &value.to_string())
}

//! Contraction kernels turning a pair of tensors into one correlator entry.

use std::str::FromStr;

use ndarray::Axis;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ShapeError};
use crate::types::{shape_of, Tensor};

/// Number of spin components on axis 0 for [`SpinProjected`].
pub const NS: usize = 4;

/// Contracts a reference tensor with a broadcast tensor into a single scalar.
///
/// Kernels are pure: the result only depends on the two tensors.
pub trait ContractionKernel {
    fn contract(&self, reference: &Tensor, broadcast: &Tensor) -> Result<Complex64, ShapeError>;

    /// Floating point operations needed for one contraction of tensors of the
    /// given number of elements. Used for throughput reporting only.
    fn flops(&self, elements: usize) -> f64 {
        8.0 * elements as f64
    }
}

fn check_same_shape(reference: &Tensor, broadcast: &Tensor) -> Result<(), ShapeError> {
    if reference.dim() != broadcast.dim() {
        return Err(ShapeError {
            expected: shape_of(reference).to_vec(),
            found: shape_of(broadcast).to_vec(),
        });
    }
    Ok(())
}

/// Sum of the element-wise product of both tensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementwiseProduct;

impl ContractionKernel for ElementwiseProduct {
    fn contract(&self, reference: &Tensor, broadcast: &Tensor) -> Result<Complex64, ShapeError> {
        check_same_shape(reference, broadcast)?;
        Ok(reference
            .iter()
            .zip(broadcast.iter())
            .map(|(a, b)| a * b)
            .sum())
    }
}

/// A diagonal spin projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projector {
    /// Positive parity, `(1 + g4) / 2`.
    TPlus,
    /// Negative parity, `(1 - g4) / 2`.
    TMinus,
    Unpolarized,
}

impl Projector {
    /// The diagonal of the projector in a basis where `g4` is diagonal.
    pub fn diagonal(self) -> [f64; NS] {
        match self {
            Projector::TPlus => [1.0, 1.0, 0.0, 0.0],
            Projector::TMinus => [0.0, 0.0, 1.0, 1.0],
            Projector::Unpolarized => [1.0; NS],
        }
    }
}

impl FromStr for Projector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tplus" => Ok(Projector::TPlus),
            "tminus" => Ok(Projector::TMinus),
            "unpolarized" => Ok(Projector::Unpolarized),
            _ => Err(ConfigError::Projector(s.to_string())),
        }
    }
}

/// Contracts all but the spin index (axis 0) and traces the resulting spin
/// matrix with a projector: `tr(P M)` with
/// `M[a][b] = sum_ijk reference[a,i,j,k] * broadcast[b,i,j,k]`.
///
/// The projector is diagonal, so only the diagonal of `M` is needed.
#[derive(Debug, Clone, Copy)]
pub struct SpinProjected {
    pub projector: Projector,
}

impl ContractionKernel for SpinProjected {
    fn contract(&self, reference: &Tensor, broadcast: &Tensor) -> Result<Complex64, ShapeError> {
        check_same_shape(reference, broadcast)?;
        if reference.len_of(Axis(0)) != NS {
            let mut expected = shape_of(reference);
            expected[0] = NS;
            return Err(ShapeError {
                expected: expected.to_vec(),
                found: shape_of(reference).to_vec(),
            });
        }

        let mut trace = Complex64::default();
        for (spin, weight) in self.projector.diagonal().into_iter().enumerate() {
            if weight == 0.0 {
                continue;
            }
            let a = reference.index_axis(Axis(0), spin);
            let b = broadcast.index_axis(Axis(0), spin);
            let m: Complex64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
            trace += m * weight;
        }
        Ok(trace)
    }

    fn flops(&self, elements: usize) -> f64 {
        let used = self
            .projector
            .diagonal()
            .iter()
            .filter(|&&w| w != 0.0)
            .count();
        8.0 * (elements / NS * used) as f64
    }
}

/// Selects the kernel for a product's projector string. An empty string means
/// a plain element-wise contraction.
pub fn kernel_for(projectors: &str) -> Result<Box<dyn ContractionKernel + Send + Sync>, ConfigError> {
    if projectors.trim().is_empty() {
        return Ok(Box::new(ElementwiseProduct));
    }
    let projector = projectors.parse()?;
    Ok(Box::new(SpinProjected { projector }))
}

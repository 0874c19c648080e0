//! Interfaces of the upstream correlator producer.
//!
//! The producer solves for a propagator from every source time slice, adds the
//! low-mode correction and projects the solution onto a bra on all time
//! slices. Solvers and fields are provided by the caller; only the source loop
//! and its accumulation into a correlator live here.

use std::ops::AddAssign;

use log::debug;
use num_complex::Complex64;

use crate::error::{Result, ShapeError};
use crate::types::TimeIndex;

/// Iterative solver for `D x = source`.
pub trait Solver<F> {
    fn solve(&mut self, source: &F) -> Result<F>;
}

/// Low-mode contribution that the solver result is corrected by.
pub trait LowModeCorrection<F> {
    fn correct(&self, source: &F) -> F;
}

/// Inner products `<bra|ket>` restricted to each time slice.
pub trait SliceProduct<F> {
    fn slice_products(&self, bra: &F, ket: &F) -> Vec<Complex64>;
}

/// Parameters of the loop over source times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLoop {
    pub nt: usize,
    /// Distance between consecutive source times.
    pub tinc: usize,
}

impl SourceLoop {
    pub fn sources(&self) -> impl Iterator<Item = TimeIndex> {
        (0..self.nt).step_by(self.tinc.max(1))
    }
}

/// Adds `<bra| (D^-1 + L) |source(ts)> / eval` into `correlator` at the
/// separation `(tsnk - ts) mod nt`, for every source time `ts` of the loop.
#[allow(clippy::too_many_arguments)]
pub fn accumulate_source_loop<F, S, L, P>(
    params: SourceLoop,
    eval: Complex64,
    mut make_source: impl FnMut(TimeIndex) -> F,
    bra: &F,
    solver: &mut S,
    low_mode: &L,
    products: &P,
    correlator: &mut [Complex64],
) -> Result<()>
where
    F: for<'a> AddAssign<&'a F>,
    S: Solver<F>,
    L: LowModeCorrection<F>,
    P: SliceProduct<F>,
{
    let nt = params.nt;
    if correlator.len() != nt {
        return Err(ShapeError {
            expected: vec![nt],
            found: vec![correlator.len()],
        }
        .into());
    }

    for ts in params.sources() {
        debug!(ts; "Solving from source time slice");
        let source = make_source(ts);
        let mut solution = solver.solve(&source)?;
        solution += &low_mode.correct(&source);

        let slices = products.slice_products(bra, &solution);
        if slices.len() != nt {
            return Err(ShapeError {
                expected: vec![nt],
                found: vec![slices.len()],
            }
            .into());
        }
        for (tsnk, value) in slices.into_iter().enumerate() {
            correlator[(tsnk + nt - ts) % nt] += value / eval;
        }
    }
    Ok(())
}

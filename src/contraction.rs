//! The per-offset broadcast contraction.
//!
//! For a translation `dt` the rank owning global time `dt` reads the broadcast
//! tensor from its cache and sends it to every rank. Each rank then contracts
//! the received tensor against all tensors of its reference window and adds
//! the results into the correlator at the time separation `(t - dt) mod nt`.
//! Sink times that precede the source on the unwrapped global axis pick up the
//! boundary sign.

use std::ops::{Index, IndexMut};

use log::{debug, trace};
use num_complex::Complex64;

use crate::cache::TensorCache;
use crate::error::{Result, ShapeError};
use crate::group::ProcessGroup;
use crate::kernel::ContractionKernel;
use crate::timedomain::TimeDomain;
use crate::timer::{Bytes, Flops, Sec, Timers};
use crate::types::{shape_of, Shape, Tensor, TimeIndex};

/// The tensors of the reference series owned by the current rank, indexed by
/// local time. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct ReferenceCache {
    tensors: Vec<Tensor>,
    shape: Shape,
}

impl ReferenceCache {
    /// Creates the cache from tensors that all have the same shape.
    pub fn new(tensors: Vec<Tensor>) -> std::result::Result<Self, ShapeError> {
        let shape = tensors.first().map_or([0; 4], shape_of);
        if let Some(other) = tensors.iter().find(|t| shape_of(t) != shape) {
            return Err(ShapeError {
                expected: shape.to_vec(),
                found: shape_of(other).to_vec(),
            });
        }
        Ok(Self { tensors, shape })
    }

    /// Primes the local range of `series` and copies it out of the cache.
    pub fn load(cache: &mut TensorCache, series: &str, local_nt: usize) -> Result<Self> {
        cache.prime(series, 0..local_nt)?;
        let mut tensors = Vec::with_capacity(local_nt);
        for t in 0..local_nt {
            tensors.push(cache.get(series, t)?.clone());
        }
        Ok(Self::new(tensors)?)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// The common shape of all reference tensors.
    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Number of elements of a single tensor.
    #[inline]
    pub fn elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Memory held by the cache in bytes.
    pub fn bytes(&self) -> usize {
        self.len() * self.elements() * std::mem::size_of::<Complex64>()
    }
}

impl Index<usize> for ReferenceCache {
    type Output = Tensor;

    fn index(&self, local: usize) -> &Tensor {
        &self.tensors[local]
    }
}

/// A correlator over the full time extent, indexed by time separation.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlator(Vec<Complex64>);

impl Correlator {
    /// A zero correlator of length `nt`.
    #[must_use]
    pub fn new(nt: usize) -> Self {
        Self(vec![Complex64::default(); nt])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sets every entry to zero.
    pub fn reset(&mut self) {
        self.0.fill(Complex64::default());
    }

    /// Multiplies every entry by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for value in &mut self.0 {
            *value *= factor;
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[Complex64] {
        &self.0
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Complex64] {
        &mut self.0
    }

    pub fn into_vec(self) -> Vec<Complex64> {
        self.0
    }
}

impl Index<TimeIndex> for Correlator {
    type Output = Complex64;

    fn index(&self, t: TimeIndex) -> &Complex64 {
        &self.0[t]
    }
}

impl IndexMut<TimeIndex> for Correlator {
    fn index_mut(&mut self, t: TimeIndex) -> &mut Complex64 {
        &mut self.0[t]
    }
}

/// Everything needed to contract one translation on the current rank.
pub struct BroadcastContraction<'a, G: ProcessGroup + ?Sized> {
    pub domain: TimeDomain,
    pub group: &'a G,
    pub reference: &'a ReferenceCache,
    pub kernel: &'a dyn ContractionKernel,
    /// Name of the series whose tensor is broadcast.
    pub series: &'a str,
    /// `+1` for periodic, `-1` for antiperiodic boundary conditions in time.
    pub boundary_sign: f64,
}

impl<G: ProcessGroup + ?Sized> BroadcastContraction<'_, G> {
    /// Reads the broadcast tensor for `dt` on its owner and distributes it to
    /// all ranks. Every rank of the group must call this for the same `dt`.
    pub fn broadcast_tensor(&self, dt: TimeIndex, cache: &mut TensorCache) -> Result<Tensor> {
        let (src_rank, src_local) = self.domain.owner_of(dt);
        let shape = self.reference.shape();
        debug!(dt, src_rank, src_local; "Broadcasting source tensor");

        let mut buffer = if self.group.rank() == src_rank {
            let tensor = cache.get(self.series, src_local)?;
            if shape_of(tensor) != shape {
                return Err(ShapeError {
                    expected: shape.to_vec(),
                    found: shape_of(tensor).to_vec(),
                }
                .into());
            }
            tensor.iter().copied().collect()
        } else {
            vec![Complex64::default(); self.reference.elements()]
        };
        self.group.broadcast(&mut buffer, src_rank)?;

        let found = buffer.len();
        Tensor::from_shape_vec(shape, buffer).map_err(|_| {
            ShapeError {
                expected: shape.to_vec(),
                found: vec![found],
            }
            .into()
        })
    }

    /// Contracts the translation `dt` into `correlator` without any reduction.
    pub fn contract_offset(
        &self,
        dt: TimeIndex,
        cache: &mut TensorCache,
        correlator: &mut Correlator,
        timers: &mut Timers,
    ) -> Result<()> {
        let rank = self.group.rank();
        timers.start("Linear algebra");

        timers.start("Disk vector overhead");
        let broadcast = self.broadcast_tensor(dt, cache);
        timers.stop("Disk vector overhead");
        let broadcast = broadcast?;

        let before = timers.elapsed("tr(A*B)");
        timers.start("tr(A*B)");
        for t_last in 0..self.domain.local_nt() {
            let t_sink = self.domain.global_time(rank, t_last);
            let gt = self.domain.wrap(t_sink as i64 - dt as i64);
            let mut c = self.kernel.contract(&self.reference[t_last], &broadcast)?;
            if t_sink < dt {
                c *= self.boundary_sign;
            }
            trace!(t_last, dt, gt, re = c.re, im = c.im; "Local contraction");
            correlator[gt] += c;
        }
        let elapsed = timers.stop("tr(A*B)") - before;
        timers.stop("Linear algebra");

        let local_nt = self.domain.local_nt();
        let elements = self.reference.elements();
        let flops = self.kernel.flops(elements) * local_nt as f64;
        let bytes = (2 * elements * local_nt * std::mem::size_of::<Complex64>()) as f64;
        debug!(dt, rank; "{} {} {}", Sec(elapsed), Flops(flops, elapsed), Bytes(bytes, elapsed));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use float_cmp::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    use super::*;
    use crate::group::threaded::ThreadGroup;
    use crate::group::SingleProcess;
    use crate::kernel::ElementwiseProduct;
    use crate::types::constant_tensor;

    pub(crate) const SHAPE: Shape = [2, 3, 1, 2];

    /// A cache with series `ref` and `bcast` holding the local slices of
    /// `rank`, generated from their global time.
    pub(crate) fn rank_cache(
        dir: &Path,
        domain: &TimeDomain,
        rank: usize,
        make: impl Fn(&str, TimeIndex) -> Tensor,
    ) -> TensorCache {
        let mut cache = TensorCache::new();
        for name in ["ref", "bcast"] {
            let local_nt = domain.local_nt();
            cache
                .add_series(name, dir.join(format!("{rank}")).join(name), local_nt, local_nt)
                .unwrap();
            let series = cache.series_mut(name).unwrap();
            for t in 0..local_nt {
                series.write(t, &make(name, domain.global_time(rank, t))).unwrap();
            }
        }
        cache
    }

    /// A tensor filled with deterministic random numbers derived from its
    /// series and global time.
    pub(crate) fn random_tensor(name: &str, t: TimeIndex) -> Tensor {
        let seed = t as u64 * 2 + u64::from(name == "bcast");
        let mut rng = StdRng::seed_from_u64(seed);
        Tensor::from_shape_fn(SHAPE, |_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
    }

    fn run_offsets(
        nt: usize,
        size: usize,
        offsets: &[TimeIndex],
        boundary_sign: f64,
        make: fn(&str, TimeIndex) -> Tensor,
    ) -> Vec<Vec<Complex64>> {
        let dir = tempdir().unwrap();
        let domain = TimeDomain::new(nt, size).unwrap();
        let results = ThreadGroup::run(size, |group| {
            let rank = group.rank();
            let mut cache = rank_cache(dir.path(), &domain, rank, make);
            let reference = ReferenceCache::load(&mut cache, "ref", domain.local_nt()).unwrap();
            let contraction = BroadcastContraction {
                domain,
                group: &group,
                reference: &reference,
                kernel: &ElementwiseProduct,
                series: "bcast",
                boundary_sign,
            };
            let mut timers = Timers::new();
            let mut emitted = Vec::new();
            for &dt in offsets {
                let mut correlator = Correlator::new(nt);
                contraction
                    .contract_offset(dt, &mut cache, &mut correlator, &mut timers)
                    .unwrap();
                group.global_sum(correlator.as_mut_slice()).unwrap();
                emitted.push(correlator.into_vec());
            }
            emitted
        });
        // All ranks hold the reduced correlators
        for other in &results[1..] {
            assert_eq!(other, &results[0]);
        }
        results.into_iter().next().unwrap()
    }

    #[test]
    fn test_constant_tensors_fill_every_separation_once() {
        let correlators = run_offsets(8, 2, &[0, 2], 1.0, |_, _| {
            constant_tensor(SHAPE, Complex64::ONE)
        });
        let k = Complex64::new(SHAPE.iter().product::<usize>() as f64, 0.0);
        assert_eq!(correlators.len(), 2);
        for correlator in correlators {
            assert_eq!(correlator, vec![k; 8]);
        }
    }

    #[test]
    fn test_antiperiodic_sign_flips_wrapped_contributions() {
        let nt = 8;
        let offsets = [0, 3, 5, 7];
        let periodic = run_offsets(nt, 4, &offsets, 1.0, random_tensor);
        let antiperiodic = run_offsets(nt, 4, &offsets, -1.0, random_tensor);

        for ((dt, plus), minus) in offsets.iter().zip(&periodic).zip(&antiperiodic) {
            for gt in 0..nt {
                // The single contribution at gt comes from sink time gt + dt
                let expected = if gt + dt >= nt { -plus[gt] } else { plus[gt] };
                assert_approx_eq!(f64, minus[gt].re, expected.re, epsilon = 1e-12);
                assert_approx_eq!(f64, minus[gt].im, expected.im, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_result_independent_of_group_size() {
        let offsets = [1, 4, 6];
        let single = run_offsets(8, 1, &offsets, -1.0, random_tensor);
        let split = run_offsets(8, 4, &offsets, -1.0, random_tensor);
        for (a, b) in single.iter().flatten().zip(split.iter().flatten()) {
            assert_approx_eq!(f64, a.re, b.re, epsilon = 1e-12);
            assert_approx_eq!(f64, a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_owner_shape_mismatch() {
        let dir = tempdir().unwrap();
        let domain = TimeDomain::new(2, 1).unwrap();
        let mut cache = rank_cache(dir.path(), &domain, 0, |name, _| {
            if name == "ref" {
                constant_tensor(SHAPE, Complex64::ONE)
            } else {
                constant_tensor([1, 1, 1, 1], Complex64::ONE)
            }
        });
        let reference = ReferenceCache::load(&mut cache, "ref", 2).unwrap();
        let contraction = BroadcastContraction {
            domain,
            group: &SingleProcess,
            reference: &reference,
            kernel: &ElementwiseProduct,
            series: "bcast",
            boundary_sign: 1.0,
        };
        let mut correlator = Correlator::new(2);
        let err = contraction
            .contract_offset(0, &mut cache, &mut correlator, &mut Timers::new())
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Shape(_)));
    }

    #[test]
    fn test_reference_cache_rejects_mixed_shapes() {
        let tensors = vec![
            constant_tensor(SHAPE, Complex64::ONE),
            constant_tensor([2, 3, 1, 1], Complex64::ONE),
        ];
        assert_eq!(
            ReferenceCache::new(tensors).unwrap_err(),
            ShapeError {
                expected: vec![2, 3, 1, 2],
                found: vec![2, 3, 1, 1]
            }
        );
    }

    #[test]
    fn test_correlator_scale_and_reset() {
        let mut correlator = Correlator::new(3);
        correlator[1] += Complex64::new(4.0, -2.0);
        correlator.scale(0.5);
        assert_eq!(correlator[1], Complex64::new(2.0, -1.0));
        correlator.reset();
        assert_eq!(correlator, Correlator::new(3));
    }
}

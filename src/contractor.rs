//! The trajectory loop: import the A2A series of a trajectory, then contract
//! every product.

use std::path::PathBuf;

use itertools::Itertools;
use log::{debug, info};

use crate::cache::TensorCache;
use crate::config::{token_replace, A2AMatrixPar, ContractorPar, ProductPar};
use crate::contraction::{BroadcastContraction, ReferenceCache};
use crate::error::{Error, Result};
use crate::group::ProcessGroup;
use crate::kernel::kernel_for;
use crate::output::{CorrelatorResult, ResultSink};
use crate::timedomain::{parse_range, TimeDomain, TimeSeq};
use crate::timer::{Bytes, Sec, Timers};
use crate::translation::TranslationAverager;

/// Token in file names that is replaced by the trajectory number.
pub const TRAJ_TOKEN: &str = "traj";

/// State of one rank for a whole run.
pub struct Contractor<'g, G: ProcessGroup + ?Sized> {
    par: ContractorPar,
    group: &'g G,
    domain: TimeDomain,
    cache: TensorCache,
}

impl<'g, G: ProcessGroup + ?Sized> Contractor<'g, G> {
    /// Validates the parameters and sets up one disk vector per series under
    /// `<disk_vector_dir><rank>/<name>`.
    pub fn new(par: ContractorPar, group: &'g G) -> Result<Self> {
        par.validate()?;
        let domain = TimeDomain::new(par.global.nt, group.size())?;
        info!(
            rank = group.rank(),
            size = group.size(),
            nt = domain.nt(),
            local_nt = domain.local_nt();
            "Time partition"
        );

        let mut cache = TensorCache::new();
        for matrix in &par.a2a_matrix {
            let dir = Self::series_dir(&par, group.rank(), &matrix.name);
            debug!(series = matrix.name, dir:? = dir; "Creating disk vector");
            cache.add_series(&matrix.name, dir, domain.local_nt(), matrix.cache_size)?;
        }
        Ok(Self {
            par,
            group,
            domain,
            cache,
        })
    }

    fn series_dir(par: &ContractorPar, rank: usize, name: &str) -> PathBuf {
        PathBuf::from(format!("{}{rank}", par.global.disk_vector_dir)).join(name)
    }

    pub fn par(&self) -> &ContractorPar {
        &self.par
    }

    pub fn domain(&self) -> TimeDomain {
        self.domain
    }

    /// The series of this rank, e.g. to fill them without HDF5 files.
    pub fn cache_mut(&mut self) -> &mut TensorCache {
        &mut self.cache
    }

    /// The matrix parameters with the trajectory substituted into file names.
    pub fn matrices_for(&self, traj: u32) -> Vec<A2AMatrixPar> {
        self.par
            .a2a_matrix
            .iter()
            .map(|matrix| A2AMatrixPar {
                file: token_replace(&matrix.file, TRAJ_TOKEN, traj),
                ..matrix.clone()
            })
            .collect()
    }

    /// Imports the local slices of every series of trajectory `traj`.
    #[cfg(feature = "hdf5")]
    pub fn import_trajectory(&mut self, traj: u32) -> Result<()> {
        let mut timers = Timers::new();
        for matrix in self.matrices_for(traj) {
            timers.start("Import");
            let bytes = crate::import::import_series(
                std::path::Path::new(&matrix.file),
                &matrix.dataset,
                &self.domain,
                self.group.rank(),
                self.cache.series_mut(&matrix.name)?,
            )?;
            let elapsed = timers.stop("Import");
            info!(series = matrix.name, file = matrix.file; "Imported {} {}", Sec(elapsed), Bytes(bytes as f64, elapsed));
        }
        Ok(())
    }

    /// Contracts `product` for trajectory `traj` and hands every correlator to
    /// `sink` on the boss rank.
    pub fn run_product(
        &mut self,
        product: &ProductPar,
        traj: u32,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        let mut timers = Timers::new();
        timers.start("Total");
        let nt = self.domain.nt();

        let (reference_name, broadcast_name) = product.end_terms()?;
        let kernel = kernel_for(&product.projectors)?;
        let boundary_sign = product.boundary_sign()?;
        let translations = parse_range(&product.translations, nt)?;
        let time_sets = product
            .times
            .iter()
            .map(|spec| parse_range(spec, nt))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        info!(
            traj,
            terms = product.terms,
            translations = translations.iter().join(","),
            average = product.translation_average;
            "Contracting product"
        );

        let mut averager =
            TranslationAverager::new(&translations, product.translation_average, nt)?;
        // The kernel does not depend on the intermediate times, so each
        // correlator is contracted once and labelled with every tuple.
        let tuples = TimeSeq::new(&time_sets).collect_vec();
        if tuples.is_empty() {
            info!(times:? = product.times; "Empty time tuple set, nothing to contract");
            return Ok(());
        }
        debug!(tuples = tuples.len(); "Time tuples");

        info!(series = reference_name; "Caching reference series");
        timers.start("Reference caching");
        let reference = ReferenceCache::load(&mut self.cache, reference_name, self.domain.local_nt());
        let elapsed = timers.stop("Reference caching");
        let reference = reference?;
        info!("{} {}", Sec(elapsed), Bytes(reference.bytes() as f64, elapsed));

        let contraction = BroadcastContraction {
            domain: self.domain,
            group: self.group,
            reference: &reference,
            kernel: kernel.as_ref(),
            series: broadcast_name,
            boundary_sign,
        };
        let template = CorrelatorResult {
            a2a_matrix: self.matrices_for(traj),
            contraction: product.clone(),
            times: Vec::new(),
            correlator: Vec::new(),
        };

        averager.run(&contraction, &mut self.cache, &mut timers, |correlator, dt| {
            for times in &tuples {
                let result = CorrelatorResult {
                    times: times.clone(),
                    correlator: correlator.to_vec(),
                    ..template.clone()
                };
                sink.write(&result, dt, traj)
                    .map_err(|err| Error::Sink(Box::new(err)))?;
            }
            Ok(())
        })?;
        info!(boundary_t = product.boundary_t; "Boundary condition in T direction is {}", product.boundary_t);

        if let Some(stats) = self.cache.stats(broadcast_name) {
            debug!(
                series = broadcast_name,
                hits = stats.hits,
                misses = stats.misses,
                evictions = stats.evictions;
                "Disk vector statistics"
            );
        }
        timers.stop("Total");
        timers.log_profile("Total");
        Ok(())
    }
}

//! Iteration over the translations of a product, emitting either one
//! correlator per translation or their average.

use itertools::Itertools;
use log::{debug, info};
use num_complex::Complex64;

use crate::cache::TensorCache;
use crate::contraction::{BroadcastContraction, Correlator};
use crate::error::{ConfigError, Result};
use crate::group::ProcessGroup;
use crate::timedomain::TranslationSet;
use crate::timer::Timers;
use crate::types::TimeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AveragerState {
    Init,
    /// Contracting the translation at position `next` of the set.
    PerOffsetLoop { next: usize },
    AverageAndWrite,
    Done,
}

/// Drives [`BroadcastContraction`] over an ascending set of translations.
///
/// Without averaging, every translation is reduced over the group, emitted
/// tagged with its offset and reset. With averaging, contributions accumulate
/// over all translations and a single reduction, division by the number of
/// translations and emission tagged `0` follow the loop. Only the boss rank
/// emits, but every rank must drive the averager through the same states.
#[derive(Debug)]
pub struct TranslationAverager {
    offsets: Vec<TimeIndex>,
    average: bool,
    state: AveragerState,
    correlator: Correlator,
}

impl TranslationAverager {
    /// Fails for an average over an empty set, before any collective.
    pub fn new(
        translations: &TranslationSet,
        average: bool,
        nt: usize,
    ) -> std::result::Result<Self, ConfigError> {
        if average && translations.is_empty() {
            return Err(ConfigError::EmptyTranslations);
        }
        Ok(Self {
            offsets: translations.to_vec(),
            average,
            state: AveragerState::Init,
            correlator: Correlator::new(nt),
        })
    }

    #[inline]
    pub fn state(&self) -> AveragerState {
        self.state
    }

    /// Performs one state transition and returns the new state.
    pub fn step<G, E>(
        &mut self,
        contraction: &BroadcastContraction<'_, G>,
        cache: &mut TensorCache,
        timers: &mut Timers,
        emit: &mut E,
    ) -> Result<AveragerState>
    where
        G: ProcessGroup + ?Sized,
        E: FnMut(&[Complex64], TimeIndex) -> Result<()>,
    {
        let group = contraction.group;
        self.state = match self.state {
            AveragerState::Init => {
                self.correlator.reset();
                if self.offsets.is_empty() {
                    AveragerState::Done
                } else {
                    AveragerState::PerOffsetLoop { next: 0 }
                }
            }
            AveragerState::PerOffsetLoop { next } => {
                let dt = self.offsets[next];
                info!(dt; "Step {}/{} -- dt = {dt}", next + 1, self.offsets.len());
                contraction.contract_offset(dt, cache, &mut self.correlator, timers)?;

                if !self.average {
                    group.global_sum(self.correlator.as_mut_slice())?;
                    if group.is_boss() {
                        emit(self.correlator.as_slice(), dt)?;
                    }
                    self.correlator.reset();
                }

                if next + 1 < self.offsets.len() {
                    AveragerState::PerOffsetLoop { next: next + 1 }
                } else if self.average {
                    AveragerState::AverageAndWrite
                } else {
                    AveragerState::Done
                }
            }
            AveragerState::AverageAndWrite => {
                group.global_sum(self.correlator.as_mut_slice())?;
                self.correlator.scale(1.0 / self.offsets.len() as f64);
                debug!(
                    translations = self.offsets.len();
                    "Averaged correlator: {}",
                    self.correlator.as_slice().iter().join(", ")
                );
                if group.is_boss() {
                    emit(self.correlator.as_slice(), 0)?;
                }
                AveragerState::Done
            }
            AveragerState::Done => AveragerState::Done,
        };
        Ok(self.state)
    }

    /// Runs the state machine to completion.
    pub fn run<G, E>(
        &mut self,
        contraction: &BroadcastContraction<'_, G>,
        cache: &mut TensorCache,
        timers: &mut Timers,
        mut emit: E,
    ) -> Result<()>
    where
        G: ProcessGroup + ?Sized,
        E: FnMut(&[Complex64], TimeIndex) -> Result<()>,
    {
        while self.step(contraction, cache, timers, &mut emit)? != AveragerState::Done {}
        Ok(())
    }
}

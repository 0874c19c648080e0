use std::sync::{Arc, Barrier, Mutex, MutexGuard};
use std::thread;

use log::trace;
use num_complex::Complex64;

use crate::error::CollectiveError;
use crate::group::{check_root, ProcessGroup};
use crate::types::GroupRank;

#[derive(Debug)]
struct Shared {
    size: usize,
    barrier: Barrier,
    slot: Mutex<Vec<Complex64>>,
}

impl Shared {
    fn slot(&self) -> Result<MutexGuard<'_, Vec<Complex64>>, CollectiveError> {
        self.slot.lock().map_err(|_| CollectiveError::Poisoned)
    }
}

/// A process group whose ranks are threads of the current process.
///
/// Each rank owns one handle. The handles exchange data through a shared slot
/// guarded by a barrier, so the same ordering rules as for MPI apply: every
/// rank has to call the same collectives in the same order.
#[derive(Debug)]
pub struct ThreadGroup {
    rank: GroupRank,
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Creates the handles of a group of `size` ranks, ordered by rank.
    #[must_use]
    pub fn new(size: usize) -> Vec<Self> {
        assert!(size > 0, "group must have at least one rank");
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            slot: Mutex::new(Vec::new()),
        });
        (0..size)
            .map(|rank| Self {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Runs `f` on `size` ranks, each on its own thread, and returns the results
    /// ordered by rank.
    ///
    /// # Panics
    /// Panics if any rank panics.
    pub fn run<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(ThreadGroup) -> T + Sync,
        T: Send,
    {
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = Self::new(size)
                .into_iter()
                .map(|group| scope.spawn(move || f(group)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("rank panicked"))
                .collect()
        })
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> GroupRank {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast(&self, buffer: &mut [Complex64], root: GroupRank) -> Result<(), CollectiveError> {
        check_root(root, self.shared.size)?;
        trace!(rank = self.rank, root, len = buffer.len(); "Broadcasting buffer");

        if self.rank == root {
            let mut slot = self.shared.slot()?;
            slot.clear();
            slot.extend_from_slice(buffer);
        }
        self.shared.barrier.wait();

        let result = if self.rank == root {
            Ok(())
        } else {
            let slot = self.shared.slot()?;
            if slot.len() == buffer.len() {
                buffer.copy_from_slice(&slot);
                Ok(())
            } else {
                Err(CollectiveError::LengthMismatch {
                    rank: self.rank,
                    expected: slot.len(),
                    found: buffer.len(),
                })
            }
        };
        // Nobody may touch the slot before all ranks read it
        self.shared.barrier.wait();
        result
    }

    fn global_sum(&self, buffer: &mut [Complex64]) -> Result<(), CollectiveError> {
        trace!(rank = self.rank, len = buffer.len(); "Summing buffer over all ranks");

        // Rank 0 resets the slot, then ranks add their contributions in rank
        // order, so every run sums in the same order.
        if self.rank == 0 {
            let mut slot = self.shared.slot()?;
            slot.clear();
            slot.resize(buffer.len(), Complex64::default());
        }
        self.shared.barrier.wait();

        let mut result = Ok(());
        for turn in 0..self.shared.size {
            if turn == self.rank {
                let mut slot = self.shared.slot()?;
                if slot.len() == buffer.len() {
                    for (acc, value) in slot.iter_mut().zip(buffer.iter()) {
                        *acc += *value;
                    }
                } else {
                    result = Err(CollectiveError::LengthMismatch {
                        rank: self.rank,
                        expected: slot.len(),
                        found: buffer.len(),
                    });
                }
            }
            self.shared.barrier.wait();
        }

        if result.is_ok() {
            let slot = self.shared.slot()?;
            buffer.copy_from_slice(&slot);
        }
        self.shared.barrier.wait();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_from_every_root() {
        let results = ThreadGroup::run(3, |group| {
            let mut received = Vec::new();
            for root in 0..group.size() {
                let mut data = if group.rank() == root {
                    vec![Complex64::new(root as f64, 1.0); 4]
                } else {
                    vec![Complex64::default(); 4]
                };
                group.broadcast(&mut data, root).unwrap();
                received.push(data[3]);
            }
            received
        });
        for received in results {
            assert_eq!(
                received,
                vec![
                    Complex64::new(0.0, 1.0),
                    Complex64::new(1.0, 1.0),
                    Complex64::new(2.0, 1.0)
                ]
            );
        }
    }

    #[test]
    fn test_global_sum() {
        let results = ThreadGroup::run(4, |group| {
            let mut data = vec![Complex64::new(group.rank() as f64, -1.0); 5];
            group.global_sum(&mut data).unwrap();
            // A second reduction must not see leftovers of the first
            let mut again = vec![Complex64::ONE; 2];
            group.global_sum(&mut again).unwrap();
            (data, again)
        });
        for (data, again) in results {
            assert_eq!(data, vec![Complex64::new(6.0, -4.0); 5]);
            assert_eq!(again, vec![Complex64::new(4.0, 0.0); 2]);
        }
    }

    #[test]
    fn test_broadcast_length_mismatch() {
        let results = ThreadGroup::run(2, |group| {
            let mut data = vec![Complex64::ONE; 2 + group.rank()];
            group.broadcast(&mut data, 0)
        });
        assert_eq!(results[0], Ok(()));
        assert_eq!(
            results[1],
            Err(CollectiveError::LengthMismatch {
                rank: 1,
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn test_invalid_root() {
        let mut groups = ThreadGroup::new(1);
        let group = groups.remove(0);
        let mut data = vec![Complex64::ONE];
        assert_eq!(
            group.broadcast(&mut data, 2),
            Err(CollectiveError::InvalidRoot { root: 2, size: 1 })
        );
    }
}

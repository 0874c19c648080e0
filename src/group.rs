//! Collective communication between the ranks of a process group.
//!
//! The contraction pipeline only needs two collectives: a one-to-all
//! [`ProcessGroup::broadcast`] and an all-to-all [`ProcessGroup::global_sum`].
//! Both are blocking and must be called by every rank of the group in the same
//! order. A rank that never reaches a collective stalls the whole group.

#[cfg(feature = "mpi")]
pub mod mpi;
#[cfg(test)]
pub(crate) mod testing;
pub mod threaded;

use num_complex::Complex64;

use crate::error::CollectiveError;
use crate::types::GroupRank;

pub trait ProcessGroup {
    /// The rank of the calling process.
    fn rank(&self) -> GroupRank;

    /// The number of processes in the group.
    fn size(&self) -> usize;

    /// Copies `buffer` of rank `root` into `buffer` of every other rank. All
    /// ranks must pass buffers of the same length.
    fn broadcast(&self, buffer: &mut [Complex64], root: GroupRank) -> Result<(), CollectiveError>;

    /// Replaces `buffer` on every rank by the element-wise sum over all ranks.
    fn global_sum(&self, buffer: &mut [Complex64]) -> Result<(), CollectiveError>;

    /// Whether this rank is responsible for output.
    #[inline]
    fn is_boss(&self) -> bool {
        self.rank() == 0
    }
}

/// Checks that `root` is a valid rank of a group of `size` processes.
pub(crate) fn check_root(root: GroupRank, size: usize) -> Result<(), CollectiveError> {
    if root >= size {
        return Err(CollectiveError::InvalidRoot { root, size });
    }
    Ok(())
}

/// A group consisting only of the calling process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> GroupRank {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _buffer: &mut [Complex64], root: GroupRank) -> Result<(), CollectiveError> {
        check_root(root, 1)
    }

    fn global_sum(&self, _buffer: &mut [Complex64]) -> Result<(), CollectiveError> {
        Ok(())
    }
}

use log::trace;
use mpi::collective::SystemOperation;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator, CommunicatorCollectives, Root};
use mpi::Rank;
use num_complex::Complex64;

use crate::error::CollectiveError;
use crate::group::{check_root, ProcessGroup};
use crate::types::GroupRank;

/// MPI messages can only contain [`i32::MAX`] elements, larger buffers are
/// split into chunks of this many `f64`.
const MAX_MESSAGE_ELEMENTS: usize = i32::MAX as usize;

/// A process group backed by an MPI communicator.
pub struct MpiGroup {
    world: SimpleCommunicator,
}

impl MpiGroup {
    #[must_use]
    pub fn new(world: SimpleCommunicator) -> Self {
        Self { world }
    }

    /// Terminates all processes of the group with the given error code.
    pub fn abort(&self, code: i32) -> ! {
        self.world.abort(code)
    }
}

/// Views complex numbers as interleaved real and imaginary parts.
fn as_reals(buffer: &mut [Complex64]) -> &mut [f64] {
    bytemuck::cast_slice_mut(buffer)
}

impl ProcessGroup for MpiGroup {
    fn rank(&self) -> GroupRank {
        self.world.rank() as GroupRank
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn broadcast(&self, buffer: &mut [Complex64], root: GroupRank) -> Result<(), CollectiveError> {
        check_root(root, self.size())?;
        let root_process = self.world.process_at_rank(root as Rank);

        // All ranks agree on the number of elements before sending data
        let mut len = buffer.len();
        root_process.broadcast_into(&mut len);
        if len != buffer.len() {
            return Err(CollectiveError::LengthMismatch {
                rank: self.rank(),
                expected: len,
                found: buffer.len(),
            });
        }

        trace!(root, len; "Broadcasting buffer");
        for chunk in as_reals(buffer).chunks_mut(MAX_MESSAGE_ELEMENTS) {
            root_process.broadcast_into(chunk);
        }
        Ok(())
    }

    fn global_sum(&self, buffer: &mut [Complex64]) -> Result<(), CollectiveError> {
        trace!(len = buffer.len(); "Summing buffer over all ranks");
        let reals = as_reals(buffer);
        for chunk in reals.chunks_mut(MAX_MESSAGE_ELEMENTS) {
            let send = chunk.to_vec();
            self.world
                .all_reduce_into(&send[..], chunk, SystemOperation::sum());
        }
        Ok(())
    }
}

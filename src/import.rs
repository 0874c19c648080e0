use std::path::Path;

use hdf5::File;
use log::{debug, info};
use ndarray::{s, Ix4};
use num_complex::Complex64;

use crate::cache::disk::DiskVector;
use crate::error::{Error, Result, ShapeError};
use crate::timedomain::TimeDomain;
use crate::types::GroupRank;

/// Copies the time slices owned by `rank` from the dataset `dataset` of the
/// HDF5 file at `path` into `series`. The dataset has shape
/// `[nt, d0, d1, d2, d3]`. Returns the number of bytes read.
pub fn import_series(
    path: &Path,
    dataset: &str,
    domain: &TimeDomain,
    rank: GroupRank,
    series: &mut DiskVector,
) -> Result<usize> {
    let hdf5_error = |source: hdf5::Error| Error::Hdf5 {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(hdf5_error)?;
    let data = file.dataset(dataset).map_err(hdf5_error)?;

    let shape = data.shape();
    if shape.len() != 5 || shape[0] != domain.nt() {
        let mut expected = shape.clone();
        expected.resize(5, 1);
        expected[0] = domain.nt();
        return Err(ShapeError {
            expected,
            found: shape,
        }
        .into());
    }
    info!(path:? = path, dataset, shape:? = shape, series = series.name(); "Importing tensor series");

    let mut bytes = 0;
    for (local, t) in domain.local_range(rank).enumerate() {
        let tensor = data
            .read_slice::<Complex64, _, Ix4>(s![t, .., .., .., ..])
            .map_err(hdf5_error)?;
        debug!(t, local; "Read time slice");
        bytes += tensor.len() * std::mem::size_of::<Complex64>();
        series.write(local, &tensor)?;
    }
    Ok(bytes)
}

pub mod cache;
pub mod config;
pub mod contraction;
pub mod contractor;
pub mod error;
pub mod group;
#[cfg(feature = "hdf5")]
pub mod import;
pub mod kernel;
pub mod output;
pub mod producer;
pub mod timedomain;
pub mod timer;
pub mod translation;
pub mod types;

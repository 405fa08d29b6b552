//! Raster, vector and run-log I/O

pub mod raster;
pub mod boundary;
pub mod run_log;

pub use raster::{RasterWriter, RasterLayer, Compression, RasterEncoding, WriteOptions};
pub use boundary::BoundaryPolygon;
pub use run_log::RunLogger;

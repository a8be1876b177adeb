//! I/O modules for reading imagery and radiometric matrices

pub mod raster;

pub use raster::{DiskRasterStore, RasterStore};

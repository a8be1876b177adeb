//! orthoweave: a fast, modular orthomosaic compositor for georeferenced
//! drone imagery.
//!
//! This library projects each image's footprint onto flat ground from the
//! camera pose, partitions the output canvas between overlapping images
//! with a Voronoi seam (raster mask and vector polygons), warps every image
//! into its footprint on a bounded worker pool, and composites the result
//! under the ownership mask, with a distinct blending rule for radiometric
//! (thermal) imagery.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types
pub use crate::core::pipeline::{
    GeneratedMap, MapGenerator, MapPersistence, NullProgress, ProgressSink,
};
pub use io::raster::{DiskRasterStore, RasterStore};
pub use types::{
    CameraPose, Canvas, GpsPosition, Hemisphere, MapAggregate, MapBounds, MapElement, OrthoConfig,
    OrthoError, OrthoResult, SourceImageRecord, UtmPosition, WarpedTile,
};

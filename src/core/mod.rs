//! Core orthomosaic processing modules

pub mod coords;
pub mod reference_yaw;
pub mod footprint;
pub mod canvas;
pub mod seam;
pub mod warp;
pub mod executor;
pub mod compositor;
pub mod pipeline;

// Re-export main types
pub use coords::{central_meridian_deg, CoordinateTransformer};
pub use reference_yaw::ReferenceYawEstimator;
pub use footprint::{CameraFootprintProjector, Footprint};
pub use canvas::CanvasRasterizer;
pub use seam::{clip_polygon, voronoi_cell, SeamMaskBuilder};
pub use warp::{warp_element, Homography};
pub use executor::{ParallelWarpExecutor, TaskHandle, WaitError, WarpOutcome, WorkerPool};
pub use compositor::MapCompositor;
pub use pipeline::{
    GeneratedMap, MapGenerator, MapPersistence, NullProgress, ProgressSink,
};

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raster ownership mask (one element index per canvas pixel)
pub type OwnershipMask = Array2<u32>;

/// 4-channel 8-bit canvas pixel buffer (height x width x RGBA)
pub type CanvasBuffer = Array3<u8>;

/// A 2D point in canvas pixel space
pub type PixelPoint = [f64; 2];

/// UTM hemisphere designator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hemisphere {
    North,
    South,
}

impl std::fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hemisphere::North => write!(f, "N"),
            Hemisphere::South => write!(f, "S"),
        }
    }
}

/// Projected position in a single UTM zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtmPosition {
    pub easting: f64,
    pub northing: f64,
    pub zone: u8,
    pub hemisphere: Hemisphere,
}

/// Geographic position (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPosition {
    pub lat: f64,
    pub lon: f64,
}

/// Camera pose at capture time
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraPose {
    /// Horizontal field of view in degrees
    pub fov_deg: f64,
    /// Altitude above ground in meters
    pub relative_alt_m: f64,
    /// Gimbal yaw in degrees (compass convention); None when the sensor did not report it
    pub camera_yaw_deg: Option<f64>,
    /// Gimbal pitch in degrees from horizontal (-90 = nadir)
    pub camera_pitch_deg: f64,
    /// Gimbal roll in degrees about the optical axis
    pub camera_roll_deg: f64,
    /// Aircraft heading in degrees (compass convention)
    pub platform_yaw_deg: f64,
}

/// One georeferenced source image, immutable once accepted into the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceImageRecord {
    pub id: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub utm: UtmPosition,
    pub gps: GpsPosition,
    pub pose: CameraPose,
    /// True for thermal (radiometric) imagery
    pub radiometric: bool,
    /// Pre-decoded temperature matrix, if the thermal SDK already produced one
    pub matrix_path: Option<PathBuf>,
}

impl SourceImageRecord {
    /// Validate required geometry fields once at ingestion.
    ///
    /// Records with out-of-range zones, non-finite coordinates or a
    /// degenerate camera model are rejected before any projection work.
    pub fn validate(&self) -> OrthoResult<()> {
        if self.utm.zone < 1 || self.utm.zone > 60 {
            return Err(OrthoError::InvalidCoordinate(format!(
                "image {}: UTM zone {} outside 1..=60",
                self.id, self.utm.zone
            )));
        }
        if !self.utm.easting.is_finite() || !self.utm.northing.is_finite() {
            return Err(OrthoError::InvalidCoordinate(format!(
                "image {}: non-finite UTM position",
                self.id
            )));
        }
        if !self.gps.lat.is_finite()
            || !self.gps.lon.is_finite()
            || self.gps.lat.abs() > 90.0
            || self.gps.lon.abs() > 180.0
        {
            return Err(OrthoError::InvalidCoordinate(format!(
                "image {}: GPS position ({}, {}) out of range",
                self.id, self.gps.lat, self.gps.lon
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(OrthoError::Processing(format!(
                "image {}: zero pixel dimensions",
                self.id
            )));
        }
        if !(self.pose.fov_deg > 0.0 && self.pose.fov_deg < 180.0) {
            return Err(OrthoError::Processing(format!(
                "image {}: field of view {} degrees is unusable",
                self.id, self.pose.fov_deg
            )));
        }
        if !(self.pose.relative_alt_m > 0.0) || !self.pose.relative_alt_m.is_finite() {
            return Err(OrthoError::Processing(format!(
                "image {}: relative altitude {} is unusable",
                self.id, self.pose.relative_alt_m
            )));
        }
        Ok(())
    }
}

/// Rectangular region of the canvas occupied by one element's footprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Per-element warped pixel data, freed immediately after compositing
#[derive(Debug, Clone)]
pub enum WarpedTile {
    /// RGBA warp of a visual image (height x width x 4)
    Visual(Array3<u8>),
    /// Raw-value warp of a radiometric matrix plus per-pixel validity
    Radiometric {
        values: Array2<f32>,
        alpha: Array2<u8>,
    },
}

/// One placed image in the output map.
///
/// `index` is the ownership key for the whole rest of the pipeline: it is
/// assigned once, right after the geometry-rejection filter, as a dense
/// 0..N-1 sequence over surviving elements and is never reassigned or reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapElement {
    pub image_id: String,
    /// Path actually used for warping (thermal elements may point at a
    /// pre-decoded matrix instead of the raw image)
    pub image_path: PathBuf,
    pub index: u32,
    pub created_at: DateTime<Utc>,
    pub radiometric: bool,
    /// Set when the full footprint was rejected as implausible and a
    /// lower-half reprojection was substituted
    pub use_lower_half: bool,
    pub source_width: u32,
    pub source_height: u32,
    /// UTM center of the ground footprint
    pub center: UtmPosition,
    /// UTM footprint corners, fixed winding: TL, TR, BR, BL (sensor-relative)
    pub corners: [UtmPosition; 4],
    pub center_gps: GpsPosition,
    pub corners_gps: [GpsPosition; 4],
    /// Canvas-space center (centroid of the pixel corners)
    pub px_center: PixelPoint,
    /// Canvas-space footprint corners, same winding as `corners`
    pub px_corners: [PixelPoint; 4],
    pub roi: Roi,
    /// Voronoi seam cell in GPS space, if one could be constructed
    pub voronoi_gps: Option<Vec<GpsPosition>>,
    /// Voronoi seam cell back-projected into source-image pixel space
    pub voronoi_image_px: Option<Vec<PixelPoint>>,
    #[serde(skip)]
    pub tile: Option<WarpedTile>,
}

/// Output canvas: single mutable buffer, written only by the compositor
#[derive(Debug, Clone)]
pub struct Canvas {
    pub width: usize,
    pub height: usize,
    /// Pixels per meter
    pub scale: f64,
    pub min_easting: f64,
    pub min_northing: f64,
    pub max_easting: f64,
    pub max_northing: f64,
    pub zone: u8,
    pub hemisphere: Hemisphere,
    /// Padding applied on every side when the canvas was sized
    pub padding_px: usize,
    pub buffer: CanvasBuffer,
    pub mask: OwnershipMask,
}

impl Canvas {
    /// Convert a UTM coordinate to canvas pixel space (row 0 = max northing).
    pub fn utm_to_px(&self, easting: f64, northing: f64) -> PixelPoint {
        [
            (easting - self.min_easting) * self.scale + self.padding_px as f64,
            (self.max_northing - northing) * self.scale + self.padding_px as f64,
        ]
    }

    /// Convert a canvas pixel coordinate back to UTM.
    pub fn px_to_utm(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.min_easting + (px - self.padding_px as f64) / self.scale,
            self.max_northing - (py - self.padding_px as f64) / self.scale,
        )
    }
}

/// Georeferenced bounds of the finished map, in both coordinate systems
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapBounds {
    pub gps_min: GpsPosition,
    pub gps_max: GpsPosition,
    pub utm_min: UtmPosition,
    pub utm_max: UtmPosition,
    /// Canvas corners TL, TR, BR, BL
    pub corners_utm: [UtmPosition; 4],
    pub corners_gps: [GpsPosition; 4],
}

/// The finished map handed to the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapAggregate {
    pub name: String,
    pub raster_path: PathBuf,
    /// Always false: this engine is the native compositor, not an ODM import
    pub odm: bool,
    pub bounds: MapBounds,
    pub created_at: DateTime<Utc>,
}

/// Run configuration for one map generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrthoConfig {
    /// Target size of the longer canvas axis in pixels
    pub target_resolution: usize,
    /// Seam mask is computed at canvas/performance_factor resolution
    pub performance_factor: usize,
    /// Elements per warp batch
    pub warp_batch_size: usize,
    /// Wall-clock budget for a single element's load+warp
    pub warp_timeout_secs: u64,
    /// Batch/stage retries before the run is declared failed
    pub retry_cap: usize,
    /// Bounded worker pool size for per-image work
    pub worker_count: usize,
    /// Blank margin added on every canvas side
    pub canvas_padding_px: usize,
}

impl Default for OrthoConfig {
    fn default() -> Self {
        Self {
            target_resolution: 6144, // Longer canvas axis
            performance_factor: 8,   // 8x downsampled seam mask
            warp_batch_size: 32,     // Elements per pool batch
            warp_timeout_secs: 60,   // Per-element warp budget
            retry_cap: 3,            // Batch retries before giving up
            worker_count: 8,         // Pool threads
            canvas_padding_px: 10,   // Margin around the mosaic
        }
    }
}

/// Error types for orthomosaic processing
#[derive(Debug, thiserror::Error)]
pub enum OrthoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Ray left the ground plane: {0}")]
    GeometryRejected(String),

    #[error("Implausible footprint: {0}")]
    FootprintImplausible(String),

    #[error("Warp timed out for element {0}")]
    WarpTimeout(u32),

    #[error("Warp batch failed: {0}")]
    BatchFailure(String),

    #[error("Retry cap exhausted: {0}")]
    StageExhausted(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for orthomosaic operations
pub type OrthoResult<T> = Result<T, OrthoError>;

use crate::core::canvas::CanvasRasterizer;
use crate::core::compositor::MapCompositor;
use crate::core::coords::CoordinateTransformer;
use crate::core::executor::ParallelWarpExecutor;
use crate::core::footprint::{CameraFootprintProjector, Footprint};
use crate::core::reference_yaw::ReferenceYawEstimator;
use crate::core::seam::SeamMaskBuilder;
use crate::io::raster::RasterStore;
use crate::types::{
    GpsPosition, MapAggregate, MapBounds, MapElement, OrthoConfig, OrthoError, OrthoResult, Roi,
    SourceImageRecord, UtmPosition,
};
use chrono::Utc;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Push-style progress collaborator.
///
/// Milestones are monotonically increasing percentages; a fatal failure is
/// reported as a distinguished terminal state, never as a percentage.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, percent: u8);
    fn failed(&self, reason: &str);
}

/// Sink that discards all notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn progress(&self, _percent: u8) {}
    fn failed(&self, _reason: &str) {}
}

/// Persistence collaborator receiving the finished map and its placement
/// records.
pub trait MapPersistence {
    fn persist(&self, map: &MapAggregate, elements: &[MapElement]) -> OrthoResult<()>;
}

/// The finished run: the map aggregate plus the ordered placement records.
#[derive(Debug, Clone)]
pub struct GeneratedMap {
    pub map: MapAggregate,
    pub elements: Vec<MapElement>,
}

/// End-to-end driver for one map generation run.
///
/// The driving logic is single-threaded; per-image work (footprint
/// projection, warping) runs on bounded worker pools, and the canvas is only
/// ever written by the compositor after the parallel stages have returned.
pub struct MapGenerator {
    config: OrthoConfig,
    store: Arc<dyn RasterStore>,
}

impl MapGenerator {
    pub fn new(config: OrthoConfig, store: Arc<dyn RasterStore>) -> Self {
        Self { config, store }
    }

    /// Generate the composite raster and placement metadata for a flight.
    ///
    /// Per-element problems degrade the output (dropped footprints, holes
    /// from timed-out warps); only retry-cap exhaustion aborts the run, in
    /// which case nothing is persisted and the progress sink receives the
    /// terminal failure.
    pub fn generate(
        &self,
        name: &str,
        records: &[SourceImageRecord],
        output_path: &Path,
        progress: &dyn ProgressSink,
        persistence: &dyn MapPersistence,
    ) -> OrthoResult<GeneratedMap> {
        match self.run(name, records, output_path, progress, persistence) {
            Ok(result) => {
                progress.progress(100);
                Ok(result)
            }
            Err(e) => {
                log::error!("Map generation failed: {}", e);
                progress.failed(&e.to_string());
                Err(e)
            }
        }
    }

    fn run(
        &self,
        name: &str,
        records: &[SourceImageRecord],
        output_path: &Path,
        progress: &dyn ProgressSink,
        persistence: &dyn MapPersistence,
    ) -> OrthoResult<GeneratedMap> {
        if records.is_empty() {
            return Err(OrthoError::Processing(
                "cannot generate a map from zero images".to_string(),
            ));
        }
        for record in records {
            record.validate()?;
        }
        let zone = records[0].utm.zone;
        let hemisphere = records[0].utm.hemisphere;
        if records
            .iter()
            .any(|r| r.utm.zone != zone || r.utm.hemisphere != hemisphere)
        {
            return Err(OrthoError::InvalidCoordinate(
                "images span multiple UTM zones".to_string(),
            ));
        }
        let tf = CoordinateTransformer::new(zone, hemisphere)?;

        log::info!("Generating map '{}' from {} images", name, records.len());
        let reference_yaw = ReferenceYawEstimator::new().estimate(records);

        let footprints = self.project_footprints(records, &tf, reference_yaw)?;
        log::info!(
            "{} of {} footprints accepted",
            footprints.len(),
            records.len()
        );
        progress.progress(20);

        let mut elements = build_elements(footprints, &tf);
        progress.progress(25);

        let rasterizer =
            CanvasRasterizer::new(self.config.target_resolution, self.config.canvas_padding_px);
        let mut canvas = rasterizer.rasterize(&mut elements)?;
        progress.progress(30);

        let seam = SeamMaskBuilder::new(self.config.performance_factor);
        canvas.mask = seam.build_raster_mask(canvas.width, canvas.height, &elements)?;
        progress.progress(50);

        // Warp and composite batch by batch: tiles are merged and freed
        // before the next batch is submitted, so peak memory is bounded by
        // the batch size rather than the element count.
        let mut executor = ParallelWarpExecutor::new(
            Arc::clone(&self.store),
            self.config.worker_count,
            Duration::from_secs(self.config.warp_timeout_secs),
            self.config.retry_cap,
        )?;
        let mut compositor = MapCompositor::new();
        let total = elements.len();
        let batch_size = self.config.warp_batch_size.max(1);
        let mut merged = 0usize;
        for start in (0..total).step_by(batch_size) {
            let end = (start + batch_size).min(total);
            let outcomes = executor.warp_batch(&elements[start..end])?;
            for (outcome, element) in outcomes.into_iter().zip(elements[start..end].iter_mut()) {
                element.tile = outcome.tile;
            }
            for element in elements[start..end].iter_mut() {
                compositor.merge_element(&mut canvas, element);
            }
            merged = end;
            let percent = 50 + (45 * merged / total) as u8;
            progress.progress(percent);
        }
        compositor.finalize(&mut canvas)?;

        seam.build_vector_cells(&canvas, &mut elements, &tf)?;
        progress.progress(97);

        self.store.save_rgba(output_path, &canvas.buffer)?;

        let map = MapAggregate {
            name: name.to_string(),
            raster_path: output_path.to_path_buf(),
            odm: false,
            bounds: bounds_of(&canvas, &tf),
            created_at: Utc::now(),
        };
        persistence.persist(&map, &elements)?;

        Ok(GeneratedMap { map, elements })
    }

    /// Project all footprints on a bounded pool, absorbing per-image
    /// geometry failures. Systemic failures retry the whole stage up to the
    /// retry cap.
    fn project_footprints(
        &self,
        records: &[SourceImageRecord],
        tf: &CoordinateTransformer,
        reference_yaw: f64,
    ) -> OrthoResult<Vec<Footprint>> {
        let projector = CameraFootprintProjector::new(reference_yaw);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let pool = match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.worker_count.max(1))
                .build()
            {
                Ok(pool) => pool,
                Err(e) => {
                    if attempt >= self.config.retry_cap {
                        return Err(OrthoError::StageExhausted(format!(
                            "footprint stage failed {} times: {}",
                            attempt, e
                        )));
                    }
                    log::warn!("Footprint pool construction failed ({}), retrying", e);
                    continue;
                }
            };
            let footprints: Vec<Footprint> = pool.install(|| {
                records
                    .par_iter()
                    .filter_map(|record| match projector.project(record, tf) {
                        Ok(fp) => Some(fp),
                        Err(e) => {
                            log::warn!("Dropping image {}: {}", record.id, e);
                            None
                        }
                    })
                    .collect()
            });
            return Ok(footprints);
        }
    }
}

/// Turn accepted footprints into indexed elements.
///
/// Indices are assigned here, once, after the geometry filter: a dense
/// 0..N-1 sequence in input order that the ownership mask and compositor key
/// on for the rest of the run.
fn build_elements(footprints: Vec<Footprint>, tf: &CoordinateTransformer) -> Vec<MapElement> {
    footprints
        .into_iter()
        .enumerate()
        .map(|(i, fp)| {
            let center_gps = tf.utm_to_gps(fp.center.easting, fp.center.northing);
            let mut corners_gps = [GpsPosition { lat: 0.0, lon: 0.0 }; 4];
            for (slot, corner) in corners_gps.iter_mut().zip(fp.corners.iter()) {
                *slot = tf.utm_to_gps(corner.easting, corner.northing);
            }
            MapElement {
                image_id: fp.image_id,
                image_path: fp.warp_path,
                index: i as u32,
                created_at: fp.captured_at,
                radiometric: fp.radiometric,
                use_lower_half: fp.use_lower_half,
                source_width: fp.source_width,
                source_height: fp.source_height,
                center: fp.center,
                corners: fp.corners,
                center_gps,
                corners_gps,
                px_center: [0.0, 0.0],
                px_corners: [[0.0, 0.0]; 4],
                roi: Roi::default(),
                voronoi_gps: None,
                voronoi_image_px: None,
                tile: None,
            }
        })
        .collect()
}

/// Georeferenced bounds of the finished canvas in both coordinate systems.
fn bounds_of(canvas: &crate::types::Canvas, tf: &CoordinateTransformer) -> MapBounds {
    let utm = |easting: f64, northing: f64| UtmPosition {
        easting,
        northing,
        zone: canvas.zone,
        hemisphere: canvas.hemisphere,
    };
    let corners_utm = [
        utm(canvas.min_easting, canvas.max_northing),
        utm(canvas.max_easting, canvas.max_northing),
        utm(canvas.max_easting, canvas.min_northing),
        utm(canvas.min_easting, canvas.min_northing),
    ];
    let mut corners_gps = [GpsPosition { lat: 0.0, lon: 0.0 }; 4];
    for (slot, corner) in corners_gps.iter_mut().zip(corners_utm.iter()) {
        *slot = tf.utm_to_gps(corner.easting, corner.northing);
    }
    MapBounds {
        gps_min: tf.utm_to_gps(canvas.min_easting, canvas.min_northing),
        gps_max: tf.utm_to_gps(canvas.max_easting, canvas.max_northing),
        utm_min: utm(canvas.min_easting, canvas.min_northing),
        utm_max: utm(canvas.max_easting, canvas.max_northing),
        corners_utm,
        corners_gps,
    }
}

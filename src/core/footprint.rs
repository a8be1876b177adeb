use crate::core::coords::CoordinateTransformer;
use crate::types::{OrthoError, OrthoResult, SourceImageRecord, UtmPosition};
use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use std::path::PathBuf;

/// Footprints whose corners land further than this many nadir-equivalent
/// diagonals from the camera are rejected as implausible.
const MAX_FOOTPRINT_FACTOR: f64 = 20.0;

/// Vertical component substituted for rays that do not point at the ground.
const RAY_NUDGE_Z: f64 = -1e-3;

/// Ground footprint of one image before element indices are assigned.
#[derive(Debug, Clone)]
pub struct Footprint {
    pub image_id: String,
    /// Path used for warping; thermal images with a pre-decoded matrix on
    /// disk substitute the matrix here
    pub warp_path: PathBuf,
    pub source_width: u32,
    pub source_height: u32,
    pub captured_at: DateTime<Utc>,
    pub radiometric: bool,
    pub use_lower_half: bool,
    pub center: UtmPosition,
    /// UTM corners, winding TL, TR, BR, BL in sensor-relative terms
    pub corners: [UtmPosition; 4],
}

/// Orthonormal camera axes in ENU world space.
struct CameraAxes {
    optical: Vector3<f64>,
    right: Vector3<f64>,
    down: Vector3<f64>,
}

/// Projects one image's ground quadrilateral from its pose and the global
/// reference yaw, assuming flat ground at the camera's relative altitude.
#[derive(Debug, Clone, Copy)]
pub struct CameraFootprintProjector {
    reference_yaw_deg: f64,
}

impl CameraFootprintProjector {
    pub fn new(reference_yaw_deg: f64) -> Self {
        Self { reference_yaw_deg }
    }

    /// Compute the footprint for one record.
    ///
    /// An implausible full-frame footprint is retried with only the lower
    /// half of the image; if that is still implausible the error propagates
    /// and the caller drops the image from the run.
    pub fn project(
        &self,
        record: &SourceImageRecord,
        tf: &CoordinateTransformer,
    ) -> OrthoResult<Footprint> {
        match self.project_region(record, tf, false) {
            Ok((corners, center)) => Ok(self.build(record, corners, center, false)),
            Err(OrthoError::FootprintImplausible(reason)) => {
                log::warn!(
                    "Image {}: full footprint implausible ({}), retrying with lower half",
                    record.id,
                    reason
                );
                let (corners, center) = self.project_region(record, tf, true)?;
                Ok(self.build(record, corners, center, true))
            }
            Err(e) => Err(e),
        }
    }

    fn build(
        &self,
        record: &SourceImageRecord,
        corners: [UtmPosition; 4],
        center: UtmPosition,
        use_lower_half: bool,
    ) -> Footprint {
        let warp_path = match &record.matrix_path {
            Some(p) if record.radiometric && p.exists() => p.clone(),
            _ => record.path.clone(),
        };
        Footprint {
            image_id: record.id.clone(),
            warp_path,
            source_width: record.width,
            source_height: record.height,
            captured_at: record.captured_at,
            radiometric: record.radiometric,
            use_lower_half,
            center,
            corners,
        }
    }

    /// Project either the full frame or the lower half onto the ground plane.
    fn project_region(
        &self,
        record: &SourceImageRecord,
        tf: &CoordinateTransformer,
        lower_half: bool,
    ) -> OrthoResult<([UtmPosition; 4], UtmPosition)> {
        let w = record.width as f64;
        let h = record.height as f64;
        let diag_px = (w * w + h * h).sqrt();
        let half_fov = record.pose.fov_deg.to_radians() / 2.0;
        let focal_px = diag_px / (2.0 * half_fov.tan());

        let convergence = tf.grid_convergence_deg(record.gps.lat, record.gps.lon);
        let camera_yaw = record
            .pose
            .camera_yaw_deg
            .unwrap_or(record.pose.platform_yaw_deg);
        let heading = camera_yaw + self.reference_yaw_deg - convergence;

        let axes = camera_axes(
            heading,
            record.pose.camera_pitch_deg,
            record.pose.camera_roll_deg,
        );

        let v_top = if lower_half { h / 2.0 } else { 0.0 };
        let corner_px = [[0.0, v_top], [w, v_top], [w, h], [0.0, h]];
        let center_px = [w / 2.0, (v_top + h) / 2.0];

        let alt = record.pose.relative_alt_m;
        // The footprint of a nadir shot spans exactly one of these diagonals;
        // anything beyond MAX_FOOTPRINT_FACTOR of them cannot be trusted.
        let nadir_diag_m = 2.0 * half_fov.tan() * alt;
        let max_dist_m = MAX_FOOTPRINT_FACTOR * nadir_diag_m;

        let mut corners = [UtmPosition {
            easting: 0.0,
            northing: 0.0,
            zone: record.utm.zone,
            hemisphere: record.utm.hemisphere,
        }; 4];
        for (i, px) in corner_px.iter().enumerate() {
            let (e, n) = ray_to_ground(record, &axes, focal_px, px[0], px[1], w, h)?;
            let dist = ((e - record.utm.easting).powi(2) + (n - record.utm.northing).powi(2)).sqrt();
            if dist > max_dist_m {
                return Err(OrthoError::FootprintImplausible(format!(
                    "corner {} lands {:.0} m from the camera (limit {:.0} m)",
                    i, dist, max_dist_m
                )));
            }
            corners[i].easting = e;
            corners[i].northing = n;
        }

        let (ce, cn) = ray_to_ground(record, &axes, focal_px, center_px[0], center_px[1], w, h)?;
        let center = UtmPosition {
            easting: ce,
            northing: cn,
            zone: record.utm.zone,
            hemisphere: record.utm.hemisphere,
        };
        Ok((corners, center))
    }
}

/// Build the camera's orthonormal axes from grid heading, pitch and roll.
///
/// Heading is measured counter-clockwise from grid east, pitch from the
/// horizon (-90 = nadir), roll about the optical axis.
fn camera_axes(heading_deg: f64, pitch_deg: f64, roll_deg: f64) -> CameraAxes {
    let th = heading_deg.to_radians();
    let p = pitch_deg.to_radians();
    let r = roll_deg.to_radians();

    let optical = Vector3::new(p.cos() * th.cos(), p.cos() * th.sin(), p.sin());
    // Horizontal right-hand vector of the heading; stays well-defined at nadir
    let right0 = Vector3::new(th.sin(), -th.cos(), 0.0);
    let down0 = optical.cross(&right0);

    let right = right0 * r.cos() + down0 * r.sin();
    let down = down0 * r.cos() - right0 * r.sin();
    CameraAxes {
        optical,
        right,
        down,
    }
}

/// Intersect the pinhole ray through pixel (u, v) with the ground plane.
fn ray_to_ground(
    record: &SourceImageRecord,
    axes: &CameraAxes,
    focal_px: f64,
    u: f64,
    v: f64,
    w: f64,
    h: f64,
) -> OrthoResult<(f64, f64)> {
    let dir = axes.right * (u - w / 2.0) + axes.down * (v - h / 2.0) + axes.optical * focal_px;

    let mut dz = dir.z;
    if dz >= 0.0 {
        // Ray at or above the horizon: nudge it just below and retry once
        dz = RAY_NUDGE_Z;
    }
    let t = record.pose.relative_alt_m / -dz;
    let e = record.utm.easting + dir.x * t;
    let n = record.utm.northing + dir.y * t;
    if !e.is_finite() || !n.is_finite() {
        return Err(OrthoError::GeometryRejected(format!(
            "image {}: ray through ({:.0}, {:.0}) has no finite ground intersection",
            record.id, u, v
        )));
    }
    Ok((e, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CameraPose, GpsPosition, Hemisphere};
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    fn nadir_record(pitch: f64, yaw: f64) -> SourceImageRecord {
        SourceImageRecord {
            id: "img".to_string(),
            path: "img.jpg".into(),
            width: 1000,
            height: 1000,
            captured_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            utm: UtmPosition {
                easting: 500_000.0,
                northing: 5_300_000.0,
                zone: 32,
                hemisphere: Hemisphere::North,
            },
            // On the zone 32 central meridian, so grid convergence is zero
            gps: GpsPosition { lat: 47.85, lon: 9.0 },
            pose: CameraPose {
                fov_deg: 60.0,
                relative_alt_m: 100.0,
                camera_yaw_deg: Some(yaw),
                camera_pitch_deg: pitch,
                camera_roll_deg: 0.0,
                platform_yaw_deg: yaw,
            },
            radiometric: false,
            matrix_path: None,
        }
    }

    fn tf() -> CoordinateTransformer {
        CoordinateTransformer::new(32, Hemisphere::North).unwrap()
    }

    #[test]
    fn test_nadir_footprint_is_centered_rectangle() {
        let record = nadir_record(-90.0, 90.0);
        let fp = CameraFootprintProjector::new(0.0)
            .project(&record, &tf())
            .unwrap();

        assert!(!fp.use_lower_half);
        assert_abs_diff_eq!(fp.center.easting, record.utm.easting, epsilon = 1e-6);
        assert_abs_diff_eq!(fp.center.northing, record.utm.northing, epsilon = 1e-6);

        // Half-side for a square nadir frame: alt * (w/2) / focal
        let diag_px = (2.0f64 * 1000.0 * 1000.0).sqrt();
        let focal = diag_px / (2.0 * 30.0f64.to_radians().tan());
        let half = 100.0 * 500.0 / focal;

        let e0 = record.utm.easting;
        let n0 = record.utm.northing;
        // TL is north-west of the camera for a north-facing nadir shot
        assert_abs_diff_eq!(fp.corners[0].easting, e0 - half, epsilon = 1e-6);
        assert_abs_diff_eq!(fp.corners[0].northing, n0 + half, epsilon = 1e-6);
        assert_abs_diff_eq!(fp.corners[1].easting, e0 + half, epsilon = 1e-6);
        assert_abs_diff_eq!(fp.corners[1].northing, n0 + half, epsilon = 1e-6);
        assert_abs_diff_eq!(fp.corners[2].easting, e0 + half, epsilon = 1e-6);
        assert_abs_diff_eq!(fp.corners[2].northing, n0 - half, epsilon = 1e-6);
        assert_abs_diff_eq!(fp.corners[3].easting, e0 - half, epsilon = 1e-6);
        assert_abs_diff_eq!(fp.corners[3].northing, n0 - half, epsilon = 1e-6);

        // The footprint diagonal equals the nadir-equivalent diagonal
        let diag_m = ((fp.corners[2].easting - fp.corners[0].easting).powi(2)
            + (fp.corners[2].northing - fp.corners[0].northing).powi(2))
        .sqrt();
        assert_abs_diff_eq!(
            diag_m,
            2.0 * 30.0f64.to_radians().tan() * 100.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_oblique_footprint_is_simple_quadrilateral() {
        let record = nadir_record(-55.0, 37.0);
        let fp = CameraFootprintProjector::new(0.0)
            .project(&record, &tf())
            .unwrap();

        // No pair of non-adjacent edges may intersect
        let pts: Vec<[f64; 2]> = fp
            .corners
            .iter()
            .map(|c| [c.easting, c.northing])
            .collect();
        for i in 0..4 {
            let j = (i + 2) % 4;
            let (a, b) = (pts[i], pts[(i + 1) % 4]);
            let (c, d) = (pts[j], pts[(j + 1) % 4]);
            assert!(
                !segments_intersect(a, b, c, d),
                "edges {} and {} intersect",
                i,
                j
            );
        }
    }

    fn segments_intersect(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> bool {
        let cross = |o: [f64; 2], p: [f64; 2], q: [f64; 2]| {
            (p[0] - o[0]) * (q[1] - o[1]) - (p[1] - o[1]) * (q[0] - o[0])
        };
        let d1 = cross(c, d, a);
        let d2 = cross(c, d, b);
        let d3 = cross(a, b, c);
        let d4 = cross(a, b, d);
        ((d1 > 0.0) != (d2 > 0.0)) && ((d3 > 0.0) != (d4 > 0.0))
    }

    #[test]
    fn test_shallow_pitch_uses_lower_half() {
        // Top corners sit above the horizon; the lower half still lands
        // within the plausibility bound.
        let record = nadir_record(-10.0, 90.0);
        let fp = CameraFootprintProjector::new(0.0)
            .project(&record, &tf())
            .unwrap();
        assert!(fp.use_lower_half);
    }

    #[test]
    fn test_near_horizontal_pitch_is_dropped() {
        // Even the lower half of a 1-degree-down frame lands kilometres away.
        let record = nadir_record(-1.0, 90.0);
        let err = CameraFootprintProjector::new(0.0)
            .project(&record, &tf())
            .unwrap_err();
        assert!(matches!(err, OrthoError::FootprintImplausible(_)));
    }

    #[test]
    fn test_reference_yaw_rotates_footprint() {
        // Same nadir shot with the heading rotated 90 degrees via the
        // reference yaw: the footprint must stay centered but swap axes.
        let record = nadir_record(-90.0, 0.0);
        let fp_a = CameraFootprintProjector::new(0.0)
            .project(&record, &tf())
            .unwrap();
        let fp_b = CameraFootprintProjector::new(90.0)
            .project(&record, &tf())
            .unwrap();

        assert_abs_diff_eq!(fp_b.center.easting, fp_a.center.easting, epsilon = 1e-6);
        // Corner 0 rotates by 90 degrees around the center
        let (e0, n0) = (record.utm.easting, record.utm.northing);
        let (ax, ay) = (fp_a.corners[0].easting - e0, fp_a.corners[0].northing - n0);
        let (bx, by) = (fp_b.corners[0].easting - e0, fp_b.corners[0].northing - n0);
        assert_abs_diff_eq!(bx, -ay, epsilon = 1e-6);
        assert_abs_diff_eq!(by, ax, epsilon = 1e-6);
    }
}

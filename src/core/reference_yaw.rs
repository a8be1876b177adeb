use crate::types::SourceImageRecord;

/// Wrap an angle difference into [-180, 180) degrees.
pub fn wrap_deg(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a >= 180.0 {
        a -= 360.0;
    } else if a < -180.0 {
        a += 360.0;
    }
    a
}

/// Derives one global heading-correction offset for a flight sequence.
///
/// The drone's gimbal yaw readings carry a constant bias against the true
/// UTM-grid heading. On a straight flight leg the trajectory itself gives the
/// true heading, so the bias can be read off a single well-behaved triplet of
/// consecutive positions. The resulting scalar is added to every image's
/// heading for the rest of the run.
#[derive(Debug, Clone)]
pub struct ReferenceYawEstimator {
    /// Maximum camera-yaw drift between consecutive images on a usable leg
    orientation_margin_deg: f64,
    /// Maximum bend between the two displacement vectors of a triplet
    straightness_margin_deg: f64,
}

impl Default for ReferenceYawEstimator {
    fn default() -> Self {
        Self {
            orientation_margin_deg: 1.5,
            straightness_margin_deg: 5.0,
        }
    }
}

impl ReferenceYawEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimate the reference yaw in degrees for a time-ordered sequence.
    ///
    /// Scans consecutive triplets for a straight, steadily-oriented leg and
    /// returns `trajectory_bearing - camera_yaw` of the middle image. Falls
    /// back to `platform_yaw - camera_yaw` of the first image, then to 0.
    pub fn estimate(&self, records: &[SourceImageRecord]) -> f64 {
        let usable: Vec<&SourceImageRecord> = records
            .iter()
            .filter(|r| {
                r.pose.camera_yaw_deg.is_some()
                    && r.utm.easting.is_finite()
                    && r.utm.northing.is_finite()
            })
            .collect();

        if usable.len() >= 3 {
            for w in usable.windows(3) {
                let (a, b, c) = (w[0], w[1], w[2]);
                let yaw_a = a.pose.camera_yaw_deg.unwrap_or(0.0);
                let yaw_b = b.pose.camera_yaw_deg.unwrap_or(0.0);
                let yaw_c = c.pose.camera_yaw_deg.unwrap_or(0.0);

                if wrap_deg(yaw_b - yaw_a).abs() >= self.orientation_margin_deg
                    || wrap_deg(yaw_c - yaw_b).abs() >= self.orientation_margin_deg
                {
                    continue;
                }

                let v1 = (
                    b.utm.easting - a.utm.easting,
                    b.utm.northing - a.utm.northing,
                );
                let v2 = (
                    c.utm.easting - b.utm.easting,
                    c.utm.northing - b.utm.northing,
                );
                let n1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
                let n2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
                if n1 < f64::EPSILON || n2 < f64::EPSILON {
                    continue;
                }

                let bend = wrap_deg(
                    v2.1.atan2(v2.0).to_degrees() - v1.1.atan2(v1.0).to_degrees(),
                )
                .abs();
                if bend >= self.straightness_margin_deg {
                    continue;
                }

                // Bearing of the second leg in UTM grid terms
                let bearing = v2.1.atan2(v2.0).to_degrees();
                let offset = bearing - yaw_b;
                log::info!(
                    "Reference yaw {:.2} deg from trajectory leg {} -> {} (bearing {:.2}, camera yaw {:.2})",
                    offset,
                    b.id,
                    c.id,
                    bearing,
                    yaw_b
                );
                return offset;
            }
        }

        // No straight leg found: fall back to the first image's platform/camera delta
        match records.first() {
            Some(first) => match first.pose.camera_yaw_deg {
                Some(cam_yaw) => {
                    let offset = first.pose.platform_yaw_deg - cam_yaw;
                    log::warn!(
                        "No usable trajectory triplet, falling back to platform-camera offset {:.2} deg",
                        offset
                    );
                    offset
                }
                None => {
                    log::warn!("No camera yaw available, reference yaw defaults to 0");
                    0.0
                }
            },
            None => 0.0,
        }
    }
}

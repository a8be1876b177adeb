use crate::types::{GpsPosition, Hemisphere, OrthoError, OrthoResult, UtmPosition};

// WGS84 ellipsoid
const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING: f64 = 10_000_000.0;

/// Central meridian of a UTM zone in degrees.
pub fn central_meridian_deg(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

/// UTM <-> GPS conversion and grid-convergence correction for one
/// zone/hemisphere.
///
/// Stateless beyond the zone parameters; all methods are pure.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateTransformer {
    zone: u8,
    hemisphere: Hemisphere,
}

impl CoordinateTransformer {
    pub fn new(zone: u8, hemisphere: Hemisphere) -> OrthoResult<Self> {
        if zone < 1 || zone > 60 {
            return Err(OrthoError::InvalidCoordinate(format!(
                "UTM zone {} outside 1..=60",
                zone
            )));
        }
        Ok(Self { zone, hemisphere })
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    pub fn hemisphere(&self) -> Hemisphere {
        self.hemisphere
    }

    /// Convert a projected position in this transformer's zone to WGS84
    /// latitude/longitude.
    pub fn utm_to_gps(&self, easting: f64, northing: f64) -> GpsPosition {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let x = easting - UTM_FALSE_EASTING;
        let y = match self.hemisphere {
            Hemisphere::North => northing,
            Hemisphere::South => northing - UTM_FALSE_NORTHING,
        };

        let m = y / UTM_K0;
        let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let sin_phi1 = phi1.sin();
        let cos_phi1 = phi1.cos();
        let tan_phi1 = phi1.tan();

        let c1 = ep2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let n1 = WGS84_A / (1.0 - e2 * sin_phi1 * sin_phi1).sqrt();
        let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin_phi1 * sin_phi1).powf(1.5);
        let d = x / (n1 * UTM_K0);

        let lat = phi1
            - (n1 * tan_phi1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * ep2
                        - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos_phi1;

        GpsPosition {
            lat: lat.to_degrees(),
            lon: central_meridian_deg(self.zone) + lon.to_degrees(),
        }
    }

    /// Convert WGS84 latitude/longitude to a projected position in this
    /// transformer's zone.
    pub fn gps_to_utm(&self, lat: f64, lon: f64) -> UtmPosition {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);

        let phi = lat.to_radians();
        let lambda = lon.to_radians();
        let lambda0 = central_meridian_deg(self.zone).to_radians();

        let sin_phi = phi.sin();
        let cos_phi = phi.cos();
        let tan_phi = phi.tan();

        let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = cos_phi * (lambda - lambda0);

        let m = WGS84_A
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

        let easting = UTM_K0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
            + UTM_FALSE_EASTING;

        let mut northing = UTM_K0
            * (m + n
                * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

        if self.hemisphere == Hemisphere::South {
            northing += UTM_FALSE_NORTHING;
        }

        UtmPosition {
            easting,
            northing,
            zone: self.zone,
            hemisphere: self.hemisphere,
        }
    }

    /// Grid convergence at a geographic position, in degrees.
    ///
    /// The angle between true north and UTM-grid north, used to correct
    /// compass headings to grid headings: gamma = atan(tan(lambda - lambda0) * sin(phi)).
    pub fn grid_convergence_deg(&self, lat: f64, lon: f64) -> f64 {
        let dlon = (lon - central_meridian_deg(self.zone)).to_radians();
        (dlon.tan() * lat.to_radians().sin()).atan().to_degrees()
    }
}

use crate::types::{Canvas, MapElement, OrthoError, OrthoResult, Roi};
use ndarray::{Array2, Array3};

/// Maps the union of all UTM footprints onto an integer pixel canvas.
///
/// The longer UTM span is scaled to the target resolution, a fixed blank
/// margin is added on every side, and the vertical axis is flipped so that
/// canvas row 0 corresponds to the maximum northing. Deterministic for
/// identical inputs.
#[derive(Debug, Clone, Copy)]
pub struct CanvasRasterizer {
    target_resolution: usize,
    padding_px: usize,
}

impl CanvasRasterizer {
    pub fn new(target_resolution: usize, padding_px: usize) -> Self {
        Self {
            target_resolution,
            padding_px,
        }
    }

    /// Size the canvas and derive every element's pixel corners, pixel
    /// center and ROI.
    pub fn rasterize(&self, elements: &mut [MapElement]) -> OrthoResult<Canvas> {
        if elements.is_empty() {
            return Err(OrthoError::Processing(
                "no elements left to place on the canvas".to_string(),
            ));
        }

        let mut min_e = f64::INFINITY;
        let mut max_e = f64::NEG_INFINITY;
        let mut min_n = f64::INFINITY;
        let mut max_n = f64::NEG_INFINITY;
        for element in elements.iter() {
            for corner in &element.corners {
                min_e = min_e.min(corner.easting);
                max_e = max_e.max(corner.easting);
                min_n = min_n.min(corner.northing);
                max_n = max_n.max(corner.northing);
            }
        }

        let span = (max_e - min_e).max(max_n - min_n);
        if !(span > 0.0) || !span.is_finite() {
            return Err(OrthoError::Processing(format!(
                "degenerate footprint span {:.3} m",
                span
            )));
        }
        let scale = self.target_resolution as f64 / span;

        let width = ((max_e - min_e) * scale).ceil() as usize + 2 * self.padding_px;
        let height = ((max_n - min_n) * scale).ceil() as usize + 2 * self.padding_px;
        log::info!(
            "Canvas {}x{} px at {:.3} px/m covering {:.1} x {:.1} m",
            width,
            height,
            scale,
            max_e - min_e,
            max_n - min_n
        );

        let canvas = Canvas {
            width,
            height,
            scale,
            min_easting: min_e,
            min_northing: min_n,
            max_easting: max_e,
            max_northing: max_n,
            zone: elements[0].center.zone,
            hemisphere: elements[0].center.hemisphere,
            padding_px: self.padding_px,
            buffer: Array3::zeros((height, width, 4)),
            mask: Array2::zeros((height, width)),
        };

        for element in elements.iter_mut() {
            let mut px_corners = [[0.0f64; 2]; 4];
            for (i, corner) in element.corners.iter().enumerate() {
                px_corners[i] = canvas.utm_to_px(corner.easting, corner.northing);
            }
            element.px_corners = px_corners;
            element.px_center = [
                px_corners.iter().map(|p| p[0]).sum::<f64>() / 4.0,
                px_corners.iter().map(|p| p[1]).sum::<f64>() / 4.0,
            ];
            element.roi = roi_of(&px_corners, width, height);
        }

        Ok(canvas)
    }
}

/// Integer bounding box of a pixel-space quadrilateral, clamped to the canvas.
fn roi_of(px_corners: &[[f64; 2]; 4], width: usize, height: usize) -> Roi {
    let min_x = px_corners.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
    let max_x = px_corners
        .iter()
        .map(|p| p[0])
        .fold(f64::NEG_INFINITY, f64::max);
    let min_y = px_corners.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min);
    let max_y = px_corners
        .iter()
        .map(|p| p[1])
        .fold(f64::NEG_INFINITY, f64::max);

    let x0 = (min_x.floor().max(0.0) as usize).min(width.saturating_sub(1));
    let y0 = (min_y.floor().max(0.0) as usize).min(height.saturating_sub(1));
    let x1 = ((max_x.ceil() as usize) + 1).min(width);
    let y1 = ((max_y.ceil() as usize) + 1).min(height);

    Roi {
        x: x0,
        y: y0,
        width: x1.saturating_sub(x0).max(1),
        height: y1.saturating_sub(y0).max(1),
    }
}
